//! Token-issuance API client.
//!
//! This module provides the `TokenExchange` capability the session manager
//! uses to trade a refresh token for a new access token, plus an HTTP
//! implementation and a disabled stand-in for deployments without a refresh
//! endpoint.

pub mod client;
pub mod error;

pub use client::{DisabledExchange, HttpTokenExchange, IssuedToken, TokenExchange};
pub use error::ApiError;
