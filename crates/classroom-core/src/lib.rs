//! Core library for the Smart Classroom Scheduler console.
//!
//! This crate owns the client-side session and notification subsystem:
//!
//! - `auth`: credential stores and the `SessionManager` token lifecycle
//! - `api`: the token-exchange collaborator used to refresh access tokens
//! - `notify`: the `NotificationCenter` toast queue with auto-expiry timers
//! - `guard`: the `RouteGuard` that gates protected navigation
//! - `config`: application configuration and directory layout
//! - `clock`: wall and manual clocks used for expiry computation

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod guard;
pub mod notify;

pub use api::{ApiError, DisabledExchange, HttpTokenExchange, IssuedToken, TokenExchange};
pub use auth::{
    CredentialStore, FileStore, KeyringStore, LogoutReason, MemoryStore, Resolution,
    SessionCredentials, SessionError, SessionManager, SessionState, StoreError,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, StorageBackend};
pub use guard::{Access, RouteGuard, RouteTable};
pub use notify::{Notification, NotificationCenter, Severity, Toast};
