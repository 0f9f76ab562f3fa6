//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `CredentialStore`: key/value persistence with memory, file and OS
//!   keychain backends
//! - `SessionManager`: access/refresh token lifecycle with computed expiry,
//!   fail-closed refresh and forced-logout reporting
//!
//! Session state is never cached in memory; every query re-reads the store.

pub mod credentials;
pub mod error;
pub mod session;

pub use credentials::{CredentialStore, FileStore, KeyringStore, MemoryStore};
pub use error::{SessionError, StoreError};
pub use session::{LogoutReason, Resolution, SessionCredentials, SessionManager, SessionState};
