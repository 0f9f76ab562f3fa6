//! Transient toast notifications.
//!
//! This module provides:
//! - `Toast`: an id-less notification request with convenience constructors
//! - `Notification`: a queued entry as the presentation layer renders it
//! - `NotificationCenter`: the ordered queue with auto-dismiss timers
//!
//! Toasts disappear after 5 seconds unless a different lifetime is given;
//! a lifetime of 0 keeps them until dismissed.

pub mod center;
pub mod toast;

pub use center::{NotificationCenter, DEFAULT_TTL_MS};
pub use toast::{Notification, Severity, Toast};
