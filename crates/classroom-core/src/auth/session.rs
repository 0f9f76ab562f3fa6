//! Session lifecycle over a credential store.
//!
//! The manager is the only writer of the four session keys. Expiry is never
//! stored as a flag: it is computed from `tokenExpiresAt` against the
//! injected clock on every call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CredentialStore, SessionError, StoreError};
use crate::api::TokenExchange;
use crate::clock::{Clock, SystemClock};
use crate::notify::{NotificationCenter, Toast};

// ============================================================================
// Storage keys
// ============================================================================

pub const ACCESS_TOKEN_KEY: &str = "authToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const EXPIRES_AT_KEY: &str = "tokenExpiresAt";
pub const AUTHENTICATED_KEY: &str = "isAuthenticated";

/// Write order matters: the authenticated flag goes last so an interrupted
/// write never leaves the flag set without credentials.
const SESSION_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    EXPIRES_AT_KEY,
    AUTHENTICATED_KEY,
];

// ============================================================================
// Session model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds after which `access_token` is invalid.
    pub expires_at: i64,
}

impl SessionCredentials {
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis > self.expires_at
    }

    pub fn millis_until_expiry(&self, now_millis: i64) -> u64 {
        self.expires_at.saturating_sub(now_millis).max(0) as u64
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at)
    }
}

/// Session state derived from storage on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(SessionCredentials),
    /// Access token is stale; the refresh token may still mint a new one.
    Expired(SessionCredentials),
    /// Partial or unparsable record. Treated as unauthenticated.
    Invalid,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Expired(_) => "expired",
            SessionState::Invalid => "invalid",
        }
    }
}

/// Why a session ended without the user logging out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    Expired,
    RefreshFailed,
    Corrupt,
}

impl LogoutReason {
    pub fn description(&self) -> &'static str {
        match self {
            LogoutReason::Expired => "Your session has expired. Please login again.",
            LogoutReason::RefreshFailed => "Your session could not be renewed. Please login again.",
            LogoutReason::Corrupt => "Saved session data was invalid. Please login again.",
        }
    }

    pub(crate) fn toast(&self) -> Toast {
        let title = match self {
            LogoutReason::Expired | LogoutReason::RefreshFailed => "Session Expired",
            LogoutReason::Corrupt => "Session Reset",
        };
        Toast::warning(title).description(self.description())
    }
}

/// Outcome of the per-navigation session check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub state: SessionState,
    pub forced_logout: Option<LogoutReason>,
}

#[derive(Debug, Default)]
struct StoredRecord {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<String>,
    authenticated: Option<String>,
    /// The backend holds data it cannot parse.
    unreadable: bool,
}

impl StoredRecord {
    fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.expires_at.is_none()
            && self.authenticated.is_none()
    }

    fn derive_state(&self, now_millis: i64) -> SessionState {
        if self.unreadable {
            return SessionState::Invalid;
        }
        if self.is_empty() {
            return SessionState::Unauthenticated;
        }

        let (Some(access), Some(refresh), Some(expires)) =
            (&self.access_token, &self.refresh_token, &self.expires_at)
        else {
            return SessionState::Invalid;
        };

        let Ok(expires_at) = expires.trim().parse::<i64>() else {
            return SessionState::Invalid;
        };

        if access.is_empty() || self.authenticated.as_deref() != Some("true") {
            return SessionState::Invalid;
        }

        let credentials = SessionCredentials {
            access_token: access.clone(),
            refresh_token: refresh.clone(),
            expires_at,
        };

        if credentials.is_expired_at(now_millis) {
            SessionState::Expired(credentials)
        } else {
            SessionState::Authenticated(credentials)
        }
    }
}

enum RefreshOutcome {
    Refreshed(String),
    NoRefreshToken,
    /// The session changed while the exchange was in flight.
    Stale,
    Failed,
}

// ============================================================================
// Session manager
// ============================================================================

pub struct SessionManager<X> {
    store: Arc<dyn CredentialStore>,
    exchange: X,
    clock: Arc<dyn Clock>,
    notifications: Option<NotificationCenter>,
    /// Bumped on every credential mutation; refresh results from an older
    /// version are discarded.
    version: Mutex<u64>,
    storage_warned: AtomicBool,
}

impl<X: TokenExchange> SessionManager<X> {
    pub fn new(store: Arc<dyn CredentialStore>, exchange: X) -> Self {
        Self {
            store,
            exchange,
            clock: Arc::new(SystemClock),
            notifications: None,
            version: Mutex::new(0),
            storage_warned: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report logins, logouts and forced logouts to this center.
    pub fn with_notifications(mut self, notifications: NotificationCenter) -> Self {
        self.notifications = Some(notifications);
        self
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn lock_version(&self) -> MutexGuard<'_, u64> {
        self.version.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Store a new session expiring `ttl_seconds` from now.
    ///
    /// If any write fails, every key is removed so no partial record remains.
    pub fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        ttl_seconds: u64,
    ) -> Result<(), SessionError> {
        let mut version = self.lock_version();
        *version += 1;

        let expires_at = self.expiry_from_now(ttl_seconds);
        self.write_record(access_token, refresh_token, expires_at)?;

        debug!(expires_at, version = *version, "Session stored");
        Ok(())
    }

    /// Current access token, or `None` if there is no valid session.
    ///
    /// An expired or malformed record is cleared by this call. Use
    /// `is_expired` to check without side effects, and call
    /// `refresh_access_token` before this if the token should be renewed.
    pub fn get_access_token(&self) -> Option<String> {
        let mut version = self.lock_version();
        let record = self.read_record();

        match record.derive_state(self.now()) {
            SessionState::Authenticated(credentials) => Some(credentials.access_token),
            SessionState::Unauthenticated => None,
            SessionState::Expired(credentials) => {
                debug!(expires_at = credentials.expires_at, "Access token expired, evicting session");
                self.clear_locked(&mut version);
                drop(version);
                self.notify_forced_logout(LogoutReason::Expired);
                None
            }
            SessionState::Invalid => {
                warn!("Stored session is incomplete or malformed, clearing");
                self.clear_locked(&mut version);
                drop(version);
                self.notify_forced_logout(LogoutReason::Corrupt);
                None
            }
        }
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read_key(REFRESH_TOKEN_KEY)
    }

    /// True when no expiry is recorded or it has passed. Never mutates storage.
    pub fn is_expired(&self) -> bool {
        match self.stored_expiry() {
            Some(expires_at) => self.now() > expires_at,
            None => true,
        }
    }

    /// Milliseconds until the access token expires, 0 if unset or past.
    pub fn time_until_expiration(&self) -> u64 {
        self.stored_expiry()
            .map(|expires_at| expires_at.saturating_sub(self.now()).max(0) as u64)
            .unwrap_or(0)
    }

    /// Trade the refresh token for a new access token.
    ///
    /// Any exchange failure clears the whole session. A result that arrives
    /// after the session was replaced or cleared is dropped.
    pub async fn refresh_access_token(&self) -> Option<String> {
        match self.refresh().await {
            RefreshOutcome::Refreshed(token) => Some(token),
            RefreshOutcome::NoRefreshToken | RefreshOutcome::Stale => None,
            RefreshOutcome::Failed => {
                self.notify_forced_logout(LogoutReason::RefreshFailed);
                None
            }
        }
    }

    /// Remove every session key. Safe to call in any state.
    pub fn clear_session(&self) {
        let mut version = self.lock_version();
        self.clear_locked(&mut version);
    }

    /// Store a session on behalf of the user and announce it.
    pub fn login(
        &self,
        access_token: &str,
        refresh_token: &str,
        ttl_seconds: u64,
    ) -> Result<(), SessionError> {
        match self.set_session(access_token, refresh_token, ttl_seconds) {
            Ok(()) => {
                info!("Login successful");
                self.notify(Toast::success("Logged in").description("Welcome back."));
                Ok(())
            }
            Err(e) => {
                self.notify(
                    Toast::error("Login failed").description("Your session could not be saved."),
                );
                Err(e)
            }
        }
    }

    /// User-initiated logout.
    pub fn logout(&self) {
        self.clear_session();
        info!("Logged out");
        self.notify(Toast::info("Logged out").description("You have been successfully logged out."));
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.read_record().derive_state(self.now())
    }

    /// Stored credentials if the record is complete, expired or not.
    pub fn credentials(&self) -> Option<SessionCredentials> {
        match self.state() {
            SessionState::Authenticated(c) | SessionState::Expired(c) => Some(c),
            SessionState::Unauthenticated | SessionState::Invalid => None,
        }
    }

    /// Check performed on every protected navigation.
    ///
    /// Expired sessions get one refresh attempt; malformed ones are cleared.
    /// Does not notify: the caller reports the returned logout reason.
    pub async fn resolve(&self) -> Resolution {
        match self.state() {
            state @ (SessionState::Authenticated(_) | SessionState::Unauthenticated) => Resolution {
                state,
                forced_logout: None,
            },
            SessionState::Invalid => {
                warn!("Stored session is incomplete or malformed, clearing");
                self.clear_session();
                Resolution {
                    state: SessionState::Unauthenticated,
                    forced_logout: Some(LogoutReason::Corrupt),
                }
            }
            SessionState::Expired(_) => match self.refresh().await {
                RefreshOutcome::Refreshed(_) | RefreshOutcome::Stale => Resolution {
                    state: self.state(),
                    forced_logout: None,
                },
                RefreshOutcome::NoRefreshToken => {
                    self.clear_session();
                    Resolution {
                        state: SessionState::Unauthenticated,
                        forced_logout: Some(LogoutReason::Expired),
                    }
                }
                RefreshOutcome::Failed => Resolution {
                    state: SessionState::Unauthenticated,
                    forced_logout: Some(LogoutReason::RefreshFailed),
                },
            },
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn refresh(&self) -> RefreshOutcome {
        let (refresh_token, started_at) = {
            let version = self.lock_version();
            match self.read_key(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty()) {
                Some(token) => (token, *version),
                None => {
                    debug!("No refresh token, skipping refresh");
                    return RefreshOutcome::NoRefreshToken;
                }
            }
        };

        let result = self.exchange.exchange(&refresh_token).await;

        let mut version = self.lock_version();
        if *version != started_at {
            debug!(started_at, current = *version, "Discarding refresh result for a replaced session");
            return RefreshOutcome::Stale;
        }

        match result {
            Ok(issued) => {
                let expires_at = self.expiry_from_now(issued.expires_in_seconds);
                let refresh_token = issued.refresh_token.unwrap_or(refresh_token);
                *version += 1;
                if let Err(e) = self.put_record(&issued.access_token, &refresh_token, expires_at) {
                    warn!(error = %e, "Refreshed session could not be stored, clearing");
                    return RefreshOutcome::Failed;
                }
                info!(expires_at, "Access token refreshed");
                RefreshOutcome::Refreshed(issued.access_token)
            }
            Err(e) => {
                warn!(error = %e, rejected = e.is_rejection(), "Token refresh failed, clearing session");
                self.clear_locked(&mut version);
                RefreshOutcome::Failed
            }
        }
    }

    fn expiry_from_now(&self, ttl_seconds: u64) -> i64 {
        let ttl_millis = i64::try_from(ttl_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.now().saturating_add(ttl_millis)
    }

    /// Caller must hold the version lock.
    fn write_record(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
    ) -> Result<(), SessionError> {
        self.put_record(access_token, refresh_token, expires_at)
            .map_err(|e| {
                self.storage_failure(&e);
                e.into()
            })
    }

    /// Write every key, authenticated flag last. On failure the keys already
    /// written are removed again and the error is returned unreported.
    fn put_record(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
    ) -> Result<(), StoreError> {
        let expires_at = expires_at.to_string();
        let values = [access_token, refresh_token, expires_at.as_str(), "true"];

        for (key, value) in SESSION_KEYS.iter().zip(values) {
            if let Err(e) = self.store.put(key, value) {
                warn!(key, error = %e, "Session write failed, rolling back");
                for key in SESSION_KEYS {
                    if let Err(e) = self.store.remove(key) {
                        debug!(key, error = %e, "Rollback remove failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn clear_locked(&self, version: &mut u64) {
        self.remove_all();
        *version += 1;
        debug!(version = *version, "Session cleared");
    }

    fn remove_all(&self) {
        for key in SESSION_KEYS {
            if let Err(e) = self.store.remove(key) {
                self.storage_failure(&e);
            }
        }
    }

    fn read_key(&self, key: &str) -> Option<String> {
        self.try_read_key(key).unwrap_or(None)
    }

    /// `Err` only when the stored data is unreadable; an unreachable
    /// backend reads as absent.
    fn try_read_key(&self, key: &str) -> Result<Option<String>, ()> {
        match self.store.get(key) {
            Ok(value) => Ok(value),
            Err(StoreError::Corrupt(e)) => {
                debug!(key, error = %e, "Stored session unreadable");
                Err(())
            }
            Err(e) => {
                self.storage_failure(&e);
                Ok(None)
            }
        }
    }

    fn read_record(&self) -> StoredRecord {
        let mut unreadable = false;
        let mut read = |key: &str| {
            self.try_read_key(key).unwrap_or_else(|()| {
                unreadable = true;
                None
            })
        };
        let access_token = read(ACCESS_TOKEN_KEY);
        let refresh_token = read(REFRESH_TOKEN_KEY);
        let expires_at = read(EXPIRES_AT_KEY);
        let authenticated = read(AUTHENTICATED_KEY);

        StoredRecord {
            access_token,
            refresh_token,
            expires_at,
            authenticated,
            unreadable,
        }
    }

    fn stored_expiry(&self) -> Option<i64> {
        self.read_key(EXPIRES_AT_KEY)
            .and_then(|value| value.trim().parse::<i64>().ok())
    }

    fn storage_failure(&self, error: &StoreError) {
        if self.storage_warned.swap(true, Ordering::SeqCst) {
            debug!(error = %error, "Credential storage still unavailable");
            return;
        }
        warn!(error = %error, "Credential storage unavailable, session will not persist");
        self.notify(
            Toast::warning("Storage Unavailable")
                .description("Your session could not be saved on this device."),
        );
    }

    fn notify_forced_logout(&self, reason: LogoutReason) {
        warn!(?reason, "Session ended without user action");
        self.notify(reason.toast());
    }

    fn notify(&self, toast: Toast) {
        if let Some(ref center) = self.notifications {
            center.enqueue(toast);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, IssuedToken};
    use crate::auth::{FileStore, MemoryStore};
    use crate::clock::ManualClock;
    use crate::notify::Severity;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const START: i64 = 1_700_000_000_000;

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    /// Returns queued results in order and counts calls.
    #[derive(Default)]
    struct ScriptedExchange {
        results: Mutex<VecDeque<Result<IssuedToken, ApiError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedExchange {
        fn returning(result: Result<IssuedToken, ApiError>) -> Self {
            let exchange = Self::default();
            exchange.results.lock().unwrap().push_back(result);
            exchange
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenExchange for ScriptedExchange {
        async fn exchange(&self, _refresh_token: &str) -> Result<IssuedToken, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ApiError::RefreshDisabled))
        }
    }

    /// Holds the exchange open until the gate is opened.
    struct GatedExchange {
        started: Arc<Notify>,
        gate: Arc<Notify>,
        result: Mutex<Option<Result<IssuedToken, ApiError>>>,
    }

    impl GatedExchange {
        fn new(result: Result<IssuedToken, ApiError>) -> (Self, Arc<Notify>, Arc<Notify>) {
            let started = Arc::new(Notify::new());
            let gate = Arc::new(Notify::new());
            let exchange = Self {
                started: started.clone(),
                gate: gate.clone(),
                result: Mutex::new(Some(result)),
            };
            (exchange, started, gate)
        }
    }

    impl TokenExchange for GatedExchange {
        async fn exchange(&self, _refresh_token: &str) -> Result<IssuedToken, ApiError> {
            self.started.notify_one();
            self.gate.notified().await;
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(ApiError::RefreshDisabled))
        }
    }

    /// Fails every write after the first `allowed_puts`.
    struct FlakyStore {
        inner: MemoryStore,
        allowed_puts: AtomicUsize,
        fail_reads: bool,
    }

    impl FlakyStore {
        fn failing_after(allowed_puts: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                allowed_puts: AtomicUsize::new(allowed_puts),
                fail_reads: false,
            }
        }

        fn unavailable() -> Self {
            Self {
                inner: MemoryStore::new(),
                allowed_puts: AtomicUsize::new(0),
                fail_reads: true,
            }
        }
    }

    impl CredentialStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            if self.fail_reads {
                return Err(StoreError::Unavailable("disabled".to_string()));
            }
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            let remaining = self.allowed_puts.load(Ordering::SeqCst);
            if remaining == 0 {
                return Err(StoreError::Unavailable("quota exceeded".to_string()));
            }
            self.allowed_puts.store(remaining - 1, Ordering::SeqCst);
            self.inner.put(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    fn issued(token: &str, secs: u64) -> IssuedToken {
        IssuedToken {
            access_token: token.to_string(),
            expires_in_seconds: secs,
            refresh_token: None,
        }
    }

    fn manager_with<X: TokenExchange>(
        exchange: X,
    ) -> (SessionManager<X>, Arc<MemoryStore>, ManualClock, NotificationCenter) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(START);
        let center = NotificationCenter::new();
        let manager = SessionManager::new(store.clone(), exchange)
            .with_clock(Arc::new(clock.clone()))
            .with_notifications(center.clone());
        (manager, store, clock, center)
    }

    fn all_keys_empty(store: &MemoryStore) -> bool {
        SESSION_KEYS.iter().all(|k| store.get(k).unwrap().is_none())
    }

    // -------------------------------------------------------------------------
    // set / get / expiry
    // -------------------------------------------------------------------------

    #[test]
    fn test_set_session_then_get_access_token() {
        let (manager, store, _clock, _center) = manager_with(ScriptedExchange::default());
        manager.set_session("a", "r", 10).unwrap();

        assert_eq!(manager.get_access_token().as_deref(), Some("a"));
        assert!(!manager.is_expired());
        assert_eq!(manager.time_until_expiration(), 10_000);
        assert_eq!(store.get(EXPIRES_AT_KEY).unwrap().as_deref(), Some("1700000010000"));
        assert_eq!(store.get(AUTHENTICATED_KEY).unwrap().as_deref(), Some("true"));
        assert!(manager.state().is_authenticated());
    }

    #[test]
    fn test_expired_session_evicted_on_read() {
        let (manager, store, clock, center) = manager_with(ScriptedExchange::default());
        manager.set_session("a", "r", 10).unwrap();
        clock.advance_secs(11);

        assert!(manager.is_expired());
        // Probing does not mutate storage
        assert!(!all_keys_empty(&store));
        assert!(matches!(manager.state(), SessionState::Expired(_)));

        assert_eq!(manager.get_access_token(), None);
        assert!(all_keys_empty(&store));
        assert_eq!(manager.get_access_token(), None);

        let notes = center.list();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Warning);
        assert_eq!(notes[0].title.as_deref(), Some("Session Expired"));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let (manager, _store, clock, _center) = manager_with(ScriptedExchange::default());
        manager.set_session("a", "r", 10).unwrap();
        clock.advance_millis(10_000);
        assert!(!manager.is_expired());
        assert_eq!(manager.time_until_expiration(), 0);
        clock.advance_millis(1);
        assert!(manager.is_expired());
    }

    #[test]
    fn test_queries_without_session() {
        let (manager, _store, _clock, center) = manager_with(ScriptedExchange::default());
        assert!(manager.is_expired());
        assert_eq!(manager.time_until_expiration(), 0);
        assert_eq!(manager.get_access_token(), None);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        // Nothing was evicted, so nothing to report
        assert!(center.is_empty());
    }

    #[test]
    fn test_malformed_expiry_is_invalid_and_cleared() {
        let (manager, store, _clock, center) = manager_with(ScriptedExchange::default());
        manager.set_session("a", "r", 10).unwrap();
        store.put(EXPIRES_AT_KEY, "soon").unwrap();

        assert_eq!(manager.state(), SessionState::Invalid);
        assert!(manager.is_expired());
        assert_eq!(manager.get_access_token(), None);
        assert!(all_keys_empty(&store));
        assert_eq!(center.list()[0].title.as_deref(), Some("Session Reset"));
    }

    #[test]
    fn test_partial_record_is_invalid() {
        let (manager, store, _clock, _center) = manager_with(ScriptedExchange::default());
        store.put(EXPIRES_AT_KEY, "1800000000000").unwrap();
        assert_eq!(manager.state(), SessionState::Invalid);

        store.remove(EXPIRES_AT_KEY).unwrap();
        store.put(AUTHENTICATED_KEY, "true").unwrap();
        assert_eq!(manager.state(), SessionState::Invalid);
    }

    #[test]
    fn test_missing_authenticated_flag_is_invalid() {
        let (manager, store, _clock, _center) = manager_with(ScriptedExchange::default());
        manager.set_session("a", "r", 10).unwrap();
        store.remove(AUTHENTICATED_KEY).unwrap();
        assert_eq!(manager.state(), SessionState::Invalid);
    }

    #[test]
    fn test_clear_session_is_idempotent() {
        let (manager, store, _clock, center) = manager_with(ScriptedExchange::default());
        manager.set_session("a", "r", 10).unwrap();

        manager.clear_session();
        assert!(all_keys_empty(&store));
        manager.clear_session();
        assert!(all_keys_empty(&store));
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(center.is_empty());
    }

    #[test]
    fn test_credentials_accessor() {
        let (manager, _store, clock, _center) = manager_with(ScriptedExchange::default());
        assert_eq!(manager.credentials(), None);
        manager.set_session("a", "r", 1).unwrap();
        clock.advance_secs(5);

        let creds = manager.credentials().unwrap();
        assert_eq!(creds.access_token, "a");
        assert_eq!(creds.refresh_token, "r");
        assert!(creds.is_expired_at(clock.now_millis()));
        assert!(creds.expires_at_utc().is_some());
        assert_eq!(manager.refresh_token().as_deref(), Some("r"));
    }

    // -------------------------------------------------------------------------
    // Storage failures
    // -------------------------------------------------------------------------

    #[test]
    fn test_failed_write_rolls_back() {
        let store = Arc::new(FlakyStore::failing_after(2));
        let center = NotificationCenter::new();
        let manager = SessionManager::new(store.clone(), ScriptedExchange::default())
            .with_notifications(center.clone());

        let result = manager.set_session("a", "r", 10);
        assert!(matches!(result, Err(SessionError::StorageUnavailable(_))));
        assert!(store.inner.is_empty());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert_eq!(center.list()[0].title.as_deref(), Some("Storage Unavailable"));
    }

    #[test]
    fn test_storage_warning_only_once() {
        let store = Arc::new(FlakyStore::unavailable());
        let center = NotificationCenter::new();
        let manager = SessionManager::new(store, ScriptedExchange::default())
            .with_notifications(center.clone());

        assert_eq!(manager.get_access_token(), None);
        assert!(manager.is_expired());
        assert!(manager.set_session("a", "r", 10).is_err());
        assert_eq!(manager.state(), SessionState::Unauthenticated);

        let warnings: Vec<_> = center
            .list()
            .into_iter()
            .filter(|n| n.title.as_deref() == Some("Storage Unavailable"))
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_extreme_stored_expiry_does_not_overflow() {
        let (manager, store, _clock, _center) = manager_with(ScriptedExchange::default());
        manager.set_session("a", "r", 10).unwrap();

        store.put(EXPIRES_AT_KEY, &i64::MIN.to_string()).unwrap();
        assert_eq!(manager.time_until_expiration(), 0);
        assert!(manager.is_expired());

        store.put(EXPIRES_AT_KEY, &i64::MAX.to_string()).unwrap();
        assert_eq!(manager.time_until_expiration(), (i64::MAX - START) as u64);

        let creds = SessionCredentials {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: i64::MAX,
        };
        assert_eq!(creds.millis_until_expiry(-1), i64::MAX as u64);
        let creds = SessionCredentials {
            expires_at: i64::MIN,
            ..creds
        };
        assert_eq!(creds.millis_until_expiry(START), 0);
    }

    #[test]
    fn test_corrupt_session_file_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        std::fs::write(store.path(), "{not json").unwrap();
        let manager = SessionManager::new(store.clone(), ScriptedExchange::default());

        assert_eq!(manager.state(), SessionState::Invalid);
        assert_eq!(manager.get_access_token(), None);
        assert!(!store.path().exists());
        manager.clear_session();

        manager.set_session("a", "r", 60).unwrap();
        assert_eq!(manager.get_access_token().as_deref(), Some("a"));
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_without_refresh_token_skips_exchange() {
        let (manager, _store, _clock, center) = manager_with(ScriptedExchange::default());
        assert_eq!(manager.refresh_access_token().await, None);
        assert_eq!(manager.exchange.calls(), 0);
        assert!(center.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_success_replaces_access_token() {
        let (manager, _store, clock, _center) =
            manager_with(ScriptedExchange::returning(Ok(issued("a2", 60))));
        manager.set_session("a", "r", 10).unwrap();
        clock.advance_secs(11);

        assert_eq!(manager.refresh_access_token().await.as_deref(), Some("a2"));
        assert_eq!(manager.get_access_token().as_deref(), Some("a2"));
        assert_eq!(manager.refresh_token().as_deref(), Some("r"));
        assert_eq!(manager.time_until_expiration(), 60_000);
    }

    #[tokio::test]
    async fn test_refresh_keeps_rotated_refresh_token() {
        let mut rotated = issued("a2", 60);
        rotated.refresh_token = Some("r2".to_string());
        let (manager, _store, _clock, _center) = manager_with(ScriptedExchange::returning(Ok(rotated)));
        manager.set_session("a", "r", 10).unwrap();

        manager.refresh_access_token().await;
        assert_eq!(manager.refresh_token().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session() {
        let (manager, store, _clock, center) =
            manager_with(ScriptedExchange::returning(Err(ApiError::RefreshRejected {
                status: 401,
                reason: "invalid_grant".to_string(),
            })));
        manager.set_session("a", "r", 10).unwrap();

        assert_eq!(manager.refresh_access_token().await, None);
        assert!(all_keys_empty(&store));
        assert_eq!(manager.exchange.calls(), 1);

        let notes = center.list();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Warning);
        assert_eq!(notes[0].description.as_deref(), Some(LogoutReason::RefreshFailed.description()));
    }

    #[tokio::test]
    async fn test_unsaved_refresh_warns_once() {
        // Room for the initial session only
        let store = Arc::new(FlakyStore::failing_after(4));
        let center = NotificationCenter::new();
        let manager =
            SessionManager::new(store.clone(), ScriptedExchange::returning(Ok(issued("a2", 60))))
                .with_notifications(center.clone());
        manager.set_session("a", "r", 10).unwrap();

        assert_eq!(manager.refresh_access_token().await, None);
        assert!(store.inner.is_empty());

        let notes = center.list();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title.as_deref(), Some("Session Expired"));
    }

    #[tokio::test]
    async fn test_login_during_refresh_wins() {
        let (exchange, started, gate) = GatedExchange::new(Ok(issued("stale", 60)));
        let (manager, _store, _clock, _center) = manager_with(exchange);
        manager.set_session("a", "r", 10).unwrap();

        let (refreshed, ()) = tokio::join!(manager.refresh_access_token(), async {
            started.notified().await;
            manager.set_session("b", "rb", 30).unwrap();
            gate.notify_one();
        });

        assert_eq!(refreshed, None);
        assert_eq!(manager.get_access_token().as_deref(), Some("b"));
        assert_eq!(manager.refresh_token().as_deref(), Some("rb"));
    }

    #[tokio::test]
    async fn test_failed_stale_refresh_does_not_clear_newer_session() {
        let (exchange, started, gate) = GatedExchange::new(Err(ApiError::Throttled { retry_after_secs: None }));
        let (manager, _store, _clock, center) = manager_with(exchange);
        manager.set_session("a", "r", 10).unwrap();

        let (refreshed, ()) = tokio::join!(manager.refresh_access_token(), async {
            started.notified().await;
            manager.set_session("b", "rb", 30).unwrap();
            gate.notify_one();
        });

        assert_eq!(refreshed, None);
        assert_eq!(manager.get_access_token().as_deref(), Some("b"));
        assert!(center.is_empty());
    }

    #[tokio::test]
    async fn test_logout_during_refresh_is_not_resurrected() {
        let (exchange, started, gate) = GatedExchange::new(Ok(issued("late", 60)));
        let (manager, store, _clock, _center) = manager_with(exchange);
        manager.set_session("a", "r", 10).unwrap();

        let (refreshed, ()) = tokio::join!(manager.refresh_access_token(), async {
            started.notified().await;
            manager.clear_session();
            gate.notify_one();
        });

        assert_eq!(refreshed, None);
        assert!(all_keys_empty(&store));
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    // -------------------------------------------------------------------------
    // resolve / login / logout
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_resolve_refreshes_expired_session() {
        let (manager, _store, clock, center) =
            manager_with(ScriptedExchange::returning(Ok(issued("a2", 60))));
        manager.set_session("a", "r", 10).unwrap();
        clock.advance_secs(11);

        let resolution = manager.resolve().await;
        assert!(resolution.state.is_authenticated());
        assert_eq!(resolution.forced_logout, None);
        assert!(center.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_reports_failed_refresh_without_notifying() {
        let (manager, store, clock, center) =
            manager_with(ScriptedExchange::returning(Err(ApiError::RefreshDisabled)));
        manager.set_session("a", "r", 10).unwrap();
        clock.advance_secs(11);

        let resolution = manager.resolve().await;
        assert_eq!(resolution.state, SessionState::Unauthenticated);
        assert_eq!(resolution.forced_logout, Some(LogoutReason::RefreshFailed));
        assert!(all_keys_empty(&store));
        assert!(center.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_expired_without_refresh_token() {
        let (manager, store, clock, _center) = manager_with(ScriptedExchange::default());
        manager.set_session("a", "", 10).unwrap();
        clock.advance_secs(11);

        let resolution = manager.resolve().await;
        assert_eq!(resolution.forced_logout, Some(LogoutReason::Expired));
        assert_eq!(manager.exchange.calls(), 0);
        assert!(all_keys_empty(&store));
    }

    #[tokio::test]
    async fn test_resolve_clears_invalid_record() {
        let (manager, store, _clock, _center) = manager_with(ScriptedExchange::default());
        store.put(ACCESS_TOKEN_KEY, "orphan").unwrap();

        let resolution = manager.resolve().await;
        assert_eq!(resolution.state, SessionState::Unauthenticated);
        assert_eq!(resolution.forced_logout, Some(LogoutReason::Corrupt));
        assert!(all_keys_empty(&store));
    }

    #[test]
    fn test_login_and_logout_notify() {
        let (manager, _store, _clock, center) = manager_with(ScriptedExchange::default());
        manager.login("a", "r", 60).unwrap();
        manager.logout();

        let notes = center.list();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].severity, Severity::Success);
        assert_eq!(notes[1].severity, Severity::Default);
        assert_eq!(notes[1].title.as_deref(), Some("Logged out"));
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }
}
