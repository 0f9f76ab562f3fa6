//! Navigation gate for protected console pages.

use tracing::debug;

use crate::api::TokenExchange;
use crate::auth::{LogoutReason, SessionManager, SessionState};
use crate::notify::{NotificationCenter, Toast};

/// Where denied navigations are sent.
pub const LOGIN_PATH: &str = "/login";

/// Pages reachable without a session.
const PUBLIC_PATHS: &[&str] = &["/", "/login", "/register"];

/// Sections behind the guard, including their sub-pages.
const PROTECTED_SECTIONS: &[&str] = &[
    "/dashboard",
    "/departments",
    "/teachers",
    "/courses",
    "/rooms",
    "/scheduling",
    "/analytics",
];

/// Which router paths require a session.
#[derive(Debug, Clone)]
pub struct RouteTable {
    public: Vec<String>,
    protected: Vec<String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            public: PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
            protected: PROTECTED_SECTIONS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl RouteTable {
    pub fn new(public: &[&str], protected: &[&str]) -> Self {
        Self {
            public: public.iter().map(|p| p.to_string()).collect(),
            protected: protected.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Unknown paths are treated as protected.
    pub fn is_protected(&self, path: &str) -> bool {
        let path = normalize(path);
        if self.protected.iter().any(|section| is_within(&path, section)) {
            return true;
        }
        !self.public.iter().any(|p| normalize(p) == path)
    }
}

/// Strip query, fragment and trailing slash.
fn normalize(path: &str) -> String {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let trimmed = path[..end].trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn is_within(path: &str, section: &str) -> bool {
    path == section
        || path
            .strip_prefix(section)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Allow,
    /// Redirect, remembering the page the user asked for, query included.
    Deny { redirect_to: String, from: String },
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allow)
    }
}

pub struct RouteGuard {
    routes: RouteTable,
    notifications: NotificationCenter,
    /// Blocked path already reported, so re-renders stay quiet.
    last_denied: Option<String>,
}

impl RouteGuard {
    pub fn new(routes: RouteTable, notifications: NotificationCenter) -> Self {
        Self {
            routes,
            notifications,
            last_denied: None,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide a navigation against an already resolved session state.
    ///
    /// A denial enqueues one warning. Evaluating the same blocked path again
    /// does not enqueue another until some other path has been evaluated.
    pub fn evaluate(
        &mut self,
        path: &str,
        state: &SessionState,
        forced_logout: Option<LogoutReason>,
    ) -> Access {
        if !self.routes.is_protected(path) || state.is_authenticated() {
            self.last_denied = None;
            return Access::Allow;
        }

        let blocked = normalize(path);
        if self.last_denied.as_deref() != Some(blocked.as_str()) {
            let toast = match forced_logout {
                Some(reason) => reason.toast(),
                None => Toast::warning("Authentication Required")
                    .description("Please login to access this page"),
            };
            self.notifications.enqueue(toast);
            self.last_denied = Some(blocked);
        }

        debug!(path, state = state.label(), "Navigation denied");
        Access::Deny {
            redirect_to: LOGIN_PATH.to_string(),
            from: path.to_string(),
        }
    }

    /// Resolve the session (refreshing if needed) and decide the navigation.
    pub async fn navigate<X: TokenExchange>(
        &mut self,
        session: &SessionManager<X>,
        path: &str,
    ) -> Access {
        if !self.routes.is_protected(path) {
            self.last_denied = None;
            return Access::Allow;
        }
        let resolution = session.resolve().await;
        self.evaluate(path, &resolution.state, resolution.forced_logout)
    }
}

// ============================================================================
// Tests
// ============================================================================
