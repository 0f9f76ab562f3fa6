use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Visual weight of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Default,
    Destructive,
    Success,
    Warning,
}

/// A queued notification as the presentation layer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub severity: Severity,
    /// Auto-dismiss delay; 0 never expires.
    pub ttl_ms: u64,
}

/// A notification request before the center assigns its id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toast {
    pub title: Option<String>,
    pub description: Option<String>,
    pub severity: Severity,
    /// `None` uses the center's default lifetime.
    pub ttl_ms: Option<u64>,
}

impl Toast {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            ..Self::default()
        }
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self::new(Severity::Default).title(title)
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self::new(Severity::Success).title(title)
    }

    pub fn error(title: impl Into<String>) -> Self {
        Self::new(Severity::Destructive).title(title)
    }

    pub fn warning(title: impl Into<String>) -> Self {
        Self::new(Severity::Warning).title(title)
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    /// Stay on screen until dismissed.
    pub fn sticky(self) -> Self {
        self.ttl_ms(0)
    }
}
