//! Ordered toast queue with per-item auto-dismiss timers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Notification, Toast};

/// Lifetime applied when a toast does not specify one.
pub const DEFAULT_TTL_MS: u64 = 5000;

struct Queue {
    items: Vec<Notification>,
    timers: HashMap<String, CancellationToken>,
    next_id: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    feed: watch::Sender<Vec<Notification>>,
    shutdown: CancellationToken,
    default_ttl_ms: u64,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: &str) -> bool {
        let mut queue = self.queue();
        if let Some(timer) = queue.timers.remove(id) {
            timer.cancel();
        }
        let before = queue.items.len();
        queue.items.retain(|n| n.id != id);
        let removed = queue.items.len() != before;
        if removed {
            self.feed.send_replace(queue.items.clone());
        }
        removed
    }
}

/// Process-wide notification queue.
///
/// Clones share the same queue. Timed entries need a Tokio runtime to
/// auto-dismiss; without one they stay until dismissed.
#[derive(Clone)]
pub struct NotificationCenter {
    shared: Arc<Shared>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_TTL_MS)
    }

    pub fn with_default_ttl(default_ttl_ms: u64) -> Self {
        let (feed, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    items: Vec::new(),
                    timers: HashMap::new(),
                    next_id: 1,
                }),
                feed,
                shutdown: CancellationToken::new(),
                default_ttl_ms,
            }),
        }
    }

    /// Append a notification and schedule its removal. Returns the new id.
    pub fn enqueue(&self, toast: Toast) -> String {
        let ttl_ms = toast.ttl_ms.unwrap_or(self.shared.default_ttl_ms);

        let mut queue = self.shared.queue();
        let id = format!("toast-{}", queue.next_id);
        queue.next_id += 1;

        queue.items.push(Notification {
            id: id.clone(),
            title: toast.title,
            description: toast.description,
            severity: toast.severity,
            ttl_ms,
        });

        if ttl_ms > 0 && !self.shared.shutdown.is_cancelled() {
            if let Some(timer) = self.schedule_removal(&id, ttl_ms) {
                queue.timers.insert(id.clone(), timer);
            }
        }

        self.shared.feed.send_replace(queue.items.clone());
        debug!(id = %id, ttl_ms, "Notification enqueued");
        id
    }

    fn schedule_removal(&self, id: &str, ttl_ms: u64) -> Option<CancellationToken> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(id, "No async runtime, notification will not auto-dismiss");
                return None;
            }
        };

        let timer = self.shared.shutdown.child_token();
        let cancelled = timer.clone();
        let deadline = Instant::now() + Duration::from_millis(ttl_ms);
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let id = id.to_string();

        handle.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(shared) = shared.upgrade() {
                        if shared.remove(&id) {
                            debug!(id = %id, "Notification expired");
                        }
                    }
                }
            }
        });

        Some(timer)
    }

    /// Remove a notification and cancel its timer. Unknown ids are ignored.
    pub fn dismiss(&self, id: &str) -> bool {
        self.shared.remove(id)
    }

    /// Current notifications in display order.
    pub fn list(&self) -> Vec<Notification> {
        self.shared.queue().items.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.queue().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feed of the full ordered list, updated on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.shared.feed.subscribe()
    }

    /// Cancel every pending timer. Entries already queued stay until dismissed.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.queue().timers.clear();
        debug!("Notification center shut down");
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
