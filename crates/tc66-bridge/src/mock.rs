//! In-memory message bus for testing.
//!
//! [`MockBus`] implements [`MessageBus`] without a broker. It records every
//! publish, can delay publishes, can start failing after a number of
//! successful publishes, can hold publishes during a simulated outage and
//! tracks how many publishes overlap.

use std::future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::bus::{MessageBus, PublishError};

/// A recording [`MessageBus`].
///
/// # Example
///
/// ```
/// use tc66_bridge::{MessageBus, MockBus};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = MockBus::new();
/// bus.publish("tc66c/bench/voltage_V", "5.1").await.unwrap();
/// assert_eq!(bus.messages(), vec![("tc66c/bench/voltage_V".to_string(), "5.1".to_string())]);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockBus {
    published: Mutex<Vec<(String, String)>>,
    /// Simulated publish latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    /// Publishes that succeed before every later one fails.
    fail_after: Option<usize>,
    attempts: AtomicUsize,
    active: AtomicU32,
    max_active: AtomicU32,
    disconnects: AtomicU32,
    fail_disconnect: AtomicBool,
    hang_disconnect: AtomicBool,
    /// Publishes wait while set, like a client queueing during a reconnect.
    offline: AtomicBool,
    restored: Notify,
}

impl MockBus {
    /// Create a bus that accepts every publish immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every publish by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Accept `count` publishes, then reject all later ones.
    #[must_use]
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Make [`MessageBus::disconnect`] fail.
    #[must_use]
    pub fn failing_disconnect(self) -> Self {
        self.fail_disconnect.store(true, Ordering::Relaxed);
        self
    }

    /// Make [`MessageBus::disconnect`] never complete.
    #[must_use]
    pub fn hanging_disconnect(self) -> Self {
        self.hang_disconnect.store(true, Ordering::Relaxed);
        self
    }

    /// Start with the broker unreachable. See [`MockBus::set_online`].
    #[must_use]
    pub fn offline(self) -> Self {
        self.set_online(false);
        self
    }

    /// Take the broker down or bring it back.
    ///
    /// While offline, publishes are held and complete once the broker is
    /// back.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
        if online {
            self.restored.notify_waiters();
        }
    }

    /// Change the publish latency.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Recorded `(topic, payload)` pairs in publish order.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Highest number of publishes that were in progress at once.
    pub fn max_concurrent(&self) -> u32 {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Number of disconnect calls.
    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// Tracks one in-progress publish, including publishes dropped by a timeout.
struct Active<'a>(&'a AtomicU32);

impl<'a> Active<'a> {
    fn enter(active: &'a AtomicU32, max: &AtomicU32) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for MockBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let _active = Active::enter(&self.active, &self.max_active);

        loop {
            let restored = self.restored.notified();
            if !self.offline.load(Ordering::SeqCst) {
                break;
            }
            restored.await;
        }

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| attempt >= limit) {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PublishError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.hang_disconnect.load(Ordering::Relaxed) {
            future::pending::<()>().await;
        }
        if self.fail_disconnect.load(Ordering::Relaxed) {
            Err(PublishError::Disconnected)
        } else {
            Ok(())
        }
    }
}
