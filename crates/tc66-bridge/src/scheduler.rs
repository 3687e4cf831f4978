//! Publish scheduling.
//!
//! Publishing a cycle's readings must not hold up the next device request,
//! but two batches must never be on the wire at the same time. The
//! [`PublishScheduler`] runs each batch on its own task and, before starting
//! a batch, waits for the previous one to finish.
//!
//! A failing batch logs its error, requests cancellation of the whole bridge
//! and reports the error again to whoever next waits on it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bus::{MessageBus, OutboundMessage, PublishError};

/// Serializes batches of outbound messages onto a [`MessageBus`].
pub struct PublishScheduler<B: MessageBus + 'static> {
    bus: Arc<B>,
    publish_timeout: Duration,
    cancel: CancellationToken,
    in_flight: Option<JoinHandle<Result<(), PublishError>>>,
    batches: u64,
}

impl<B: MessageBus + 'static> PublishScheduler<B> {
    /// Create a scheduler publishing to `bus`.
    ///
    /// Each publish is bounded by `publish_timeout`. `cancel` is triggered
    /// when a batch fails.
    pub fn new(bus: Arc<B>, publish_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            bus,
            publish_timeout,
            cancel,
            in_flight: None,
            batches: 0,
        }
    }

    /// Whether a batch is still being published.
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of batches started.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Start publishing `batch` in the background.
    ///
    /// Waits for the previous batch first. If that batch failed its error is
    /// returned and `batch` is not started.
    pub async fn submit(&mut self, batch: Vec<OutboundMessage>) -> Result<(), PublishError> {
        self.settle().await?;

        let bus = Arc::clone(&self.bus);
        let limit = self.publish_timeout;
        let cancel = self.cancel.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = publish_batch(bus.as_ref(), &batch, limit).await;
            if let Err(e) = &result {
                error!("{}", e);
                cancel.cancel();
            }
            result
        }));
        self.batches += 1;
        Ok(())
    }

    /// Wait for the in-flight batch, if any, and return its outcome.
    pub async fn drain(&mut self) -> Result<(), PublishError> {
        self.settle().await
    }

    async fn settle(&mut self) -> Result<(), PublishError> {
        match self.in_flight.take() {
            None => Ok(()),
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(PublishError::Aborted(e.to_string())),
            },
        }
    }
}

/// Publish each message in order, stopping at the first failure.
async fn publish_batch<B: MessageBus + ?Sized>(
    bus: &B,
    batch: &[OutboundMessage],
    limit: Duration,
) -> Result<(), PublishError> {
    for message in batch {
        let payload = message.payload();
        info!("{} {}", message.topic, payload);
        timeout(limit, bus.publish(&message.topic, &payload))
            .await
            .map_err(|_| PublishError::Timeout {
                topic: message.topic.clone(),
                duration: limit,
            })??;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::messages_for;
    use crate::mock::MockBus;
    use tc66_types::Reading;

    const LIMIT: Duration = Duration::from_secs(5);

    fn batch(volts: f64) -> Vec<OutboundMessage> {
        messages_for("tc66c", "test", &Reading::new(volts, 0.5, volts / 2.0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_publishes_in_order() {
        let bus = Arc::new(MockBus::new());
        let mut scheduler = PublishScheduler::new(Arc::clone(&bus), LIMIT, CancellationToken::new());

        scheduler.submit(batch(5.0)).await.unwrap();
        scheduler.drain().await.unwrap();

        let topics: Vec<_> = bus.messages().into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            topics,
            vec!["tc66c/test/voltage_V", "tc66c/test/current_A", "tc66c/test/power_W"]
        );
        assert_eq!(scheduler.batches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_does_not_wait_for_current_batch() {
        let bus = Arc::new(MockBus::new().with_latency(Duration::from_secs(1)));
        let mut scheduler = PublishScheduler::new(Arc::clone(&bus), LIMIT, CancellationToken::new());

        let started = tokio::time::Instant::now();
        scheduler.submit(batch(5.0)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(scheduler.is_busy());

        scheduler.drain().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert!(!scheduler.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_waits_for_previous_batch() {
        let bus = Arc::new(MockBus::new().with_latency(Duration::from_secs(1)));
        let mut scheduler = PublishScheduler::new(Arc::clone(&bus), LIMIT, CancellationToken::new());

        let started = tokio::time::Instant::now();
        scheduler.submit(batch(1.0)).await.unwrap();
        scheduler.submit(batch(2.0)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(3));

        scheduler.drain().await.unwrap();
        assert_eq!(bus.messages().len(), 6);
        assert_eq!(bus.max_concurrent(), 1);
        assert_eq!(bus.messages()[3].1, "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_cancels_and_is_reported() {
        let bus = Arc::new(MockBus::new().failing_after(1));
        let cancel = CancellationToken::new();
        let mut scheduler = PublishScheduler::new(Arc::clone(&bus), LIMIT, cancel.clone());

        scheduler.submit(batch(5.0)).await.unwrap();
        let err = scheduler.submit(batch(6.0)).await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected { .. }));
        assert!(cancel.is_cancelled());

        // The rejected batch was not started
        assert_eq!(scheduler.batches(), 1);
        assert_eq!(bus.messages().len(), 1);
        scheduler.drain().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_publish_times_out() {
        let bus = Arc::new(MockBus::new().with_latency(Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let mut scheduler = PublishScheduler::new(Arc::clone(&bus), LIMIT, cancel.clone());

        scheduler.submit(batch(5.0)).await.unwrap();
        let err = scheduler.drain().await.unwrap_err();
        match err {
            PublishError::Timeout { topic, duration } => {
                assert_eq!(topic, "tc66c/test/voltage_V");
                assert_eq!(duration, LIMIT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_without_batches() {
        let bus = Arc::new(MockBus::new());
        let mut scheduler = PublishScheduler::new(bus, LIMIT, CancellationToken::new());
        assert!(scheduler.drain().await.is_ok());
        assert!(!scheduler.is_busy());
    }
}
