//! Request/response exchange with the meter.
//!
//! One call to [`request_measurement`] performs a full exchange:
//!
//! 1. enable notifications on the response characteristic
//! 2. attach a fresh fragment listener
//! 3. write the measurement command
//! 4. assemble the response frame under a timeout
//! 5. detach the listener and disable notifications
//!
//! Step 5 runs on every path out of the exchange, including timeouts,
//! framing errors and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tc66_types::{Frame, MEASUREMENT_COMMAND};

use crate::error::{Error, Result};
use crate::frame::FrameAssembler;
use crate::resolver::Session;
use crate::traits::GattLink;

/// Default time allowed for the complete response to arrive.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for a single GATT operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeouts applied to a measurement request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Time from the command write until the last fragment arrives.
    pub response_timeout: Duration,
    /// Time allowed for each enable, write and disable operation.
    pub operation_timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl RequestOptions {
    /// Set the response timeout.
    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the per-operation timeout.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

/// Bound a GATT operation by a timeout and a cancellation token.
async fn guarded<T, F>(
    fut: F,
    limit: Duration,
    operation: &str,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = timeout(limit, fut) => result.unwrap_or_else(|_| Err(Error::timeout(operation, limit))),
    }
}

/// Request one measurement frame.
///
/// The returned frame is still encrypted; pass it to [`crate::codec::decode`].
///
/// # Errors
///
/// - [`Error::ResponseTimeout`] if the frame is not complete in time
/// - [`Error::Framing`] on overrun or if the listener closes early
/// - [`Error::Cancelled`] if `cancel` fires first
/// - transport errors from the link, including per-operation timeouts
///
/// If both the exchange and the cleanup fail, the exchange error is returned
/// and the cleanup error is logged.
#[tracing::instrument(level = "debug", skip_all, fields(device = %link.label()))]
pub async fn request_measurement<L: GattLink + ?Sized>(
    link: &L,
    session: &Session,
    options: &RequestOptions,
    cancel: &CancellationToken,
) -> Result<Frame> {
    let outcome = exchange(link, session, options, cancel).await;

    // Cleanup ignores the cancellation token: it must run during shutdown too
    let cleanup = timeout(
        options.operation_timeout,
        link.stop_notifications(&session.notify),
    )
    .await
    .unwrap_or_else(|_| {
        Err(Error::timeout(
            "stop notifications",
            options.operation_timeout,
        ))
    });

    match (outcome, cleanup) {
        (Ok(frame), Ok(())) => {
            debug!("Stopped listening for notifications from {}", link.label());
            Ok(frame)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            warn!(
                "Failed to stop notifications on {} after error: {}",
                link.label(),
                cleanup
            );
            Err(e)
        }
    }
}

async fn exchange<L: GattLink + ?Sized>(
    link: &L,
    session: &Session,
    options: &RequestOptions,
    cancel: &CancellationToken,
) -> Result<Frame> {
    guarded(
        link.start_notifications(&session.notify),
        options.operation_timeout,
        "start notifications",
        cancel,
    )
    .await?;
    debug!("Started listening for notifications from {}", link.label());

    // Attach before writing so no early fragment is missed
    let mut fragments = guarded(
        link.fragments(&session.notify),
        options.operation_timeout,
        "attach notification listener",
        cancel,
    )
    .await?;

    guarded(
        link.write(&session.write, MEASUREMENT_COMMAND, session.write_mode()),
        options.operation_timeout,
        "write measurement command",
        cancel,
    )
    .await?;
    debug!("Sent request for measurements to {}", link.label());

    let mut assembler = FrameAssembler::new();
    let waited = tokio::select! {
        _ = cancel.cancelled() => None,
        result = timeout(options.response_timeout, assembler.collect(&mut fragments)) => Some(result),
    };
    drop(fragments);

    match waited {
        None => Err(Error::Cancelled),
        Some(Ok(result)) => Ok(result?),
        Some(Err(_)) => Err(Error::ResponseTimeout {
            duration: options.response_timeout,
            received: assembler.received(),
        }),
    }
}
