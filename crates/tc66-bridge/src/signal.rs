//! Stop request handling.
//!
//! The first SIGINT or SIGTERM cancels the bridge's token so the run can shut
//! down gracefully. A second one while shutdown is still in progress ends the
//! process at once.

use std::io;

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Exit code used when a second stop request forces the process to exit.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Stream yielding one item per stop request received by the process.
#[cfg(unix)]
pub fn stop_requests() -> io::Result<BoxStream<'static, ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let interrupt = signal(SignalKind::interrupt())?;
    let terminate = signal(SignalKind::terminate())?;

    Ok(futures::stream::unfold(
        (interrupt, terminate),
        |(mut interrupt, mut terminate)| async move {
            let received = tokio::select! {
                received = interrupt.recv() => received,
                received = terminate.recv() => received,
            };
            received.map(|()| ((), (interrupt, terminate)))
        },
    )
    .boxed())
}

/// Stream yielding one item per stop request received by the process.
#[cfg(not(unix))]
pub fn stop_requests() -> io::Result<BoxStream<'static, ()>> {
    Ok(futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
    .boxed())
}

/// Cancel `cancel` on the first request.
///
/// Returns `true` if a second request arrives afterwards, `false` if the
/// stream ends first.
pub async fn escalate<S>(mut requests: S, cancel: &CancellationToken) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    if requests.next().await.is_none() {
        return false;
    }
    warn!("Interrupt received; attempting to start graceful exit");
    cancel.cancel();

    requests.next().await.is_some()
}

/// Listen for stop requests in the background.
///
/// The first request cancels `cancel`. The second one exits the process with
/// [`FORCED_EXIT_CODE`].
pub fn install(cancel: CancellationToken) -> io::Result<JoinHandle<()>> {
    let requests = stop_requests()?;
    Ok(tokio::spawn(async move {
        if escalate(requests, &cancel).await {
            error!("Second interrupt received, exiting immediately");
            std::process::exit(FORCED_EXIT_CODE);
        }
    }))
}
