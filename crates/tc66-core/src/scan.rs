//! Adapter lookup and waiting for a device to appear.
//!
//! BlueZ will not reliably connect to a peripheral it has not seen advertise
//! during the current discovery session, so connecting always starts
//! discovery first and waits for the target address to show up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::util::{addresses_match, format_peripheral_id, is_zero_address};

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Discovery session on an adapter with tracked on/off state.
///
/// Starting an active session or stopping an inactive one is a no-op, so
/// shutdown paths can call [`stop`](Self::stop) unconditionally.
#[derive(Debug)]
pub struct Discovery {
    adapter: Adapter,
    active: AtomicBool,
}

impl Discovery {
    /// Wrap an adapter. Discovery is not started.
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            active: AtomicBool::new(false),
        }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Start discovery if it is not already running.
    pub async fn start(&self) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.adapter.start_scan(ScanFilter::default()).await {
            self.active.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        debug!("Bluetooth discovery started");
        Ok(())
    }

    /// Stop discovery if this session started it.
    pub async fn stop(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.adapter.stop_scan().await?;
        debug!("Bluetooth discovery stopped");
        Ok(())
    }
}

/// Wait until a peripheral with `address` is known to the adapter.
///
/// Discovery must already be running. The adapter's peripheral list is polled
/// every `poll_interval` until the device shows up, `timeout` elapses, or
/// `cancel` fires.
///
/// # Errors
///
/// Returns [`DeviceNotFoundReason::ScanTimeout`] on timeout and
/// [`Error::Cancelled`] on cancellation.
#[tracing::instrument(level = "info", skip(adapter, cancel), fields(timeout = ?timeout))]
pub async fn wait_for_device(
    adapter: &Adapter,
    address: &str,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Peripheral> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(peripheral) = find_peripheral_by_address(adapter, address).await? {
            info!("Device {} is in range", address);
            return Ok(peripheral);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                duration: timeout,
            }));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep(poll_interval.min(deadline - now)) => {}
        }
    }
}

/// Search through known peripherals to find one matching the address.
///
/// On macOS the platform identifier is matched instead of the (hidden) MAC.
async fn find_peripheral_by_address(
    adapter: &Adapter,
    address: &str,
) -> Result<Option<Peripheral>> {
    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        let peripheral_id = format_peripheral_id(&peripheral.id());
        if peripheral_id.eq_ignore_ascii_case(address) {
            debug!("Matched by peripheral ID: {}", peripheral_id);
            return Ok(Some(peripheral));
        }

        if let Ok(Some(props)) = peripheral.properties().await {
            let found = props.address.to_string();
            if !is_zero_address(&found) && addresses_match(&found, address) {
                debug!("Matched by address: {}", found);
                return Ok(Some(peripheral));
            }
        }
    }

    Ok(None)
}
