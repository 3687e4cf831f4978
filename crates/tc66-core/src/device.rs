//! TC66C connection over btleplug.
//!
//! This module provides the real Bluetooth implementation of [`GattLink`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tc66_types::WriteMode;

use crate::engine::DEFAULT_OPERATION_TIMEOUT;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::scan::{Discovery, get_adapter, wait_for_device};
use crate::traits::{CharacteristicRef, FragmentStream, GattLink};
use crate::util::{create_identifier, format_peripheral_id};

/// Default time to wait for the device to appear and accept a connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Default interval between checks for the device while waiting.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration for BLE connection timeouts.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tc66_core::device::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(60))
///     .discovery_timeout(Duration::from_secs(20))
///     .operation_timeout(Duration::from_secs(3));
/// assert_eq!(config.connection_timeout, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time allowed for the device to appear, and again for the link to come up.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// How often to look for the device while waiting for it to appear.
    pub poll_interval: Duration,
    /// Time allowed for each adapter call, property read and disconnect.
    pub operation_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the device poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the timeout for adapter calls and disconnects.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

/// Represents a connected TC66C meter.
///
/// # Note on Clone
///
/// This struct intentionally does not implement `Clone`. A `Device` represents
/// an active BLE connection. If you need to share it across tasks, wrap it in
/// `Arc<Device>`.
///
/// # Cleanup
///
/// You MUST call [`GattLink::disconnect`] before dropping the device to properly
/// release BLE resources. If a Device is dropped without calling disconnect,
/// a warning will be logged.
pub struct Device {
    /// Discovery session on the adapter the peripheral belongs to.
    discovery: Discovery,
    /// The underlying BLE peripheral.
    peripheral: Peripheral,
    /// Cached device name.
    name: Option<String>,
    /// Device address or identifier (MAC address on Linux/Windows, UUID on macOS).
    address: String,
    /// Primary services found during discovery.
    services: Vec<Uuid>,
    /// Discovered characteristics keyed by (service, characteristic).
    characteristics: HashMap<(Uuid, Uuid), Characteristic>,
    /// Bound on disconnect and connection checks.
    operation_timeout: Duration,
    /// Whether disconnect has been called (for Drop warning).
    disconnected: AtomicBool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

/// Run `fut` under a timeout.
async fn deadline<T, E, F>(fut: F, limit: Duration, operation: &str) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    match timeout(limit, fut).await {
        Ok(inner) => inner.map_err(Into::into),
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}

/// Race `fut` against a timeout and a cancellation token.
async fn bounded<T, E, F>(
    fut: F,
    limit: Duration,
    operation: &str,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = deadline(fut, limit, operation) => result,
    }
}

/// Best-effort teardown after a failed connect.
async fn release(discovery: &Discovery, peripheral: Option<&Peripheral>, limit: Duration) {
    if let Err(e) = deadline(discovery.stop(), limit, "stop discovery").await {
        debug!("Failed to stop discovery: {}", e);
    }
    if let Some(peripheral) = peripheral
        && let Ok(true) = deadline(peripheral.is_connected(), limit, "check connection").await
        && let Err(e) = deadline(peripheral.disconnect(), limit, "disconnect from device").await
    {
        debug!("Failed to drop half-open connection: {}", e);
    }
}

/// What service discovery learned about a freshly connected peripheral.
struct Discovered {
    name: Option<String>,
    address: String,
    services: Vec<Uuid>,
    characteristics: HashMap<(Uuid, Uuid), Characteristic>,
}

async fn establish(
    discovery: &Discovery,
    peripheral: &Peripheral,
    address: &str,
    config: &ConnectionConfig,
    cancel: &CancellationToken,
) -> Result<Discovered> {
    bounded(
        peripheral.connect(),
        config.connection_timeout,
        "connect to device",
        cancel,
    )
    .await
    .map_err(|e| match e {
        Error::Timeout { .. } => {
            Error::connection_failed(Some(address.to_string()), ConnectionFailureReason::Timeout)
        }
        other => other,
    })?;
    info!("Connected to {}", address);

    // Active discovery interferes with 2.4 GHz Wi-Fi on small hosts
    bounded(
        discovery.stop(),
        config.operation_timeout,
        "stop discovery",
        cancel,
    )
    .await?;

    debug!("Discovering services...");
    bounded(
        peripheral.discover_services(),
        config.discovery_timeout,
        "discover services",
        cancel,
    )
    .await
    .map_err(|e| match e {
        Error::Cancelled => Error::Cancelled,
        other => Error::connection_failed(
            Some(address.to_string()),
            ConnectionFailureReason::DiscoveryFailed(other.to_string()),
        ),
    })?;

    let mut services = Vec::new();
    let mut characteristics = HashMap::new();
    for service in peripheral.services() {
        debug!("  Service: {}", service.uuid);
        services.push(service.uuid);
        for char in service.characteristics {
            debug!("    Characteristic: {}", char.uuid);
            characteristics.insert((service.uuid, char.uuid), char);
        }
    }
    debug!(
        "Found {} services, {} characteristics",
        services.len(),
        characteristics.len()
    );

    let properties = bounded(
        peripheral.properties(),
        config.operation_timeout,
        "read device properties",
        cancel,
    )
    .await?;
    let name = properties.as_ref().and_then(|p| p.local_name.clone());

    // On macOS the address is zeroed, so fall back to the peripheral ID
    let address = properties
        .as_ref()
        .map(|p| create_identifier(&p.address.to_string(), &peripheral.id()))
        .unwrap_or_else(|| format_peripheral_id(&peripheral.id()));

    Ok(Discovered {
        name,
        address,
        services,
        characteristics,
    })
}

impl Device {
    /// Connect to a TC66C by Bluetooth address.
    ///
    /// Starts discovery, waits for the address to appear, connects, stops
    /// discovery and discovers services. Every step is raced against `cancel`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tc66_core::device::{ConnectionConfig, Device};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let cancel = CancellationToken::new();
    ///     let device =
    ///         Device::connect("AA:BB:CC:DD:EE:FF", ConnectionConfig::default(), &cancel).await?;
    ///     println!("Connected to {:?}", device);
    ///     Ok(())
    /// }
    /// ```
    #[tracing::instrument(level = "info", skip_all, fields(address = %address))]
    pub async fn connect(
        address: &str,
        config: ConnectionConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let unavailable = |e: Error| match e {
            Error::Timeout { .. } => Error::connection_failed(
                Some(address.to_string()),
                ConnectionFailureReason::AdapterUnavailable,
            ),
            other => other,
        };

        let adapter = bounded(
            get_adapter(),
            config.operation_timeout,
            "open Bluetooth adapter",
            cancel,
        )
        .await
        .map_err(unavailable)?;
        let discovery = Discovery::new(adapter);

        // Discovery is required to reliably connect
        bounded(
            discovery.start(),
            config.operation_timeout,
            "start discovery",
            cancel,
        )
        .await
        .map_err(unavailable)?;

        info!("Connecting to {}, this may take a while...", address);
        let peripheral = match wait_for_device(
            discovery.adapter(),
            address,
            config.connection_timeout,
            config.poll_interval,
            cancel,
        )
        .await
        {
            Ok(peripheral) => peripheral,
            Err(e) => {
                release(&discovery, None, config.operation_timeout).await;
                return Err(e);
            }
        };

        match establish(&discovery, &peripheral, address, &config, cancel).await {
            Ok(found) => Ok(Self {
                discovery,
                peripheral,
                name: found.name,
                address: found.address,
                services: found.services,
                characteristics: found.characteristics,
                operation_timeout: config.operation_timeout,
                disconnected: AtomicBool::new(false),
            }),
            Err(e) => {
                release(&discovery, Some(&peripheral), config.operation_timeout).await;
                Err(e)
            }
        }
    }

    fn cached(&self, characteristic: &CharacteristicRef) -> Result<&Characteristic> {
        self.characteristics
            .get(&(characteristic.service, characteristic.uuid))
            .ok_or_else(|| {
                Error::characteristic_not_found(
                    characteristic.uuid.to_string(),
                    characteristic.service.to_string(),
                )
            })
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if !self.disconnected.load(Ordering::SeqCst) {
            warn!(
                device_name = ?self.name,
                device_address = %self.address,
                "Device dropped without calling disconnect() - this may cause resource leaks. \
                 Call device.disconnect().await before dropping."
            );

            let peripheral = self.peripheral.clone();
            let address = self.address.clone();

            // The runtime may already be shutting down
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = peripheral.disconnect().await {
                        debug!(
                            device_address = %address,
                            error = %e,
                            "Best-effort disconnect failed (device may already be disconnected)"
                        );
                    }
                });
            }
        }
    }
}

#[async_trait]
impl GattLink for Device {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> bool {
        deadline(
            self.peripheral.is_connected(),
            self.operation_timeout,
            "check connection",
        )
        .await
        .unwrap_or(false)
    }

    async fn services(&self) -> Result<Vec<Uuid>> {
        Ok(self.services.clone())
    }

    async fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<CharacteristicRef> {
        if !self.services.contains(&service) {
            return Err(Error::service_not_found(
                service.to_string(),
                self.services.len(),
            ));
        }
        let handle = CharacteristicRef::new(service, uuid);
        self.cached(&handle)?;
        Ok(handle)
    }

    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let char = self.cached(characteristic)?;
        let write_type = match mode {
            WriteMode::Acknowledged => WriteType::WithResponse,
            WriteMode::Unacknowledged => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(char, data, write_type)
            .await
            .map_err(|e| Error::WriteFailed {
                uuid: characteristic.uuid.to_string(),
                reason: e.to_string(),
            })
    }

    async fn start_notifications(&self, characteristic: &CharacteristicRef) -> Result<()> {
        let char = self.cached(characteristic)?;
        self.peripheral.subscribe(char).await?;
        Ok(())
    }

    async fn stop_notifications(&self, characteristic: &CharacteristicRef) -> Result<()> {
        let char = self.cached(characteristic)?;
        self.peripheral.unsubscribe(char).await?;
        Ok(())
    }

    async fn fragments(&self, characteristic: &CharacteristicRef) -> Result<FragmentStream> {
        let uuid = characteristic.uuid;
        let stream = self.peripheral.notifications().await?;
        Ok(Box::pin(stream.filter_map(move |notification| {
            let value = (notification.uuid == uuid).then_some(notification.value);
            futures::future::ready(value)
        })))
    }

    #[tracing::instrument(level = "info", skip(self), fields(device_name = ?self.name))]
    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);

        let limit = self.operation_timeout;
        if let Err(e) = deadline(self.discovery.stop(), limit, "stop discovery").await {
            debug!("Failed to stop discovery: {}", e);
        }
        deadline(self.peripheral.disconnect(), limit, "disconnect from device").await?;
        info!("Disconnected from Bluetooth device {}", self.label());
        Ok(())
    }
}
