//! Mock device implementation for testing.
//!
//! This module provides a simulated TC66C that can be used for unit testing
//! without requiring actual BLE hardware.
//!
//! The [`MockDevice`] implements the [`GattLink`] trait, allowing it to be
//! used interchangeably with a real [`crate::Device`] in generic code.
//!
//! # Features
//!
//! - **Firmware layouts**: Expose the GATT layout of either firmware generation
//! - **Scripted responses**: Choose how each measurement response is fragmented,
//!   truncated, overrun or withheld
//! - **Failure injection**: Make specific GATT operations fail
//! - **Latency simulation**: Delay GATT operations, responses and disconnects
//! - **Observability**: Count notification toggles, listener attach/detach and
//!   command writes so cleanup guarantees can be asserted

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use tc66_types::{FRAME_LEN, FirmwareVariant, Frame, MEASUREMENT_COMMAND, Reading, WriteMode};

use crate::codec;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::traits::{CharacteristicRef, FragmentStream, GattLink};

/// How the mock answers one measurement command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Send the encoded reading in fragments of `chunk` bytes.
    Chunked {
        /// Fragment size.
        chunk: usize,
    },
    /// Send only the first `bytes` of the encoded reading, then stay silent.
    Truncated {
        /// Bytes to send.
        bytes: usize,
        /// Fragment size.
        chunk: usize,
    },
    /// Send the encoded reading followed by `extra` stray bytes.
    Overrun {
        /// Extra bytes after the frame.
        extra: usize,
        /// Fragment size.
        chunk: usize,
    },
    /// Send these fragments verbatim.
    Raw(Vec<Vec<u8>>),
    /// Never answer.
    Silent,
}

impl Default for MockResponse {
    fn default() -> Self {
        // 20 bytes is the payload of a notification at the default ATT MTU
        Self::Chunked { chunk: 20 }
    }
}

impl MockResponse {
    fn fragments(&self, frame: &Frame) -> Vec<Vec<u8>> {
        fn chunked(data: &[u8], chunk: usize) -> Vec<Vec<u8>> {
            data.chunks(chunk.max(1)).map(<[u8]>::to_vec).collect()
        }

        match self {
            Self::Chunked { chunk } => chunked(frame.as_bytes(), *chunk),
            Self::Truncated { bytes, chunk } => {
                chunked(&frame.as_bytes()[..(*bytes).min(FRAME_LEN)], *chunk)
            }
            Self::Overrun { extra, chunk } => {
                let mut data = frame.as_bytes().to_vec();
                data.resize(FRAME_LEN + extra, 0);
                chunked(&data, *chunk)
            }
            Self::Raw(fragments) => fragments.clone(),
            Self::Silent => Vec::new(),
        }
    }
}

/// GATT operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    /// Service enumeration.
    Services,
    /// Enabling notifications.
    StartNotifications,
    /// Disabling notifications.
    StopNotifications,
    /// Attaching a fragment listener.
    Fragments,
    /// Any characteristic write.
    Write,
    /// Disconnecting.
    Disconnect,
}

/// Snapshot of the mock's operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MockStats {
    /// Successful notification enables.
    pub notifications_started: u32,
    /// Notification disable attempts.
    pub notifications_stopped: u32,
    /// Fragment listeners handed out.
    pub listeners_attached: u32,
    /// Fragment listeners dropped.
    pub listeners_detached: u32,
    /// Successful writes of any payload.
    pub writes: u32,
    /// Writes of the measurement command.
    pub commands: u32,
    /// Disconnect calls.
    pub disconnects: u32,
}

#[derive(Debug, Default)]
struct Counters {
    notifications_started: AtomicU32,
    notifications_stopped: AtomicU32,
    listeners_attached: AtomicU32,
    listeners_detached: AtomicU32,
    writes: AtomicU32,
    commands: AtomicU32,
    disconnects: AtomicU32,
}

/// State shared with response tasks and listeners.
#[derive(Debug, Default)]
struct Shared {
    notifying: AtomicBool,
    listeners: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    counters: Counters,
}

impl Shared {
    fn listeners(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Vec<u8>>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Notify every live listener. Fragments sent while notifications are
    /// disabled are lost, as on a real peripheral.
    fn deliver(&self, fragment: Vec<u8>) {
        if !self.notifying.load(Ordering::SeqCst) {
            return;
        }
        self.listeners()
            .retain(|tx| tx.send(fragment.clone()).is_ok());
    }
}

/// Fragment listener handed out by [`MockDevice`]. Counts its own detach.
struct Listener {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
}

impl Stream for Listener {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shared
            .counters
            .listeners_detached
            .fetch_add(1, Ordering::SeqCst);
    }
}

/// A simulated TC66C meter for testing.
///
/// Implements [`GattLink`] for use in generic code and testing.
///
/// # Example
///
/// ```
/// use tc66_core::{MockDeviceBuilder, RequestOptions, codec, request_measurement, resolve};
/// use tc66_types::Reading;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let device = MockDeviceBuilder::new()
///         .reading(Reading::new(5.0, 0.5, 2.5))
///         .build();
///
///     let session = resolve(&device).await.unwrap();
///     let cancel = CancellationToken::new();
///     let frame = request_measurement(&device, &session, &RequestOptions::default(), &cancel)
///         .await
///         .unwrap();
///     assert_eq!(codec::decode(&frame).unwrap().voltage, 5.0);
/// }
/// ```
pub struct MockDevice {
    name: String,
    address: String,
    variant: FirmwareVariant,
    services: Vec<Uuid>,
    characteristics: Vec<CharacteristicRef>,
    connected: AtomicBool,
    reading: RwLock<Reading>,
    script: RwLock<VecDeque<MockResponse>>,
    default_response: MockResponse,
    failures: Mutex<HashSet<MockOperation>>,
    /// Simulated GATT operation latency in milliseconds (0 = no delay).
    operation_latency_ms: AtomicU64,
    /// Simulated delay before the first response fragment in milliseconds.
    response_latency_ms: AtomicU64,
    disconnect_latency: Duration,
    last_write_mode: Mutex<Option<WriteMode>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("variant", &self.variant)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockDevice {
    /// Create a connected mock with default values.
    pub fn new(name: &str, variant: FirmwareVariant) -> Self {
        MockDeviceBuilder::new().name(name).variant(variant).build()
    }

    /// Firmware generation this mock simulates.
    pub fn variant(&self) -> FirmwareVariant {
        self.variant
    }

    /// Change the reading reported by subsequent responses.
    pub async fn set_reading(&self, reading: Reading) {
        *self.reading.write().await = reading;
    }

    /// Queue a response for the next measurement command.
    ///
    /// Queued responses are used in order; once the queue is empty the
    /// default response is used.
    pub async fn push_response(&self, response: MockResponse) {
        self.script.write().await.push_back(response);
    }

    /// Make `operation` fail (or succeed again).
    pub fn set_fail_on(&self, operation: MockOperation, fail: bool) {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if fail {
            failures.insert(operation);
        } else {
            failures.remove(&operation);
        }
    }

    /// Set simulated latency for notification toggles and writes.
    ///
    /// Set to `Duration::ZERO` to disable latency simulation.
    pub fn set_operation_latency(&self, latency: Duration) {
        self.operation_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Set simulated delay between a command write and its first fragment.
    pub fn set_response_latency(&self, latency: Duration) {
        self.response_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Simulate the link dropping (or coming back).
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Whether notifications are currently enabled.
    pub fn is_notifying(&self) -> bool {
        self.shared.notifying.load(Ordering::SeqCst)
    }

    /// Write mode of the most recent write.
    pub fn last_write_mode(&self) -> Option<WriteMode> {
        *self
            .last_write_mode
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> MockStats {
        let c = &self.shared.counters;
        MockStats {
            notifications_started: c.notifications_started.load(Ordering::SeqCst),
            notifications_stopped: c.notifications_stopped.load(Ordering::SeqCst),
            listeners_attached: c.listeners_attached.load(Ordering::SeqCst),
            listeners_detached: c.listeners_detached.load(Ordering::SeqCst),
            writes: c.writes.load(Ordering::SeqCst),
            commands: c.commands.load(Ordering::SeqCst),
            disconnects: c.disconnects.load(Ordering::SeqCst),
        }
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn check_failure(&self, operation: MockOperation) -> Result<()> {
        let failing = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&operation);
        if failing {
            Err(Error::connection_failed(
                Some(self.address.clone()),
                ConnectionFailureReason::BleError(format!("injected {:?} failure", operation)),
            ))
        } else {
            Ok(())
        }
    }

    async fn simulate_latency(&self) {
        let latency = self.operation_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn check_characteristic(&self, characteristic: &CharacteristicRef) -> Result<()> {
        if self.characteristics.contains(characteristic) {
            Ok(())
        } else {
            Err(Error::characteristic_not_found(
                characteristic.uuid.to_string(),
                characteristic.service.to_string(),
            ))
        }
    }

    async fn respond(&self) {
        let response = self
            .script
            .write()
            .await
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone());
        let frame = codec::encode(&*self.reading.read().await);
        let fragments = response.fragments(&frame);
        let latency = Duration::from_millis(self.response_latency_ms.load(Ordering::Relaxed));
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            for fragment in fragments {
                shared.deliver(fragment);
                tokio::task::yield_now().await;
            }
        });
    }
}

#[async_trait]
impl GattLink for MockDevice {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn services(&self) -> Result<Vec<Uuid>> {
        self.check_connected()?;
        self.check_failure(MockOperation::Services)?;
        Ok(self.services.clone())
    }

    async fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<CharacteristicRef> {
        self.check_connected()?;
        if !self.services.contains(&service) {
            return Err(Error::service_not_found(
                service.to_string(),
                self.services.len(),
            ));
        }
        let handle = CharacteristicRef::new(service, uuid);
        self.check_characteristic(&handle)?;
        Ok(handle)
    }

    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        self.check_connected()?;
        self.simulate_latency().await;
        if self.check_failure(MockOperation::Write).is_err() {
            return Err(Error::WriteFailed {
                uuid: characteristic.uuid.to_string(),
                reason: "injected Write failure".to_string(),
            });
        }
        self.check_characteristic(characteristic)?;

        self.shared.counters.writes.fetch_add(1, Ordering::SeqCst);
        *self
            .last_write_mode
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(mode);

        if data == MEASUREMENT_COMMAND {
            self.shared.counters.commands.fetch_add(1, Ordering::SeqCst);
            self.respond().await;
        }
        Ok(())
    }

    async fn start_notifications(&self, characteristic: &CharacteristicRef) -> Result<()> {
        self.check_connected()?;
        self.simulate_latency().await;
        self.check_failure(MockOperation::StartNotifications)?;
        self.check_characteristic(characteristic)?;
        self.shared.notifying.store(true, Ordering::SeqCst);
        self.shared
            .counters
            .notifications_started
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_notifications(&self, characteristic: &CharacteristicRef) -> Result<()> {
        self.shared
            .counters
            .notifications_stopped
            .fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        self.simulate_latency().await;
        self.check_failure(MockOperation::StopNotifications)?;
        self.check_characteristic(characteristic)?;
        self.shared.notifying.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fragments(&self, characteristic: &CharacteristicRef) -> Result<FragmentStream> {
        self.check_connected()?;
        self.check_failure(MockOperation::Fragments)?;
        self.check_characteristic(characteristic)?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners().push(tx);
        self.shared
            .counters
            .listeners_attached
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(Listener {
            rx,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared
            .counters
            .disconnects
            .fetch_add(1, Ordering::SeqCst);
        if !self.disconnect_latency.is_zero() {
            tokio::time::sleep(self.disconnect_latency).await;
        }
        self.check_failure(MockOperation::Disconnect)?;
        self.connected.store(false, Ordering::SeqCst);
        self.shared.notifying.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Builder for creating mock devices with custom settings.
#[derive(Debug, Clone)]
pub struct MockDeviceBuilder {
    name: String,
    address: Option<String>,
    variant: FirmwareVariant,
    services: Option<Vec<Uuid>>,
    missing: Vec<Uuid>,
    reading: Reading,
    script: Vec<MockResponse>,
    default_response: MockResponse,
    failures: Vec<MockOperation>,
    operation_latency: Duration,
    response_latency: Duration,
    disconnect_latency: Duration,
    auto_connect: bool,
}

impl Default for MockDeviceBuilder {
    fn default() -> Self {
        Self {
            name: "TC66C".to_string(),
            address: None,
            variant: FirmwareVariant::Current,
            services: None,
            missing: Vec::new(),
            reading: Reading::new(5.0832, 0.43561, 2.2143),
            script: Vec::new(),
            default_response: MockResponse::default(),
            failures: Vec::new(),
            operation_latency: Duration::ZERO,
            response_latency: Duration::from_millis(50),
            disconnect_latency: Duration::ZERO,
            auto_connect: true,
        }
    }
}

impl MockDeviceBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the device address.
    #[must_use]
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Set the firmware generation.
    #[must_use]
    pub fn variant(mut self, variant: FirmwareVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Override the advertised primary services.
    #[must_use]
    pub fn services(mut self, services: Vec<Uuid>) -> Self {
        self.services = Some(services);
        self
    }

    /// Remove a characteristic from the GATT layout.
    #[must_use]
    pub fn without_characteristic(mut self, uuid: Uuid) -> Self {
        self.missing.push(uuid);
        self
    }

    /// Set the reading reported in responses.
    #[must_use]
    pub fn reading(mut self, reading: Reading) -> Self {
        self.reading = reading;
        self
    }

    /// Queue a response for the next unanswered command.
    #[must_use]
    pub fn response(mut self, response: MockResponse) -> Self {
        self.script.push(response);
        self
    }

    /// Response used once the queue is empty.
    #[must_use]
    pub fn default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Make an operation fail.
    #[must_use]
    pub fn fail_on(mut self, operation: MockOperation) -> Self {
        self.failures.push(operation);
        self
    }

    /// Delay notification toggles and writes.
    #[must_use]
    pub fn operation_latency(mut self, latency: Duration) -> Self {
        self.operation_latency = latency;
        self
    }

    /// Delay between command write and first response fragment.
    #[must_use]
    pub fn response_latency(mut self, latency: Duration) -> Self {
        self.response_latency = latency;
        self
    }

    /// Delay disconnects.
    #[must_use]
    pub fn disconnect_latency(mut self, latency: Duration) -> Self {
        self.disconnect_latency = latency;
        self
    }

    /// Set whether the device starts connected.
    #[must_use]
    pub fn auto_connect(mut self, auto: bool) -> Self {
        self.auto_connect = auto;
        self
    }

    /// Build the mock device.
    #[must_use]
    pub fn build(self) -> MockDevice {
        let variant = self.variant;
        let services = self.services.unwrap_or_else(|| {
            let mut services = vec![variant.notify_service()];
            if variant.write_service() != variant.notify_service() {
                services.push(variant.write_service());
            }
            services
        });
        let characteristics = [
            CharacteristicRef::new(variant.notify_service(), variant.notify_characteristic()),
            CharacteristicRef::new(variant.write_service(), variant.write_characteristic()),
        ]
        .into_iter()
        .filter(|c| !self.missing.contains(&c.uuid))
        .collect();

        let address = self.address.unwrap_or_else(|| {
            let tail: [u8; 4] = rand::random();
            format!(
                "02:00:{:02X}:{:02X}:{:02X}:{:02X}",
                tail[0], tail[1], tail[2], tail[3]
            )
        });

        MockDevice {
            name: self.name,
            address,
            variant,
            services,
            characteristics,
            connected: AtomicBool::new(self.auto_connect),
            reading: RwLock::new(self.reading),
            script: RwLock::new(self.script.into()),
            default_response: self.default_response,
            failures: Mutex::new(self.failures.into_iter().collect()),
            operation_latency_ms: AtomicU64::new(self.operation_latency.as_millis() as u64),
            response_latency_ms: AtomicU64::new(self.response_latency.as_millis() as u64),
            disconnect_latency: self.disconnect_latency,
            last_write_mode: Mutex::new(None),
            shared: Arc::new(Shared::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tc66_types::uuids;

    fn notify_ref(device: &MockDevice) -> CharacteristicRef {
        let v = device.variant();
        CharacteristicRef::new(v.notify_service(), v.notify_characteristic())
    }

    fn write_ref(device: &MockDevice) -> CharacteristicRef {
        let v = device.variant();
        CharacteristicRef::new(v.write_service(), v.write_characteristic())
    }

    #[tokio::test]
    async fn test_mock_device_layout_current() {
        let device = MockDevice::new("Test", FirmwareVariant::Current);
        assert_eq!(device.services().await.unwrap(), vec![uuids::TC66_SERVICE]);
        assert!(
            device
                .characteristic(uuids::TC66_SERVICE, uuids::WRITE)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_mock_device_layout_legacy() {
        let device = MockDevice::new("Test", FirmwareVariant::Legacy);
        let services = device.services().await.unwrap();
        assert!(services.contains(&uuids::TC66_LEGACY_WRITE_SERVICE));
        assert!(
            device
                .characteristic(uuids::TC66_LEGACY_WRITE_SERVICE, uuids::LEGACY_WRITE)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_mock_device_not_connected() {
        let device = MockDeviceBuilder::new().auto_connect(false).build();
        assert!(!device.is_connected().await);
        assert!(matches!(
            device.services().await.unwrap_err(),
            Error::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_mock_device_disconnect() {
        let device = MockDevice::new("Test", FirmwareVariant::Current);
        device.disconnect().await.unwrap();
        assert!(!device.is_connected().await);
        assert_eq!(device.stats().disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_device_answers_command() {
        let reading = Reading::new(9.0, 1.5, 13.5);
        let device = MockDeviceBuilder::new().reading(reading).build();
        let notify = notify_ref(&device);

        device.start_notifications(&notify).await.unwrap();
        let mut stream = device.fragments(&notify).await.unwrap();
        device
            .write(&write_ref(&device), MEASUREMENT_COMMAND, WriteMode::Unacknowledged)
            .await
            .unwrap();

        let mut data = Vec::new();
        while data.len() < FRAME_LEN {
            let fragment = stream.next().await.unwrap();
            assert!(fragment.len() <= 20);
            data.extend(fragment);
        }
        assert_eq!(codec::decode_bytes(&data).unwrap(), reading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_device_silent_without_notifications() {
        let device = MockDeviceBuilder::new()
            .response_latency(Duration::ZERO)
            .build();
        let notify = notify_ref(&device);

        let mut stream = device.fragments(&notify).await.unwrap();
        device
            .write(&write_ref(&device), MEASUREMENT_COMMAND, WriteMode::Unacknowledged)
            .await
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_mock_device_listener_detach_counted() {
        let device = MockDevice::new("Test", FirmwareVariant::Current);
        let notify = notify_ref(&device);

        let stream = device.fragments(&notify).await.unwrap();
        assert_eq!(device.stats().listeners_attached, 1);
        assert_eq!(device.stats().listeners_detached, 0);
        drop(stream);
        assert_eq!(device.stats().listeners_detached, 1);
    }

    #[tokio::test]
    async fn test_mock_device_fail_on() {
        let device = MockDeviceBuilder::new()
            .fail_on(MockOperation::StartNotifications)
            .build();
        let notify = notify_ref(&device);
        assert!(device.start_notifications(&notify).await.is_err());

        device.set_fail_on(MockOperation::StartNotifications, false);
        assert!(device.start_notifications(&notify).await.is_ok());
        assert!(device.is_notifying());
    }

    #[tokio::test]
    async fn test_mock_device_write_failure() {
        let device = MockDeviceBuilder::new()
            .fail_on(MockOperation::Write)
            .build();
        let err = device
            .write(&write_ref(&device), b"x", WriteMode::Unacknowledged)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WriteFailed { .. }));
        assert_eq!(device.stats().writes, 0);
    }

    #[test]
    fn test_response_fragments() {
        let frame = codec::encode(&Reading::default());

        let chunks = MockResponse::Chunked { chunk: 50 }.fragments(&frame);
        assert_eq!(
            chunks.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![50, 50, 50, 42]
        );

        let truncated = MockResponse::Truncated {
            bytes: 30,
            chunk: 20,
        }
        .fragments(&frame);
        assert_eq!(truncated.iter().map(Vec::len).sum::<usize>(), 30);

        let overrun = MockResponse::Overrun { extra: 4, chunk: 64 }.fragments(&frame);
        assert_eq!(overrun.iter().map(Vec::len).sum::<usize>(), 196);

        assert!(MockResponse::Silent.fragments(&frame).is_empty());
    }

    #[test]
    fn test_builder_defaults() {
        let device = MockDeviceBuilder::new().build();
        assert_eq!(device.name(), Some("TC66C"));
        assert_eq!(device.variant(), FirmwareVariant::Current);
        assert!(device.address().starts_with("02:00:"));
        assert_eq!(device.stats(), MockStats::default());
    }

    #[test]
    fn test_builder_address() {
        let device = MockDeviceBuilder::new().address("AA:BB:CC:DD:EE:FF").build();
        assert_eq!(device.address(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.label(), "TC66C");
    }
}
