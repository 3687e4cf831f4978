//! Trait abstractions for the GATT transport.
//!
//! This module provides the [`GattLink`] trait that abstracts over a real
//! Bluetooth connection and the simulated meter used in tests.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use tc66_types::WriteMode;

use crate::error::Result;

/// Stream of raw notification payloads from one characteristic.
///
/// Dropping the stream detaches the listener.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Handle to a characteristic resolved on a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    /// Owning primary service.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

impl CharacteristicRef {
    /// Create a new handle.
    pub const fn new(service: Uuid, uuid: Uuid) -> Self {
        Self { service, uuid }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

/// Connected GATT peer.
///
/// Implementors own the connection. Everything above this trait (resolution,
/// the request/response exchange, polling) is written against it so it runs
/// unchanged against [`crate::Device`] and [`crate::MockDevice`].
///
/// # Example
///
/// ```ignore
/// use tc66_core::{GattLink, Result};
///
/// async fn describe<L: GattLink>(link: &L) -> Result<()> {
///     let services = link.services().await?;
///     println!("{} exposes {} services", link.address(), services.len());
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait GattLink: Send + Sync {
    // --- Identity ---

    /// Advertised device name, if known.
    fn name(&self) -> Option<&str>;

    /// Device address or platform identifier.
    fn address(&self) -> &str;

    /// Check if the link is still up.
    async fn is_connected(&self) -> bool;

    // --- Discovery ---

    /// UUIDs of the primary services the device exposes.
    async fn services(&self) -> Result<Vec<Uuid>>;

    /// Look up a characteristic inside a primary service.
    ///
    /// Fails with [`crate::Error::ServiceNotFound`] or
    /// [`crate::Error::CharacteristicNotFound`].
    async fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<CharacteristicRef>;

    // --- I/O ---

    /// Write `data` to a characteristic.
    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()>;

    /// Enable notifications on a characteristic.
    async fn start_notifications(&self, characteristic: &CharacteristicRef) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn stop_notifications(&self, characteristic: &CharacteristicRef) -> Result<()>;

    /// Attach a listener for notification payloads from a characteristic.
    ///
    /// Only payloads delivered after this call are yielded.
    async fn fragments(&self, characteristic: &CharacteristicRef) -> Result<FragmentStream>;

    // --- Teardown ---

    /// Disconnect from the device.
    async fn disconnect(&self) -> Result<()>;

    /// Display label for logs: the name when known, else the address.
    fn label(&self) -> &str {
        self.name().unwrap_or_else(|| self.address())
    }
}

#[async_trait]
impl<T: GattLink + ?Sized> GattLink for Arc<T> {
    fn name(&self) -> Option<&str> {
        (**self).name()
    }

    fn address(&self) -> &str {
        (**self).address()
    }

    async fn is_connected(&self) -> bool {
        (**self).is_connected().await
    }

    async fn services(&self) -> Result<Vec<Uuid>> {
        (**self).services().await
    }

    async fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<CharacteristicRef> {
        (**self).characteristic(service, uuid).await
    }

    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        (**self).write(characteristic, data, mode).await
    }

    async fn start_notifications(&self, characteristic: &CharacteristicRef) -> Result<()> {
        (**self).start_notifications(characteristic).await
    }

    async fn stop_notifications(&self, characteristic: &CharacteristicRef) -> Result<()> {
        (**self).stop_notifications(characteristic).await
    }

    async fn fragments(&self, characteristic: &CharacteristicRef) -> Result<FragmentStream> {
        (**self).fragments(characteristic).await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }
}
