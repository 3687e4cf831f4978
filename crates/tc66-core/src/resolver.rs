//! Characteristic resolution.
//!
//! Works out which firmware generation a connected meter runs and resolves
//! the write and notify characteristics for it.

use tracing::{debug, info};

use tc66_types::uuid::TC66_SERVICE;
use tc66_types::{FirmwareVariant, WriteMode};

use crate::error::{Error, Result};
use crate::traits::{CharacteristicRef, GattLink};

/// Resolved endpoints for one connected meter.
///
/// Created once after connecting and reused for every request on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Device address the session belongs to.
    pub address: String,
    /// Detected firmware generation.
    pub variant: FirmwareVariant,
    /// Characteristic commands are written to.
    pub write: CharacteristicRef,
    /// Characteristic responses are notified on.
    pub notify: CharacteristicRef,
}

impl Session {
    /// Write mode for commands on this session.
    pub fn write_mode(&self) -> WriteMode {
        self.variant.write_mode()
    }
}

/// Resolve the command and response characteristics on `link`.
///
/// The caller is expected to bound this with a timeout.
///
/// # Errors
///
/// Returns [`Error::NotConnected`] if the link is down, and
/// [`Error::ServiceNotFound`] or [`Error::CharacteristicNotFound`] if the
/// device does not expose the layout of either known firmware.
#[tracing::instrument(level = "debug", skip_all, fields(device = %link.label()))]
pub async fn resolve<L: GattLink + ?Sized>(link: &L) -> Result<Session> {
    // Services are cached at connect time, so check the link itself
    if !link.is_connected().await {
        return Err(Error::NotConnected);
    }

    let services = link.services().await?;
    debug!("Device exposes {} primary services", services.len());

    if !services.contains(&TC66_SERVICE) {
        return Err(Error::service_not_found(
            TC66_SERVICE.to_string(),
            services.len(),
        ));
    }

    let variant = FirmwareVariant::detect(&services);
    debug!("Detected {}", variant);

    let notify = link
        .characteristic(variant.notify_service(), variant.notify_characteristic())
        .await?;
    let write = link
        .characteristic(variant.write_service(), variant.write_characteristic())
        .await?;

    info!(
        "Characteristics resolved on {} ({}, {} writes)",
        link.label(),
        variant,
        variant.write_mode()
    );

    Ok(Session {
        address: link.address().to_string(),
        variant,
        write,
        notify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDeviceBuilder;
    use tc66_types::uuids;

    #[tokio::test]
    async fn test_resolve_current_firmware() {
        let device = MockDeviceBuilder::new()
            .variant(FirmwareVariant::Current)
            .build();
        let session = resolve(&device).await.unwrap();

        assert_eq!(session.variant, FirmwareVariant::Current);
        assert_eq!(session.write_mode(), WriteMode::Unacknowledged);
        assert_eq!(session.notify.uuid, uuids::NOTIFY);
        assert_eq!(session.write.uuid, uuids::WRITE);
        assert_eq!(session.write.service, uuids::TC66_SERVICE);
        assert_eq!(session.address, device.address());
    }

    #[tokio::test]
    async fn test_resolve_legacy_firmware() {
        let device = MockDeviceBuilder::new()
            .variant(FirmwareVariant::Legacy)
            .build();
        let session = resolve(&device).await.unwrap();

        assert_eq!(session.variant, FirmwareVariant::Legacy);
        assert_eq!(session.write_mode(), WriteMode::Acknowledged);
        assert_eq!(session.notify.uuid, uuids::LEGACY_NOTIFY);
        assert_eq!(session.notify.service, uuids::TC66_SERVICE);
        assert_eq!(session.write.uuid, uuids::LEGACY_WRITE);
        assert_eq!(session.write.service, uuids::TC66_LEGACY_WRITE_SERVICE);
    }

    #[tokio::test]
    async fn test_resolve_missing_characteristic() {
        let device = MockDeviceBuilder::new()
            .without_characteristic(uuids::WRITE)
            .build();
        let err = resolve(&device).await.unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_resolve_missing_primary_service() {
        let device = MockDeviceBuilder::new().services(vec![]).build();
        let err = resolve(&device).await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_after_link_drop() {
        let device = MockDeviceBuilder::new().build();
        device.set_connected(false);

        let err = resolve(&device).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        device.set_connected(true);
        assert!(resolve(&device).await.is_ok());
    }
}
