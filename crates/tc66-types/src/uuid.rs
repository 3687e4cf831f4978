//! Bluetooth UUIDs for TC66C meters.
//!
//! The meter exposes a vendor serial-over-GATT service. Firmware up to v1.14
//! splits the write and notify endpoints across two primary services; firmware
//! v1.15 and newer keeps both under a single service.

use uuid::{Uuid, uuid};

// --- Primary service UUIDs ---

/// Primary service present on every firmware revision.
///
/// Hosts the notify characteristic on all firmware, and the write
/// characteristic on firmware v1.15 and newer.
pub const TC66_SERVICE: Uuid = uuid!("0000ffe0-0000-1000-8000-00805f9b34fb");

/// Secondary service only advertised by firmware v1.14 and older.
///
/// Its presence is the only signal used to tell the two firmware generations apart.
pub const TC66_LEGACY_WRITE_SERVICE: Uuid = uuid!("0000ffe5-0000-1000-8000-00805f9b34fb");

// --- Characteristic UUIDs (firmware >= 1.15) ---

/// Notify characteristic carrying response fragments.
pub const NOTIFY: Uuid = uuid!("0000ffe1-0000-1000-8000-00805f9b34fb");

/// Write characteristic accepting commands (write-without-response).
pub const WRITE: Uuid = uuid!("0000ffe2-0000-1000-8000-00805f9b34fb");

// --- Characteristic UUIDs (firmware <= 1.14) ---

/// Notify characteristic on legacy firmware (under [`TC66_SERVICE`]).
pub const LEGACY_NOTIFY: Uuid = uuid!("0000ffe4-0000-1000-8000-00805f9b34fb");

/// Write characteristic on legacy firmware (under [`TC66_LEGACY_WRITE_SERVICE`]).
pub const LEGACY_WRITE: Uuid = uuid!("0000ffe9-0000-1000-8000-00805f9b34fb");
