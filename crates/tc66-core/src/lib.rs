//! Core BLE library for TC66C USB power meters.
//!
//! This crate handles Bluetooth Low Energy (BLE) communication with the
//! RDTech TC66C: connecting, detecting the firmware generation, requesting a
//! measurement and turning the encrypted response into a [`Reading`].
//!
//! # Features
//!
//! - **Connection**: Wait for the meter to advertise, connect and discover its GATT layout
//! - **Firmware detection**: Handle both the current and the legacy (<= 1.14) layout
//! - **Framing**: Reassemble notification fragments into a 192-byte response frame
//! - **Decoding**: AES-256-ECB decryption and field extraction
//! - **Testing**: A scriptable [`MockDevice`] implementing the same [`GattLink`] trait
//!
//! # Platform Differences
//!
//! On Linux and Windows a meter is addressed by its Bluetooth MAC address
//! (e.g., `AA:BB:CC:DD:EE:FF`). On macOS CoreBluetooth hides the MAC and the
//! platform UUID is matched instead.
//!
//! # Quick Start
//!
//! ```no_run
//! use tc66_core::{ConnectionConfig, Device, RequestOptions, codec, request_measurement, resolve};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cancel = CancellationToken::new();
//!     let device = Device::connect("AA:BB:CC:DD:EE:FF", ConnectionConfig::default(), &cancel).await?;
//!
//!     let session = resolve(&device).await?;
//!     let frame = request_measurement(&device, &session, &RequestOptions::default(), &cancel).await?;
//!     println!("{}", codec::decode(&frame)?);
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod mock;
pub mod resolver;
pub mod scan;
pub mod traits;
pub mod util;

// Re-export types and uuid modules from tc66-types
pub use tc66_types::types;
pub use tc66_types::uuid;

// Core exports
pub use device::{ConnectionConfig, Device};
pub use engine::{RequestOptions, request_measurement};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, ErrorKind, Result};
pub use frame::{AssemblerState, FrameAssembler, FrameError};
pub use resolver::{Session, resolve};
pub use traits::{CharacteristicRef, FragmentStream, GattLink};

pub use mock::{MockDevice, MockDeviceBuilder, MockOperation, MockResponse, MockStats};
pub use util::{create_identifier, format_peripheral_id};

// Re-export from tc66-types
pub use tc66_types::uuid as uuids;
pub use tc66_types::{FRAME_LEN, FirmwareVariant, Frame, MEASUREMENT_COMMAND, Metric, Reading, WriteMode};
