//! Platform-agnostic types for TC66C USB power meters.
//!
//! This crate provides the protocol vocabulary shared by the BLE side
//! (tc66-core) and the publishing side (tc66-bridge).
//!
//! # Features
//!
//! - Fixed-size measurement [`Frame`] and decoded [`Reading`]
//! - [`Metric`] offsets, scaling and topic naming
//! - Firmware variant detection and the GATT layout each variant uses
//! - UUID constants for BLE services and characteristics
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use tc66_types::{FRAME_LEN, Metric, Reading};
//!
//! let mut plaintext = [0u8; FRAME_LEN];
//! plaintext[48..52].copy_from_slice(&3000i32.to_le_bytes());
//!
//! let reading = Reading::from_plaintext(&plaintext).unwrap();
//! assert_eq!(reading.get(Metric::Voltage), 0.3);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::ParseError;
pub use types::{
    FRAME_LEN, FirmwareVariant, Frame, MEASUREMENT_COMMAND, Metric, Reading, WriteMode,
};
pub use uuid as uuids;


/// Property-based tests for frame parsing.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any 192-byte buffer decodes to some reading without panicking.
        #[test]
        fn reading_from_any_plaintext_never_panics(data in proptest::collection::vec(any::<u8>(), FRAME_LEN)) {
            prop_assert!(Reading::from_plaintext(&data).is_ok());
        }

        /// Any other length is rejected.
        #[test]
        fn reading_rejects_other_lengths(data in proptest::collection::vec(any::<u8>(), 0..400)) {
            prop_assume!(data.len() != FRAME_LEN);
            prop_assert!(Reading::from_plaintext(&data).is_err());
            prop_assert!(Frame::from_slice(&data).is_err());
        }

        /// Raw field values survive a write/parse cycle exactly.
        #[test]
        fn raw_fields_roundtrip(v in any::<i32>(), c in any::<i32>(), p in any::<i32>()) {
            let mut plaintext = [0u8; FRAME_LEN];
            plaintext[48..52].copy_from_slice(&v.to_le_bytes());
            plaintext[52..56].copy_from_slice(&c.to_le_bytes());
            plaintext[56..60].copy_from_slice(&p.to_le_bytes());

            let reading = Reading::from_plaintext(&plaintext).unwrap();
            prop_assert_eq!(Metric::Voltage.unscale(reading.voltage), v);
            prop_assert_eq!(Metric::Current.unscale(reading.current), c);
            prop_assert_eq!(Metric::Power.unscale(reading.power), p);
        }
    }
}
