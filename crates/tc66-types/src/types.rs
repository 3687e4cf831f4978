//! Core types for TC66C measurement data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::uuid as uuids;

/// Length of one measurement response, encrypted or decrypted.
pub const FRAME_LEN: usize = 192;

/// ASCII command that asks the meter for one measurement frame.
pub const MEASUREMENT_COMMAND: &[u8; 8] = b"bgetva\r\n";

/// One complete response from the meter.
///
/// A frame is always exactly [`FRAME_LEN`] bytes. It holds ciphertext when it
/// comes off the radio and plaintext after decryption.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Wrap an owned 192-byte buffer.
    pub const fn new(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a frame out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidLength`] unless `data` is exactly
    /// [`FRAME_LEN`] bytes long.
    pub fn from_slice(data: &[u8]) -> Result<Self, ParseError> {
        let bytes: [u8; FRAME_LEN] =
            data.try_into().map_err(|_| ParseError::InvalidLength {
                expected: FRAME_LEN,
                actual: data.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Raw frame contents.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Mutable access for in-place transforms.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.0
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self([0u8; FRAME_LEN])
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 192 bytes of hex is noise in logs; the head is enough to eyeball
        write!(f, "Frame({:02x?}..)", &self.0[..8])
    }
}

/// A measured quantity carried in each frame.
///
/// Variants are listed in publish order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Metric {
    /// Bus voltage in volts.
    Voltage,
    /// Load current in amperes.
    Current,
    /// Load power in watts.
    Power,
}

impl Metric {
    /// All metrics, in the order they are published each cycle.
    pub const ALL: [Metric; 3] = [Metric::Voltage, Metric::Current, Metric::Power];

    /// Byte offset of the little-endian i32 field in the decrypted frame.
    pub const fn offset(self) -> usize {
        match self {
            Metric::Voltage => 48,
            Metric::Current => 52,
            Metric::Power => 56,
        }
    }

    /// Divisor turning the raw integer into the SI value.
    pub const fn divisor(self) -> f64 {
        match self {
            Metric::Voltage => 10_000.0,
            Metric::Current => 100_000.0,
            Metric::Power => 10_000.0,
        }
    }

    /// Last topic segment used when publishing this metric.
    pub const fn topic_suffix(self) -> &'static str {
        match self {
            Metric::Voltage => "voltage_V",
            Metric::Current => "current_A",
            Metric::Power => "power_W",
        }
    }

    /// Convert a raw field value to the scaled measurement.
    pub fn scale(self, raw: i32) -> f64 {
        f64::from(raw) / self.divisor()
    }

    /// Convert a scaled measurement back to the raw field value.
    ///
    /// Values outside the i32 range saturate.
    pub fn unscale(self, value: f64) -> i32 {
        (value * self.divisor()).round() as i32
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Voltage => write!(f, "voltage"),
            Metric::Current => write!(f, "current"),
            Metric::Power => write!(f, "power"),
        }
    }
}

/// Decoded measurement from one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Voltage in volts.
    pub voltage: f64,
    /// Current in amperes.
    pub current: f64,
    /// Power in watts.
    pub power: f64,
}

impl Reading {
    /// Create a reading from scaled values.
    pub fn new(voltage: f64, current: f64, power: f64) -> Self {
        Self {
            voltage,
            current,
            power,
        }
    }

    /// Extract a reading from a decrypted frame.
    ///
    /// The byte format is:
    /// - bytes 48-51: voltage (i32 LE, divide by 10^4 for V)
    /// - bytes 52-55: current (i32 LE, divide by 10^5 for A)
    /// - bytes 56-59: power (i32 LE, divide by 10^4 for W)
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidLength`] if `plaintext` is not exactly
    /// [`FRAME_LEN`] bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_plaintext(plaintext: &[u8]) -> Result<Self, ParseError> {
        use bytes::Buf;

        if plaintext.len() != FRAME_LEN {
            return Err(ParseError::InvalidLength {
                expected: FRAME_LEN,
                actual: plaintext.len(),
            });
        }

        // The three fields are contiguous
        let mut buf = &plaintext[Metric::Voltage.offset()..];
        let voltage = Metric::Voltage.scale(buf.get_i32_le());
        let current = Metric::Current.scale(buf.get_i32_le());
        let power = Metric::Power.scale(buf.get_i32_le());

        Ok(Self {
            voltage,
            current,
            power,
        })
    }

    /// Value of a single metric.
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Voltage => self.voltage,
            Metric::Current => self.current,
            Metric::Power => self.power,
        }
    }

    /// Write the raw fields of this reading into a plaintext frame buffer.
    ///
    /// Only the measurement fields are touched.
    pub fn write_plaintext(&self, plaintext: &mut [u8; FRAME_LEN]) {
        for metric in Metric::ALL {
            let offset = metric.offset();
            let raw = metric.unscale(self.get(metric));
            plaintext[offset..offset + 4].copy_from_slice(&raw.to_le_bytes());
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} V, {:.5} A, {:.4} W",
            self.voltage, self.current, self.power
        )
    }
}

/// How a write to a characteristic is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WriteMode {
    /// Write-with-response; the peer confirms each write.
    Acknowledged,
    /// Write-without-response.
    Unacknowledged,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Acknowledged => write!(f, "reliable"),
            WriteMode::Unacknowledged => write!(f, "command"),
        }
    }
}

/// Firmware generation of a connected meter.
///
/// The two generations expose different GATT layouts and expect different
/// write modes. Nothing else about the protocol differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FirmwareVariant {
    /// Firmware v1.15 and newer.
    Current,
    /// Firmware v1.14 and older.
    Legacy,
}

impl FirmwareVariant {
    /// Detect the variant from the list of advertised primary services.
    pub fn detect<'a>(services: impl IntoIterator<Item = &'a ::uuid::Uuid>) -> Self {
        if services
            .into_iter()
            .any(|s| *s == uuids::TC66_LEGACY_WRITE_SERVICE)
        {
            FirmwareVariant::Legacy
        } else {
            FirmwareVariant::Current
        }
    }

    /// Service that owns the notify characteristic.
    pub const fn notify_service(self) -> ::uuid::Uuid {
        uuids::TC66_SERVICE
    }

    /// Notify characteristic for this variant.
    pub const fn notify_characteristic(self) -> ::uuid::Uuid {
        match self {
            FirmwareVariant::Current => uuids::NOTIFY,
            FirmwareVariant::Legacy => uuids::LEGACY_NOTIFY,
        }
    }

    /// Service that owns the write characteristic.
    pub const fn write_service(self) -> ::uuid::Uuid {
        match self {
            FirmwareVariant::Current => uuids::TC66_SERVICE,
            FirmwareVariant::Legacy => uuids::TC66_LEGACY_WRITE_SERVICE,
        }
    }

    /// Write characteristic for this variant.
    pub const fn write_characteristic(self) -> ::uuid::Uuid {
        match self {
            FirmwareVariant::Current => uuids::WRITE,
            FirmwareVariant::Legacy => uuids::LEGACY_WRITE,
        }
    }

    /// Write mode expected by this variant.
    pub const fn write_mode(self) -> WriteMode {
        match self {
            FirmwareVariant::Current => WriteMode::Unacknowledged,
            FirmwareVariant::Legacy => WriteMode::Acknowledged,
        }
    }
}

impl fmt::Display for FirmwareVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareVariant::Current => write!(f, "firmware >= 1.15"),
            FirmwareVariant::Legacy => write!(f, "firmware <= 1.14"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_slice_rejects_wrong_length() {
        let err = Frame::from_slice(&[0u8; 191]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidLength {
                expected: 192,
                actual: 191
            }
        );
        assert!(Frame::from_slice(&[0u8; 193]).is_err());
        assert!(Frame::from_slice(&[]).is_err());
    }

    #[test]
    fn test_frame_debug_is_short() {
        let frame = Frame::new([0xAB; FRAME_LEN]);
        let debug = format!("{:?}", frame);
        assert!(debug.starts_with("Frame("));
        assert!(debug.len() < 80);
    }

    #[test]
    fn test_metric_order_and_offsets() {
        assert_eq!(
            Metric::ALL,
            [Metric::Voltage, Metric::Current, Metric::Power]
        );
        assert_eq!(Metric::Voltage.offset(), 48);
        assert_eq!(Metric::Current.offset(), 52);
        assert_eq!(Metric::Power.offset(), 56);
    }

    #[test]
    fn test_metric_topic_suffixes() {
        assert_eq!(Metric::Voltage.topic_suffix(), "voltage_V");
        assert_eq!(Metric::Current.topic_suffix(), "current_A");
        assert_eq!(Metric::Power.topic_suffix(), "power_W");
    }

    #[test]
    fn test_metric_scale() {
        assert_eq!(Metric::Voltage.scale(3000), 0.3);
        assert_eq!(Metric::Current.scale(12_345), 0.12345);
        assert_eq!(Metric::Power.scale(-20_000), -2.0);
        assert_eq!(Metric::Voltage.unscale(5.1234), 51_234);
    }

    #[test]
    fn test_reading_from_plaintext() {
        let mut plaintext = [0u8; FRAME_LEN];
        plaintext[48..52].copy_from_slice(&0x0000_0BB8i32.to_le_bytes());
        plaintext[52..56].copy_from_slice(&51_234i32.to_le_bytes());
        plaintext[56..60].copy_from_slice(&15_370i32.to_le_bytes());

        let reading = Reading::from_plaintext(&plaintext).unwrap();
        assert_eq!(reading.voltage, 0.3);
        assert_eq!(reading.current, 0.51234);
        assert_eq!(reading.power, 1.537);
    }

    #[test]
    fn test_reading_known_voltage_bytes() {
        let mut plaintext = [0u8; FRAME_LEN];
        plaintext[48..52].copy_from_slice(&[0xB8, 0x0B, 0x00, 0x00]);
        let reading = Reading::from_plaintext(&plaintext).unwrap();
        assert_eq!(reading.voltage.to_string(), "0.3");
    }

    #[test]
    fn test_reading_negative_current() {
        let mut plaintext = [0u8; FRAME_LEN];
        plaintext[52..56].copy_from_slice(&(-5_000i32).to_le_bytes());
        let reading = Reading::from_plaintext(&plaintext).unwrap();
        assert_eq!(reading.current, -0.05);
    }

    #[test]
    fn test_reading_from_plaintext_wrong_length() {
        let result = Reading::from_plaintext(&[0u8; 60]);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("requires 192 bytes")
        );
    }

    #[test]
    fn test_reading_write_plaintext_roundtrip() {
        let reading = Reading::new(5.0123, 0.98765, 4.9504);
        let mut plaintext = [0xEEu8; FRAME_LEN];
        reading.write_plaintext(&mut plaintext);

        assert_eq!(plaintext[47], 0xEE);
        assert_eq!(plaintext[60], 0xEE);
        assert_eq!(Reading::from_plaintext(&plaintext).unwrap(), reading);
    }

    #[test]
    fn test_reading_get() {
        let reading = Reading::new(1.0, 2.0, 3.0);
        let values: Vec<f64> = Metric::ALL.iter().map(|m| reading.get(*m)).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_reading_display() {
        let reading = Reading::new(5.0, 0.5, 2.5);
        assert_eq!(reading.to_string(), "5.0000 V, 0.50000 A, 2.5000 W");
    }

    #[test]
    fn test_firmware_detect_legacy() {
        let services = [uuids::TC66_SERVICE, uuids::TC66_LEGACY_WRITE_SERVICE];
        let variant = FirmwareVariant::detect(services.iter());
        assert_eq!(variant, FirmwareVariant::Legacy);
        assert_eq!(variant.write_mode(), WriteMode::Acknowledged);
        assert_eq!(variant.notify_characteristic(), uuids::LEGACY_NOTIFY);
        assert_eq!(variant.write_characteristic(), uuids::LEGACY_WRITE);
        assert_eq!(variant.write_service(), uuids::TC66_LEGACY_WRITE_SERVICE);
    }

    #[test]
    fn test_firmware_detect_current() {
        let services = [uuids::TC66_SERVICE];
        let variant = FirmwareVariant::detect(services.iter());
        assert_eq!(variant, FirmwareVariant::Current);
        assert_eq!(variant.write_mode(), WriteMode::Unacknowledged);
        assert_eq!(variant.notify_characteristic(), uuids::NOTIFY);
        assert_eq!(variant.write_characteristic(), uuids::WRITE);
        assert_eq!(variant.write_service(), uuids::TC66_SERVICE);
    }

    #[test]
    fn test_firmware_detect_no_services() {
        assert_eq!(
            FirmwareVariant::detect(std::iter::empty()),
            FirmwareVariant::Current
        );
    }

    #[test]
    fn test_measurement_command() {
        assert_eq!(MEASUREMENT_COMMAND.len(), 8);
        assert_eq!(&MEASUREMENT_COMMAND[..], b"bgetva\r\n");
    }
}
