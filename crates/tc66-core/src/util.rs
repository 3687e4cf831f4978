//! Utility functions for tc66-core.
//!
//! This module contains shared utility functions used across the crate.

use btleplug::platform::PeripheralId;

/// Address reported for every peripheral on macOS.
const ZERO_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats. This function extracts the useful
/// identifier string.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Create an identifier string from an address and peripheral ID.
///
/// On macOS where addresses are 00:00:00:00:00:00, uses the peripheral ID.
/// On other platforms, uses the Bluetooth address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_zero_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

/// Whether `address` is the placeholder macOS reports instead of a MAC.
pub fn is_zero_address(address: &str) -> bool {
    address == ZERO_ADDRESS
}

/// Compare two Bluetooth addresses ignoring case and separators.
///
/// `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` and `aabbccddeeff` are all equal.
pub fn addresses_match(a: &str, b: &str) -> bool {
    fn normalize(s: &str) -> String {
        s.chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }
    let a = normalize(a);
    !a.is_empty() && a == normalize(b)
}
