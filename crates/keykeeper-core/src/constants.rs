//! Core constants shared by the credential store and the firmware protocol.
//!
//! The firmware identifies the central and every coin by a 6-byte BLE
//! address and exchanges fixed-length key material as uppercase hex. These
//! constants pin those sizes in one place.
//!
//! # Usage
//!
//! ```
//! use keykeeper_core::constants::*;
//!
//! assert_eq!(ADDRESS_STR_LEN, ADDRESS_LEN * 3 - 1);
//! assert_eq!(SPACE_KEY_LEN * 2, 64);
//! ```

// ============================================================================
// Addresses
// ============================================================================

/// Number of bytes in a BLE device address.
pub const ADDRESS_LEN: usize = 6;

/// Length of the colon-separated textual address (`AA:BB:CC:DD:EE:FF`).
pub const ADDRESS_STR_LEN: usize = 17;

/// Separator between address octets in the textual form.
pub const ADDRESS_SEPARATOR: char = ':';

/// Bits forced to `11` in the most significant address byte.
///
/// The most significant byte is the last one transmitted over the air and
/// the first one in the textual form. Setting both top bits marks the
/// address as a static random address.
pub const STATIC_ADDRESS_MASK: u8 = 0xC0;

// ============================================================================
// Key material
// ============================================================================

/// Length in bytes of identity resolving keys and long-term keys.
pub const KEY_LEN: usize = 16;

/// Length in bytes of a coin's space key.
pub const SPACE_KEY_LEN: usize = 32;
