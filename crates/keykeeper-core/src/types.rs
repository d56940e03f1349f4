use crate::{
    Result,
    constants::{
        ADDRESS_LEN, ADDRESS_SEPARATOR, ADDRESS_STR_LEN, KEY_LEN, SPACE_KEY_LEN,
        STATIC_ADDRESS_MASK,
    },
    error::Error,
};
use rand_core::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// BLE device address.
///
/// Bytes are kept in transmission order. The textual form reverses them, so
/// the last transmitted byte is printed first:
///
/// ```
/// use keykeeper_core::BleAddress;
///
/// let addr = BleAddress::from_bytes([0x01, 0x02, 0x03, 0x04, 0x05, 0xC6]);
/// assert_eq!(addr.to_string(), "C6:05:04:03:02:01");
/// assert!(addr.is_static());
///
/// let parsed: BleAddress = "c6:05:04:03:02:01".parse().unwrap();
/// assert_eq!(parsed, addr);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleAddress([u8; ADDRESS_LEN]);

impl BleAddress {
    /// Create an address from bytes in transmission order.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Draw a random static address.
    ///
    /// The top two bits of the most significant byte are forced to `11`.
    pub fn random_static<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; ADDRESS_LEN];
        rng.fill_bytes(&mut bytes);
        bytes[ADDRESS_LEN - 1] |= STATIC_ADDRESS_MASK;
        Self(bytes)
    }

    /// Bytes in transmission order.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Whether the address carries the static random bit pattern.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.0[ADDRESS_LEN - 1] & STATIC_ADDRESS_MASK == STATIC_ADDRESS_MASK
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().rev().enumerate() {
            if i > 0 {
                write!(f, "{ADDRESS_SEPARATOR}")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for BleAddress {
    type Err = Error;

    /// Parse the colon-separated textual form, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        if s.len() != ADDRESS_STR_LEN {
            return Err(Error::InvalidAddress(format!(
                "expected {ADDRESS_STR_LEN} characters, got {}: {s:?}",
                s.len()
            )));
        }

        let mut bytes = [0u8; ADDRESS_LEN];
        let mut octets = s.split(ADDRESS_SEPARATOR);
        for slot in bytes.iter_mut().rev() {
            let octet = octets
                .next()
                .filter(|o| o.len() == 2)
                .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
            *slot = u8::from_str_radix(octet, 16)
                .map_err(|_| Error::InvalidAddress(s.to_string()))?;
        }
        if octets.next().is_some() {
            return Err(Error::InvalidAddress(s.to_string()));
        }

        Ok(Self(bytes))
    }
}

// Ordered like the textual form so sorted maps serialize in string order.
impl Ord for BleAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for BleAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for BleAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BleAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Fixed-length secret key material.
///
/// # Security
///
/// The bytes are wiped on drop, `Debug` never prints them, and equality is
/// evaluated in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey<const N: usize>([u8; N]);

/// Identity resolving key or long-term key.
pub type Key128 = SecretKey<KEY_LEN>;

/// Auxiliary per-coin secret; the firmware only reveals its first byte.
pub type SpaceKey = SecretKey<SPACE_KEY_LEN>;

impl<const N: usize> SecretKey<N> {
    /// Wrap existing key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// Draw fresh random key bytes.
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; N];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// First key byte, as exposed by the firmware's space key table.
    #[must_use]
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Uppercase hex encoding, the form used on disk and on the wire.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Decode from hex (either case).
    ///
    /// # Errors
    /// Returns `Error::InvalidKeyLength` if the decoded length is not `N`, or
    /// `Error::InvalidHex` if the input is not hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        let decoded = hex::decode(s)?;
        let bytes: [u8; N] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKeyLength {
                expected: N,
                actual: decoded.len(),
            })?;
        Ok(Self(bytes))
    }
}

impl<const N: usize> PartialEq for SecretKey<N> {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl<const N: usize> Eq for SecretKey<N> {}

impl<const N: usize> fmt::Debug for SecretKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey<{N}>(<redacted>)")
    }
}

impl<const N: usize> FromStr for SecretKey<N> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl<const N: usize> Serialize for SecretKey<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, const N: usize> Deserialize<'de> for SecretKey<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// BLE identity of the central hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub address: BleAddress,
    pub irk: Key128,
}

impl Identity {
    /// Generate a fresh identity with a random static address and IRK.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        Self {
            address: BleAddress::random_static(rng),
            irk: Key128::random(rng),
        }
    }
}

/// Credential material of one coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub address: BleAddress,
    pub irk: Key128,
    pub ltk: Key128,
    pub space_key: SpaceKey,
}

impl Coin {
    /// Generate key material for a coin at the given address.
    pub fn generate<R: RngCore + ?Sized>(address: BleAddress, rng: &mut R) -> Self {
        Self {
            address,
            irk: Key128::random(rng),
            ltk: Key128::random(rng),
            space_key: SpaceKey::random(rng),
        }
    }

    /// Space key byte the firmware reports for this coin.
    #[must_use]
    pub fn space_key_prefix(&self) -> u8 {
        self.space_key.first_byte()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand_core::OsRng;
    use rstest::rstest;

    #[rstest]
    #[case("AA:BB:CC:DD:EE:FF", [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA])]
    #[case("ef:ef:5a:cb:c2:b6", [0xB6, 0xC2, 0xCB, 0x5A, 0xEF, 0xEF])]
    #[case("00:00:00:00:00:00", [0; 6])]
    fn test_address_parse(#[case] input: &str, #[case] expected: [u8; 6]) {
        let addr: BleAddress = input.parse().unwrap();
        assert_eq!(addr.as_bytes(), &expected);
        assert_eq!(addr.to_string(), input.to_uppercase());
    }

    #[rstest]
    #[case("")] // empty
    #[case("AA:BB:CC:DD:EE")] // too short
    #[case("AA:BB:CC:DD:EE:FF:00")] // too long
    #[case("AA-BB-CC-DD-EE-FF")] // wrong separator
    #[case("AA:BB:CC:DD:EE:GG")] // not hex
    #[case("AAA:B:CC:DD:EE:FF")] // misaligned octets
    fn test_address_invalid(#[case] input: &str) {
        assert!(input.parse::<BleAddress>().is_err());
    }

    #[test]
    fn test_address_order_matches_text() {
        let low: BleAddress = "C0:00:00:00:00:FF".parse().unwrap();
        let high: BleAddress = "C1:00:00:00:00:00".parse().unwrap();
        assert!(low < high);
        assert!(low.to_string() < high.to_string());
    }

    #[test]
    fn test_address_serde_as_string() {
        let addr: BleAddress = "EC:EB:CE:D9:FE:14".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"EC:EB:CE:D9:FE:14\"");
        let back: BleAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_key_hex_is_uppercase() {
        let key = Key128::from_bytes([0xab; 16]);
        assert_eq!(key.to_hex(), "AB".repeat(16));
        assert_eq!(Key128::from_hex(&"ab".repeat(16)).unwrap(), key);
    }

    #[rstest]
    #[case("ABCD")] // too short
    #[case(&"00".repeat(17))] // too long
    #[case(&"ZZ".repeat(16))] // not hex
    fn test_key_invalid(#[case] input: &str) {
        assert!(Key128::from_hex(input).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = Key128::from_bytes([0x42; 16]);
        let debug = format!("{:?}", key);
        assert!(!debug.contains("42"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_space_key_prefix() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x9F;
        let coin = Coin {
            address: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            irk: Key128::from_bytes([1; 16]),
            ltk: Key128::from_bytes([2; 16]),
            space_key: SpaceKey::from_bytes(bytes),
        };
        assert_eq!(coin.space_key_prefix(), 0x9F);
    }

    #[test]
    fn test_generated_identity_is_static() {
        let identity = Identity::generate(&mut OsRng);
        assert!(identity.address.is_static());
    }

    proptest! {
        /// Property: random static addresses always carry the `11` top bits
        /// and render with a first octet of C0 or above.
        #[test]
        fn prop_random_static_bit_pattern(seed in any::<[u8; 6]>()) {
            let mut bytes = seed;
            bytes[5] |= STATIC_ADDRESS_MASK;
            let addr = BleAddress::from_bytes(bytes);
            prop_assert!(addr.is_static());
            let text = addr.to_string();
            prop_assert!(text.as_str() >= "C0");
            prop_assert_eq!(text.parse::<BleAddress>().unwrap(), addr);
        }
    }
}
