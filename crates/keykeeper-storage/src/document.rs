//! On-disk JSON shape of the credential database.
//!
//! ```json
//! {
//!   "identity": ["EF:EF:5A:CB:C2:B6", "<32 hex>"],
//!   "coins": { "EC:EB:CE:D9:FE:14": ["<irk>", "<ltk>", "<spacekey>"] },
//!   "names": { "Paul": "EC:EB:CE:D9:FE:14" }
//! }
//! ```
//!
//! An encrypted file replaces the whole object with
//! `{"encrypted": "<base64>"}`; see [`crate::envelope`].

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use keykeeper_core::{BleAddress, Key128, SpaceKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{self, KdfParams};
use crate::error::{StorageError, StorageResult};

const ENCRYPTED_FIELD: &str = "encrypted";

/// Plain database document.
///
/// Maps are `BTreeMap`s so the encoding is stable and sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DatabaseDocument {
    pub identity: (BleAddress, Key128),
    pub coins: BTreeMap<BleAddress, (Key128, Key128, SpaceKey)>,
    pub names: BTreeMap<String, BleAddress>,
}

#[derive(Serialize)]
struct EncryptedDocument<'a> {
    encrypted: &'a str,
}

fn corrupt(err: serde_json::Error) -> StorageError {
    StorageError::CorruptDatabase(err.to_string())
}

impl DatabaseDocument {
    /// Decode file contents, decrypting first when the file is wrapped.
    pub fn decode(bytes: &[u8], password: &str) -> StorageResult<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(corrupt)?;

        let document: Self = match encrypted_payload(&value) {
            Some(encoded) => {
                let blob = BASE64.decode(encoded).map_err(|err| {
                    StorageError::CorruptDatabase(format!("invalid base64 payload: {err}"))
                })?;
                let plaintext = envelope::open(&blob, password)?;
                serde_json::from_slice(&plaintext).map_err(corrupt)?
            }
            None => serde_json::from_value(value).map_err(corrupt)?,
        };

        document.validate()?;
        Ok(document)
    }

    /// Encode for writing. An empty password produces a plain document.
    pub fn encode(&self, password: &str, params: &KdfParams) -> StorageResult<Vec<u8>> {
        let plain = serde_json::to_vec(self).map_err(|err| StorageError::Internal(err.to_string()))?;
        if password.is_empty() {
            return Ok(plain);
        }

        let plain = zeroize::Zeroizing::new(plain);
        let blob = envelope::seal(&plain, password, params)?;
        let encoded = BASE64.encode(blob);
        serde_json::to_vec(&EncryptedDocument {
            encrypted: &encoded,
        })
        .map_err(|err| StorageError::Internal(err.to_string()))
    }

    /// Check the name and coin maps describe the same set of coins.
    pub fn validate(&self) -> StorageResult<()> {
        if self.coins.len() != self.names.len() {
            return Err(StorageError::CorruptDatabase(format!(
                "{} coins but {} names",
                self.coins.len(),
                self.names.len()
            )));
        }

        let mut named = BTreeMap::new();
        for (name, address) in &self.names {
            if !self.coins.contains_key(address) {
                return Err(StorageError::CorruptDatabase(format!(
                    "name {name:?} refers to unknown coin {address}"
                )));
            }
            if let Some(other) = named.insert(*address, name) {
                return Err(StorageError::CorruptDatabase(format!(
                    "coin {address} is named both {other:?} and {name:?}"
                )));
            }
        }
        Ok(())
    }
}

/// The base64 payload if `value` is exactly `{"encrypted": "<string>"}`.
fn encrypted_payload(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get(ENCRYPTED_FIELD)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const IRK: &str = "000102030405060708090A0B0C0D0E0F";
    const SPACE_KEY: &str = "9F0102030405060708090A0B0C0D0E0F000102030405060708090A0B0C0D0E0F";

    fn plain_json() -> String {
        format!(
            r#"{{"identity":["EF:EF:5A:CB:C2:B6","{IRK}"],"coins":{{"EC:EB:CE:D9:FE:14":["{IRK}","{IRK}","{SPACE_KEY}"]}},"names":{{"Paul":"EC:EB:CE:D9:FE:14"}}}}"#
        )
    }

    #[test]
    fn test_decode_plain_document() {
        let doc = DatabaseDocument::decode(plain_json().as_bytes(), "").unwrap();
        assert_eq!(doc.identity.0.to_string(), "EF:EF:5A:CB:C2:B6");
        assert_eq!(doc.coins.len(), 1);
        assert_eq!(doc.names["Paul"].to_string(), "EC:EB:CE:D9:FE:14");
    }

    #[test]
    fn test_encode_plain_is_canonical() {
        let doc = DatabaseDocument::decode(plain_json().as_bytes(), "").unwrap();
        let encoded = doc.encode("", &KdfParams::default()).unwrap();
        assert_eq!(String::from_utf8(encoded).unwrap(), plain_json());
    }

    #[test]
    fn test_encrypted_document_round_trip() {
        let params = KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        };
        let doc = DatabaseDocument::decode(plain_json().as_bytes(), "").unwrap();
        let encoded = doc.encode("pw", &params).unwrap();

        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert!(encrypted_payload(&value).is_some());
        assert_eq!(DatabaseDocument::decode(&encoded, "pw").unwrap(), doc);
    }

    #[rstest]
    #[case::not_json("not json")]
    #[case::extra_field(r#"{"identity":["EF:EF:5A:CB:C2:B6","00"],"coins":{},"names":{},"extra":1}"#)]
    #[case::missing_names(r#"{"identity":["EF:EF:5A:CB:C2:B6","000102030405060708090A0B0C0D0E0F"],"coins":{}}"#)]
    #[case::identity_three_parts(r#"{"identity":["EF:EF:5A:CB:C2:B6","000102030405060708090A0B0C0D0E0F","00"],"coins":{},"names":{}}"#)]
    #[case::short_irk(r#"{"identity":["EF:EF:5A:CB:C2:B6","0001"],"coins":{},"names":{}}"#)]
    #[case::bad_address(r#"{"identity":["EF:EF:5A:CB:C2","000102030405060708090A0B0C0D0E0F"],"coins":{},"names":{}}"#)]
    #[case::unpaired_name(r#"{"identity":["EF:EF:5A:CB:C2:B6","000102030405060708090A0B0C0D0E0F"],"coins":{},"names":{"Paul":"EC:EB:CE:D9:FE:14"}}"#)]
    #[case::encrypted_not_base64(r#"{"encrypted":"%%%"}"#)]
    fn test_decode_rejects_corrupt(#[case] input: &str) {
        assert!(matches!(
            DatabaseDocument::decode(input.as_bytes(), "pw"),
            Err(StorageError::CorruptDatabase(_))
        ));
    }

    #[test]
    fn test_validate_rejects_doubly_named_coin() {
        let mut doc = DatabaseDocument::decode(plain_json().as_bytes(), "").unwrap();
        let other: BleAddress = "C0:00:00:00:00:01".parse().unwrap();
        let coin = doc.coins.values().next().unwrap().clone();
        doc.coins.insert(other, coin);
        let paul = doc.names["Paul"];
        doc.names.insert("Katja".to_string(), paul);

        assert!(matches!(
            doc.validate(),
            Err(StorageError::CorruptDatabase(_))
        ));
    }
}
