//! Value envelope and optional encryption.
//!
//! The KV store keeps no modification time, so each payload is wrapped in a
//! small JSON envelope carrying one. With an encryption key configured the
//! envelope is sealed with AES-256-GCM; the random 96-bit nonce is stored in
//! front of the ciphertext.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(with = "base64_bytes")]
    value: Vec<u8>,
    modified: DateTime<Utc>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A decoded payload with its modification time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub value: Vec<u8>,
    pub modified: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ValueCodec {
    cipher: Option<Aes256Gcm>,
}

impl ValueCodec {
    pub fn plain() -> Self {
        Self { cipher: None }
    }

    pub fn encrypted(key: &[u8; 32]) -> Self {
        Self {
            cipher: Some(Aes256Gcm::new(key.into())),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encode(&self, value: &[u8], modified: DateTime<Utc>) -> StorageResult<Vec<u8>> {
        let envelope = Envelope {
            value: value.to_vec(),
            modified,
        };
        let plain = serde_json::to_vec(&envelope).map_err(|e| StorageError::Codec {
            key: String::new(),
            reason: e.to_string(),
        })?;
        let Some(cipher) = &self.cipher else {
            return Ok(plain);
        };
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plain.as_slice())
            .map_err(|_| StorageError::Codec {
                key: String::new(),
                reason: "encryption failed".into(),
            })?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decode a raw store value. `key` is only used in error messages.
    pub fn decode(&self, key: &str, raw: &[u8]) -> StorageResult<Decoded> {
        let codec_err = |reason: String| StorageError::Codec {
            key: key.to_string(),
            reason,
        };
        let opened;
        let plain = match &self.cipher {
            None => raw,
            Some(cipher) => {
                if raw.len() < NONCE_LEN {
                    return Err(codec_err("sealed value is truncated".into()));
                }
                let (nonce, sealed) = raw.split_at(NONCE_LEN);
                opened = cipher
                    .decrypt(Nonce::from_slice(nonce), sealed)
                    .map_err(|_| codec_err("decryption failed".into()))?;
                opened.as_slice()
            }
        };
        let envelope: Envelope =
            serde_json::from_slice(plain).map_err(|e| codec_err(e.to_string()))?;
        Ok(Decoded {
            value: envelope.value,
            modified: envelope.modified,
        })
    }
}

impl std::fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCodec")
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_envelope_is_json() {
        let codec = ValueCodec::plain();
        let now = Utc::now();
        let raw = codec.encode(b"crt data", now).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["value"], "Y3J0IGRhdGE=");

        let decoded = codec.decode("k", &raw).unwrap();
        assert_eq!(decoded.value, b"crt data");
        assert_eq!(decoded.modified, now);
    }

    #[test]
    fn encrypted_values_are_opaque() {
        let codec = ValueCodec::encrypted(&[7u8; 32]);
        let raw = codec.encode(b"private key", Utc::now()).unwrap();
        assert!(!raw.windows(b"private".len()).any(|w| w == b"private"));
        assert_eq!(codec.decode("k", &raw).unwrap().value, b"private key");
    }

    #[test]
    fn nonces_differ_between_writes() {
        let codec = ValueCodec::encrypted(&[7u8; 32]);
        let now = Utc::now();
        assert_ne!(codec.encode(b"x", now).unwrap(), codec.encode(b"x", now).unwrap());
    }

    #[test]
    fn wrong_key_fails_to_decode() {
        let raw = ValueCodec::encrypted(&[1u8; 32]).encode(b"secret", Utc::now()).unwrap();
        let err = ValueCodec::encrypted(&[2u8; 32]).decode("k", &raw).unwrap_err();
        assert!(matches!(err, StorageError::Codec { .. }));
        assert!(ValueCodec::plain().decode("k", &raw).is_err());
    }

    #[test]
    fn foreign_values_fail_to_decode() {
        let codec = ValueCodec::plain();
        assert!(codec.decode("k", b"not an envelope").is_err());
        assert!(ValueCodec::encrypted(&[1u8; 32]).decode("k", b"short").is_err());
    }
}
