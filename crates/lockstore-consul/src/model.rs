//! Wire models for the Consul KV and Session endpoints.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use lockstore_backend::{BackendError, BackendResult, KvEntry};
use lockstore_types::SessionId;
use serde::{Deserialize, Serialize};

/// A KV pair as returned by `GET /v1/kv/<key>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvPair {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "CreateIndex", default)]
    pub create_index: u64,

    #[serde(rename = "ModifyIndex", default)]
    pub modify_index: u64,

    #[serde(rename = "LockIndex", default)]
    pub lock_index: u64,

    #[serde(rename = "Flags", default)]
    pub flags: u64,

    /// Base64 encoded; `null` for empty values.
    #[serde(rename = "Value", default)]
    pub value: Option<String>,

    #[serde(rename = "Session", default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl KvPair {
    pub fn into_entry(self) -> BackendResult<KvEntry> {
        let value = match self.value {
            Some(encoded) => BASE64.decode(encoded.as_bytes()).map_err(|e| {
                BackendError::Protocol(format!("value of {} is not base64: {e}", self.key))
            })?,
            None => Vec::new(),
        };
        Ok(KvEntry {
            key: self.key,
            value,
            create_index: self.create_index,
            modify_index: self.modify_index,
            lock_index: self.lock_index,
            session: self.session.filter(|s| !s.is_empty()).map(SessionId::new),
        })
    }
}

/// Body of `PUT /v1/session/create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateRequest {
    #[serde(rename = "Name")]
    pub name: String,

    /// Go duration string, e.g. `15000ms`.
    #[serde(rename = "TTL")]
    pub ttl: String,

    #[serde(rename = "LockDelay")]
    pub lock_delay: String,

    #[serde(rename = "Behavior")]
    pub behavior: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    #[serde(rename = "ID")]
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_consul_kv_pair() {
        let json = r#"[{
            "LockIndex": 1,
            "Key": "lockstore/acme/site.crt.lock",
            "Flags": 0,
            "Value": "Y3J0IGRhdGE=",
            "Session": "adf4238a-882b-9ddc-4a9d-5b6758e4159e",
            "CreateIndex": 100,
            "ModifyIndex": 200
        }]"#;
        let pairs: Vec<KvPair> = serde_json::from_str(json).unwrap();
        let entry = pairs.into_iter().next().unwrap().into_entry().unwrap();
        assert_eq!(entry.value, b"crt data");
        assert_eq!(entry.modify_index, 200);
        assert_eq!(entry.lock_index, 1);
        assert_eq!(
            entry.session.unwrap().as_str(),
            "adf4238a-882b-9ddc-4a9d-5b6758e4159e"
        );
    }

    #[test]
    fn null_value_is_empty() {
        let json = r#"{"Key": "k", "Value": null, "CreateIndex": 1, "ModifyIndex": 1, "LockIndex": 0, "Flags": 0}"#;
        let pair: KvPair = serde_json::from_str(json).unwrap();
        let entry = pair.into_entry().unwrap();
        assert!(entry.value.is_empty());
        assert!(entry.session.is_none());
    }

    #[test]
    fn rejects_invalid_base64() {
        let pair = KvPair {
            key: "k".into(),
            create_index: 1,
            modify_index: 1,
            lock_index: 0,
            flags: 0,
            value: Some("not base64!".into()),
            session: None,
        };
        assert!(matches!(pair.into_entry(), Err(BackendError::Protocol(_))));
    }

    #[test]
    fn session_request_uses_consul_field_names() {
        let req = SessionCreateRequest {
            name: "lockstore".into(),
            ttl: "15000ms".into(),
            lock_delay: "0ms".into(),
            behavior: "release".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["TTL"], "15000ms");
        assert_eq!(json["Behavior"], "release");
        assert_eq!(json["LockDelay"], "0ms");
    }
}
