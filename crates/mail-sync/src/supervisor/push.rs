//! Gmail push notification payloads
//!
//! Pub/Sub delivers `message.data` as base64 of
//! `{"emailAddress": "...", "historyId": 1234}`.

use serde::Deserialize;

use crate::error::SupervisorError;
use crate::gmail::decode_base64_bytes;
use crate::models::normalize_address;

/// Decoded push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    /// Normalized address of the mailbox that changed
    pub address: String,
    pub history_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
    email_address: String,
    #[serde(default)]
    history_id: Option<serde_json::Value>,
}

impl PushNotification {
    pub fn decode(data: &str) -> Result<Self, SupervisorError> {
        let bytes = decode_base64_bytes(data.trim())
            .ok_or_else(|| SupervisorError::InvalidPush("data is not base64".into()))?;
        let payload: PushPayload = serde_json::from_slice(&bytes)
            .map_err(|e| SupervisorError::InvalidPush(e.to_string()))?;

        let address = normalize_address(&payload.email_address);
        if address.is_empty() {
            return Err(SupervisorError::InvalidPush("empty emailAddress".into()));
        }

        let history_id = payload.history_id.and_then(|value| match value {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) => Some(s),
            _ => None,
        });

        Ok(Self {
            address,
            history_id,
        })
    }
}
