//! Inbound event delivery from the gateway bridge.
//!
//! Events arrive by HTTP long-polling `/events/poll`; the listener task
//! forwards them over an mpsc channel and reconnects with exponential
//! backoff after errors.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::ParticipantChange;

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// One event as delivered by the bridge.
///
/// Only `message` and `group.participants` are meaningful to the core;
/// everything else is acknowledged as unhandled.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    /// Event discriminator.
    pub event: String,
    /// Id of the device this bot is logged in as.
    pub device_id: String,
    /// Event-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Payload of a `message` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    /// Gateway message id.
    pub id: String,
    /// Conversation the message arrived in.
    pub chat_id: String,
    /// Sender user id.
    pub from: String,
    /// Sender display name, when the gateway knows one.
    #[serde(default)]
    pub from_name: Option<String>,
    /// Message text.
    #[serde(default)]
    pub body: String,
    /// Unix timestamp (seconds).
    #[serde(default)]
    pub timestamp: i64,
    /// Id of the message this one replies to.
    #[serde(default)]
    pub replied_to_id: Option<String>,
    /// Text of the quoted message.
    #[serde(default)]
    pub quoted_body: Option<String>,
}

impl MessagePayload {
    /// The message timestamp as UTC, falling back to now for bad values.
    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, 0).unwrap_or_else(Utc::now)
    }
}

/// Payload of a `group.participants` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantsPayload {
    /// The group chat.
    pub chat_id: String,
    /// One of `join`, `leave`, `promote`, `demote`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Affected user ids.
    #[serde(default)]
    pub jids: Vec<String>,
}

impl ParticipantsPayload {
    /// Map the wire `type` onto a membership change.
    pub fn change(&self) -> Option<ParticipantChange> {
        match self.kind.as_str() {
            "join" => Some(ParticipantChange::Join),
            "leave" => Some(ParticipantChange::Leave),
            "promote" => Some(ParticipantChange::Promote),
            "demote" => Some(ParticipantChange::Demote),
            _ => None,
        }
    }
}

impl InboundEvent {
    /// Decode the payload of a `message` event.
    pub fn message(&self) -> Option<MessagePayload> {
        if self.event != "message" {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Decode the payload of a `group.participants` event.
    pub fn participants(&self) -> Option<ParticipantsPayload> {
        if self.event != "group.participants" {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Spawn the long-poll listener that forwards events to `event_tx`.
///
/// Returns immediately; the listener runs as a background Tokio task and
/// reconnects automatically on failure with exponential backoff.
pub fn spawn_event_listener(
    base_url: String,
    event_tx: mpsc::Sender<InboundEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{base_url}/events/poll");
        let mut backoff_ms: u64 = 1000;

        loop {
            info!(url = %poll_url, "connecting to gateway event stream");

            match poll_events(&poll_url, &event_tx).await {
                Ok(()) => {
                    info!("gateway event stream closed normally");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms, "gateway event stream error, reconnecting");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                }
            }
        }
    })
}

/// Poll the bridge for events in a loop. Returns `Err` on non-timeout
/// network errors so the caller can reconnect with backoff.
async fn poll_events(
    poll_url: &str,
    event_tx: &mpsc::Sender<InboundEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(events) = resp.json::<Vec<InboundEvent>>().await {
                    for event in events {
                        debug!(event = %event.event, "received gateway event");
                        if event_tx.send(event).await.is_err() {
                            // Receiver dropped; shut down cleanly.
                            return Ok(());
                        }
                    }
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            Err(e) if e.is_timeout() => {
                // Normal: long-poll timeout expired, retry immediately.
                continue;
            }
            Err(e) => {
                return Err(e.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_event() {
        let event: InboundEvent = serde_json::from_value(serde_json::json!({
            "event": "message",
            "device_id": "device1",
            "payload": {
                "id": "m1",
                "chat_id": "g1@g.us",
                "from": "u1@s.whatsapp.net",
                "from_name": "Alice",
                "body": ".ping",
                "timestamp": 1700000000
            }
        }))
        .expect("decode");
        let msg = event.message().expect("message payload");
        assert_eq!(msg.chat_id, "g1@g.us");
        assert_eq!(msg.body, ".ping");
        assert_eq!(msg.from_name.as_deref(), Some("Alice"));
        assert!(event.participants().is_none());
    }

    #[test]
    fn test_decode_participants_event() {
        let event: InboundEvent = serde_json::from_value(serde_json::json!({
            "event": "group.participants",
            "device_id": "device1",
            "payload": {
                "chat_id": "g1@g.us",
                "type": "promote",
                "jids": ["b@s.whatsapp.net"]
            }
        }))
        .expect("decode");
        let payload = event.participants().expect("participants payload");
        assert_eq!(payload.change(), Some(ParticipantChange::Promote));
        assert_eq!(payload.jids, ["b@s.whatsapp.net"]);
    }

    #[test]
    fn test_unknown_event_is_tolerated() {
        let event: InboundEvent = serde_json::from_value(serde_json::json!({
            "event": "presence.update",
            "device_id": "device1",
            "payload": { "whatever": true }
        }))
        .expect("decode");
        assert!(event.message().is_none());
        assert!(event.participants().is_none());
    }

    #[test]
    fn test_unknown_participant_kind() {
        let payload = ParticipantsPayload {
            chat_id: "g1@g.us".to_owned(),
            kind: "modify".to_owned(),
            jids: vec![],
        };
        assert!(payload.change().is_none());
    }
}
