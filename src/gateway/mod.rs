//! Outbound interface to the WhatsApp HTTP gateway.
//!
//! The bot talks to a sidecar bridge over HTTP. [`Gateway`] is the narrow
//! port the router and handlers depend on; [`HttpGateway`] is the production
//! implementation.

pub mod events;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Default port the gateway bridge listens on.
pub const DEFAULT_BRIDGE_PORT: u16 = 3001;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Gateway call failure.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The HTTP request failed or timed out.
    #[error("gateway request failed: {0}")]
    Request(String),
    /// The bridge answered with an error payload.
    #[error("gateway rejected the call: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Request(e.to_string())
    }
}

/// One group member as reported by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    /// User id (`…@s.whatsapp.net`).
    pub jid: String,
    /// Whether the user is a group admin upstream.
    #[serde(default)]
    pub is_admin: bool,
}

/// Outbound send interface plus the one lookup the core needs (group
/// participants at service install time).
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send a message quoting `reply_to`.
    async fn send_reply(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: &str,
    ) -> Result<(), GatewayError>;

    /// Send a plain message to a chat.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError>;

    /// Current members of a group chat.
    async fn group_participants(&self, chat_id: &str) -> Result<Vec<Participant>, GatewayError>;
}

/// Response envelope used by the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// HTTP [`Gateway`] over the sidecar bridge.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    /// Create a client pointing at the given base URL with the given
    /// per-request timeout.
    pub fn new(base_url: String, request_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self { client, base_url }
    }

    /// Create a client for `http://127.0.0.1:{port}`.
    pub fn with_port(port: u16, request_timeout_secs: u64) -> Self {
        Self::new(format!("http://127.0.0.1:{port}"), request_timeout_secs)
    }

    /// The base URL of the bridge.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_send(&self, body: serde_json::Value) -> Result<(), GatewayError> {
        let url = format!("{}/send", self.base_url);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            warn!(%status, "gateway send failed: {detail}");
            return Err(GatewayError::Rejected(format!("status {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send_reply(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: &str,
    ) -> Result<(), GatewayError> {
        self.post_send(serde_json::json!({
            "jid": chat_id,
            "text": text,
            "quoted_id": reply_to,
        }))
        .await?;
        debug!(chat_id, reply_to, "reply sent");
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError> {
        self.post_send(serde_json::json!({ "jid": chat_id, "text": text }))
            .await?;
        debug!(chat_id, "message sent");
        Ok(())
    }

    async fn group_participants(&self, chat_id: &str) -> Result<Vec<Participant>, GatewayError> {
        let url = format!("{}/group/{chat_id}/participants", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body: BridgeResponse<Vec<Participant>> = resp.json().await?;
        match body.data {
            Some(participants) => Ok(participants),
            None => Err(GatewayError::Rejected(
                body.error.unwrap_or_else(|| "no participant data".to_owned()),
            )),
        }
    }
}

/// Recording [`Gateway`] used by unit and integration tests.
#[derive(Default)]
pub struct RecordingGateway {
    sent: std::sync::Mutex<Vec<SentMessage>>,
    participants: std::sync::Mutex<Vec<Participant>>,
}

/// A message captured by [`RecordingGateway`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Destination chat.
    pub chat_id: String,
    /// Message text.
    pub text: String,
    /// Message id quoted, for replies.
    pub reply_to: Option<String>,
}

impl RecordingGateway {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder whose `group_participants` returns the given members.
    pub fn with_participants(participants: Vec<(&str, bool)>) -> Self {
        let gateway = Self::default();
        *gateway.participants.lock().expect("participants lock") = participants
            .into_iter()
            .map(|(jid, is_admin)| Participant {
                jid: jid.to_owned(),
                is_admin,
            })
            .collect();
        gateway
    }

    /// All messages sent so far, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send_reply(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: &str,
    ) -> Result<(), GatewayError> {
        self.sent
            .lock()
            .map_err(|e| GatewayError::Request(format!("lock poisoned: {e}")))?
            .push(SentMessage {
                chat_id: chat_id.to_owned(),
                text: text.to_owned(),
                reply_to: Some(reply_to.to_owned()),
            });
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError> {
        self.sent
            .lock()
            .map_err(|e| GatewayError::Request(format!("lock poisoned: {e}")))?
            .push(SentMessage {
                chat_id: chat_id.to_owned(),
                text: text.to_owned(),
                reply_to: None,
            });
        Ok(())
    }

    async fn group_participants(&self, _chat_id: &str) -> Result<Vec<Participant>, GatewayError> {
        Ok(self
            .participants
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_gateway_captures_order() {
        let gw = RecordingGateway::new();
        gw.send_message("g1@g.us", "first").await.expect("send");
        gw.send_reply("g1@g.us", "second", "m1").await.expect("send");
        let sent = gw.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "first");
        assert_eq!(sent[1].reply_to.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_with_participants() {
        let gw = RecordingGateway::with_participants(vec![("a@s.whatsapp.net", true)]);
        let members = gw.group_participants("g1@g.us").await.expect("members");
        assert_eq!(members.len(), 1);
        assert!(members[0].is_admin);
    }
}
