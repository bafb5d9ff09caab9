//! Shared fixture: a router wired to in-memory state and a recording
//! gateway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hornbill::gateway::events::InboundEvent;
use hornbill::gateway::RecordingGateway;
use hornbill::router::{MessageRouter, RouterOptions};
use hornbill::services;
use hornbill::state::{MemoryStore, StateManager, StateStore};

/// The chat used by most scenarios.
pub const CHAT: &str = "g1@g.us";
/// The seeded root operator.
pub const ROOT: &str = "root@s.whatsapp.net";
/// Device id of the bot itself.
pub const DEVICE: &str = "device1";

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

pub struct TestBot {
    pub router: MessageRouter,
    pub state: Arc<StateManager>,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<RecordingGateway>,
}

/// A bot whose gateway reports the given group participants.
pub async fn bot_with_participants(participants: Vec<(&str, bool)>) -> TestBot {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(
        StateManager::load(Arc::clone(&store) as Arc<dyn StateStore>, ROOT)
            .await
            .expect("state loads"),
    );
    let gateway = Arc::new(RecordingGateway::with_participants(participants));
    let loader = Arc::new(services::default_loader().expect("catalog loads"));
    let router = MessageRouter::new(
        loader,
        Arc::clone(&state),
        Arc::clone(&gateway) as Arc<dyn hornbill::gateway::Gateway>,
        RouterOptions::default(),
    );
    TestBot {
        router,
        state,
        store,
        gateway,
    }
}

/// A bot with an empty participant list.
pub async fn bot() -> TestBot {
    bot_with_participants(vec![]).await
}

/// Build a `message` event as the gateway would deliver it.
pub fn message(chat_id: &str, from: &str, body: &str) -> InboundEvent {
    let id = MESSAGE_COUNTER.fetch_add(1, Ordering::SeqCst);
    serde_json::from_value(serde_json::json!({
        "event": "message",
        "device_id": DEVICE,
        "payload": {
            "id": format!("m{id}"),
            "chat_id": chat_id,
            "from": from,
            "from_name": from.split('@').next().unwrap_or(from),
            "body": body,
            "timestamp": 1_700_000_000_u64.saturating_add(id),
        }
    }))
    .expect("event decodes")
}

/// Build a `group.participants` event.
pub fn participants_event(chat_id: &str, kind: &str, jids: &[&str]) -> InboundEvent {
    serde_json::from_value(serde_json::json!({
        "event": "group.participants",
        "device_id": DEVICE,
        "payload": { "chat_id": chat_id, "type": kind, "jids": jids }
    }))
    .expect("event decodes")
}

impl TestBot {
    /// Send a message into the pipeline, returning the reply.
    pub async fn send(&self, chat_id: &str, from: &str, body: &str) -> Option<String> {
        self.router.handle_event(&message(chat_id, from, body)).await
    }

    /// Install `exp` into [`CHAT`] as the root operator.
    pub async fn install_exp(&self) {
        let reply = self.send(CHAT, ROOT, ".root install exp").await;
        assert_eq!(
            reply.as_deref(),
            Some("Service 'Expenses' installed"),
            "install failed: {reply:?}"
        );
    }

    /// Grant a service role directly in state.
    pub async fn grant_role(&self, role: &str, user: &str) {
        self.state
            .add_user_role(CHAT, "exp", role, user)
            .await
            .expect("role granted");
    }
}
