//! Error surfacing: handler failures, parse errors, outbound failures.

use std::sync::Arc;

use async_trait::async_trait;
use hornbill::gateway::{Gateway, GatewayError, Participant};
use hornbill::router::context::HandlerReply;
use hornbill::router::{MessageRouter, RouterOptions};
use hornbill::schema::{
    CommandDefinition, ParameterDefinition, ServiceDefinition, ServiceLoader,
};
use hornbill::services::handler;
use hornbill::state::{AuditStatus, MemoryStore, StateManager, StateStore};

use crate::common::{bot_with_participants, message, CHAT, ROOT};

fn echo_service() -> ServiceDefinition {
    ServiceDefinition {
        id: "echo".to_owned(),
        display_name: "Echo".to_owned(),
        description: "Repeats things".to_owned(),
        roles: vec![],
        allow_in_private_chat: true,
        one_cmd_per_msg: true,
        commands: vec![CommandDefinition::simple(
            "say",
            "Echo the text back",
            vec![ParameterDefinition::required("text", "string", "Text")],
        )],
        settings: vec![],
        storage: vec![],
    }
}

fn boom_service() -> ServiceDefinition {
    ServiceDefinition {
        id: "boom".to_owned(),
        display_name: "Boom".to_owned(),
        description: "Always fails".to_owned(),
        roles: vec![],
        allow_in_private_chat: true,
        one_cmd_per_msg: false,
        commands: vec![CommandDefinition::simple("crash", "Fail on purpose", vec![])],
        settings: vec![],
        storage: vec![],
    }
}

fn custom_loader() -> ServiceLoader {
    ServiceLoader::builder()
        .service(echo_service())
        .service(boom_service())
        .handler(
            "echo",
            "say",
            handler(|ctx| {
                Box::pin(async move {
                    Ok(HandlerReply::Text(format!(
                        "echo: {}",
                        ctx.arg_str("text").unwrap_or_default()
                    )))
                })
            }),
        )
        .handler(
            "boom",
            "crash",
            handler(|_ctx| Box::pin(async { Err(anyhow::anyhow!("kaboom")) })),
        )
        .build()
        .expect("catalog loads")
}

struct CustomBot {
    router: MessageRouter,
    store: Arc<MemoryStore>,
}

async fn custom_bot(gateway: Arc<dyn Gateway>) -> CustomBot {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(
        StateManager::load(Arc::clone(&store) as Arc<dyn StateStore>, ROOT)
            .await
            .expect("state loads"),
    );
    state.ensure_chat(CHAT).await.expect("chat");
    let loader = Arc::new(custom_loader());
    for def in [echo_service(), boom_service()] {
        let declared = loader.get(&def.id).expect("declared").clone();
        state
            .install_service(CHAT, &declared, &[])
            .await
            .expect("install");
    }
    let router = MessageRouter::new(loader, state, gateway, RouterOptions::default());
    CustomBot { router, store }
}

#[tokio::test]
async fn test_handler_error_surfaces_generically_and_audits_detail() {
    let gateway = Arc::new(hornbill::gateway::RecordingGateway::new());
    let bot = custom_bot(gateway).await;
    let reply = bot
        .router
        .handle_event(&message(CHAT, "u@s.whatsapp.net", ".boom crash"))
        .await
        .expect("reply");
    assert_eq!(reply, "An error occurred while processing your command");

    let records = bot.store.audit_records();
    assert_eq!(records[0].status, AuditStatus::Error);
    assert!(records[0].error.as_deref().is_some_and(|e| e.contains("kaboom")));
}

#[tokio::test]
async fn test_one_cmd_per_msg_runs_only_the_first() {
    let gateway = Arc::new(hornbill::gateway::RecordingGateway::new());
    let bot = custom_bot(gateway).await;
    let reply = bot
        .router
        .handle_event(&message(
            CHAT,
            "u@s.whatsapp.net",
            ".echo say hi\n.echo say there",
        ))
        .await
        .expect("reply");
    assert_eq!(reply, "echo: hi");
}

#[tokio::test]
async fn test_prefixed_parse_error_is_reported() {
    let bot = bot_with_participants(vec![]).await;
    bot.install_exp().await;
    let reply = bot
        .send(CHAT, ROOT, ".exp add fifty Lunch")
        .await
        .expect("reply");
    assert!(reply.contains("Could not run 'add'"), "reply was: {reply}");
    assert!(reply.contains("fifty"));
}

/// A gateway whose sends always fail.
struct DeadGateway;

#[async_trait]
impl Gateway for DeadGateway {
    async fn send_reply(&self, _: &str, _: &str, _: &str) -> Result<(), GatewayError> {
        Err(GatewayError::Request("connection refused".to_owned()))
    }

    async fn send_message(&self, _: &str, _: &str) -> Result<(), GatewayError> {
        Err(GatewayError::Request("connection refused".to_owned()))
    }

    async fn group_participants(&self, _: &str) -> Result<Vec<Participant>, GatewayError> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn test_outbound_failure_is_audited_not_retried() {
    let bot = custom_bot(Arc::new(DeadGateway)).await;
    let reply = bot
        .router
        .handle_event(&message(CHAT, "u@s.whatsapp.net", ".echo say hi"))
        .await;
    // The pipeline still produced the reply text; only delivery failed.
    assert_eq!(reply.as_deref(), Some("echo: hi"));

    let records = bot.store.audit_records();
    assert_eq!(records[0].status, AuditStatus::Error);
    assert!(records[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("outbound send failed")));
}
