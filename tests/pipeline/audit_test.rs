//! Audit records: one per message, ordered, finalized with the outcome.

use hornbill::state::AuditStatus;

use crate::common::{bot, CHAT};

const USER: &str = "u@s.whatsapp.net";

#[tokio::test]
async fn test_audit_written_in_arrival_order() {
    let bot = bot().await;
    bot.send(CHAT, USER, ".ping").await.expect("reply");
    bot.send(CHAT, USER, ".help").await.expect("reply");

    let records = bot.store.audit_records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].raw_message, ".ping");
    assert_eq!(records[1].raw_message, ".help");

    // Replies were sent in the same order.
    let sent = bot.gateway.sent();
    assert_eq!(sent[0].text, "Pong");
    assert!(sent[1].text.starts_with("*Commands*"));
}

#[tokio::test]
async fn test_successful_event_finalized_with_response() {
    let bot = bot().await;
    bot.send(CHAT, USER, ".ping").await.expect("reply");

    let records = bot.store.audit_records();
    assert_eq!(records[0].status, AuditStatus::Success);
    assert_eq!(records[0].response.as_deref(), Some("Pong"));
    assert!(records[0].error.is_none());
    assert_eq!(records[0].user_id, USER);
    assert_eq!(records[0].chat_id, CHAT);
}

#[tokio::test]
async fn test_parsed_commands_attached() {
    let bot = bot().await;
    bot.send(CHAT, USER, ".ping").await.expect("reply");

    let records = bot.store.audit_records();
    let parsed = records[0].parsed.as_ref().expect("parsed json");
    let commands = parsed.as_array().expect("array");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["command"], "ping");
}

#[tokio::test]
async fn test_ignored_message_still_audited() {
    let bot = bot().await;
    assert!(bot.send(CHAT, USER, "just chatting").await.is_none());

    let records = bot.store.audit_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AuditStatus::Success);
    assert!(records[0].response.is_none());
}
