//! The smallest end-to-end path: `.ping` → `Pong`.

use crate::common::{bot, message, CHAT, DEVICE};

#[tokio::test]
async fn test_ping_pong() {
    let bot = bot().await;
    let reply = bot.send(CHAT, "anyone@s.whatsapp.net", ".ping").await;
    assert_eq!(reply.as_deref(), Some("Pong"));
}

#[tokio::test]
async fn test_ping_reply_quotes_original_message() {
    let bot = bot().await;
    let event = message(CHAT, "anyone@s.whatsapp.net", ".ping");
    let original_id = event.message().expect("payload").id;
    bot.router.handle_event(&event).await;

    let sent = bot.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, CHAT);
    assert_eq!(sent[0].text, "Pong");
    assert_eq!(sent[0].reply_to.as_deref(), Some(original_id.as_str()));
}

#[tokio::test]
async fn test_ping_works_in_private_chat() {
    let bot = bot().await;
    let reply = bot
        .send("u1@s.whatsapp.net", "u1@s.whatsapp.net", ".ping")
        .await;
    assert_eq!(reply.as_deref(), Some("Pong"));
}

#[tokio::test]
async fn test_self_message_is_skipped() {
    let bot = bot().await;
    let reply = bot.send(CHAT, DEVICE, ".ping").await;
    assert!(reply.is_none());
    assert!(bot.gateway.sent().is_empty());
}

#[tokio::test]
async fn test_unprefixed_chatter_is_ignored() {
    let bot = bot().await;
    assert!(bot.send(CHAT, "u@s.whatsapp.net", "good morning").await.is_none());
    assert!(bot.send(CHAT, "u@s.whatsapp.net", "..ellipsis").await.is_none());
}

#[tokio::test]
async fn test_unknown_command_gets_help_hint() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, "u@s.whatsapp.net", ".frobnicate")
        .await
        .expect("reply");
    assert!(reply.contains("Unknown command 'frobnicate'"));
    assert!(reply.contains(".help"));
}
