//! Multi-line messages: ordering, interactive limits, reply joining.

use crate::common::{bot, bot_with_participants, CHAT};

const CHILD: &str = "kid@s.whatsapp.net";

#[tokio::test]
async fn test_commands_execute_in_order_and_replies_join() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, "u@s.whatsapp.net", ".ping\n.ping")
        .await
        .expect("reply");
    assert_eq!(reply, "Pong\nPong");
}

#[tokio::test]
async fn test_noise_lines_between_commands_are_discarded() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, "u@s.whatsapp.net", ".ping\nsome chatter\n.ping")
        .await
        .expect("reply");
    assert_eq!(reply, "Pong\nPong");
}

#[tokio::test]
async fn test_at_most_one_interactive_command() {
    let bot = bot_with_participants(vec![(CHILD, false)]).await;
    bot.install_exp().await;
    bot.grant_role("child", CHILD).await;

    let reply = bot
        .send(CHAT, CHILD, ".exp add\n.exp delete")
        .await
        .expect("reply");
    assert_eq!(reply, "Only one interactive command per message");
    // No session was opened.
    assert_eq!(bot.send(CHAT, CHILD, ".ping").await.as_deref(), Some("Pong"));
}

#[tokio::test]
async fn test_one_interactive_plus_plain_commands_is_fine() {
    let bot = bot_with_participants(vec![(CHILD, false)]).await;
    bot.install_exp().await;
    bot.grant_role("child", CHILD).await;

    let reply = bot.send(CHAT, CHILD, ".ping\n.exp add").await.expect("reply");
    assert!(reply.starts_with("Pong\n"), "reply was: {reply}");
    assert!(reply.contains("*Amount?*"));
}

#[tokio::test]
async fn test_mixed_known_and_unknown_lines() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, "u@s.whatsapp.net", ".ping\n.frobnicate")
        .await
        .expect("reply");
    assert!(reply.starts_with("Pong\n"));
    assert!(reply.contains("Unknown command 'frobnicate'"));
}
