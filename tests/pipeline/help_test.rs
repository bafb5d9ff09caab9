//! Help overview and detail routing.

use crate::common::{bot, CHAT, ROOT};

#[tokio::test]
async fn test_help_overview_for_plain_user() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, "plain@s.whatsapp.net", ".help")
        .await
        .expect("reply");

    assert!(reply.starts_with("*Commands*"), "reply was: {reply}");
    // Every builtin command appears as a bullet, in declaration order.
    let ping_at = reply.find("- ping —").expect("ping bullet");
    let help_at = reply.find("- help —").expect("help bullet");
    assert!(ping_at < help_at);
    // Privileged sections stay hidden.
    assert!(!reply.contains("*Root*"));
    assert!(!reply.contains("*Admin*"));
}

#[tokio::test]
async fn test_help_overview_for_root_shows_everything() {
    let bot = bot().await;
    bot.install_exp().await;
    let reply = bot.send(CHAT, ROOT, ".help").await.expect("reply");
    assert!(reply.starts_with("*Commands*"));
    assert!(reply.contains("*Admin*"));
    assert!(reply.contains("*Root*"));
    assert!(reply.contains("*Expenses*"));
}

#[tokio::test]
async fn test_help_detail_for_service_command() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, "plain@s.whatsapp.net", ".help exp add")
        .await
        .expect("reply");
    assert!(reply.contains("`.exp add <amount> <item>`"));
}

#[tokio::test]
async fn test_help_detail_unknown_topic() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, "plain@s.whatsapp.net", ".help frobnicate")
        .await
        .expect("reply");
    assert!(reply.contains("Unknown command 'frobnicate'"));
}
