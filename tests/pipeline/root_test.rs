//! Root operator flows: install lifecycle, root grants, global switches.

use crate::common::{bot, bot_with_participants, CHAT, ROOT};

const USER: &str = "u@s.whatsapp.net";

#[tokio::test]
async fn test_install_then_uninstall() {
    let bot = bot_with_participants(vec![(USER, false)]).await;
    bot.install_exp().await;
    assert!(bot.state.is_installed(CHAT, "exp").await);

    let reply = bot.send(CHAT, ROOT, ".root install exp").await.expect("reply");
    assert!(reply.contains("already installed"), "reply was: {reply}");

    let reply = bot.send(CHAT, ROOT, ".root uninstall exp").await.expect("reply");
    assert_eq!(reply, "Service 'exp' uninstalled");
    assert!(!bot.state.is_installed(CHAT, "exp").await);
}

#[tokio::test]
async fn test_install_unknown_service() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, ROOT, ".root install nonsense")
        .await
        .expect("reply");
    assert!(reply.contains("unknown service"), "reply was: {reply}");
}

#[tokio::test]
async fn test_root_grant_and_revoke() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, ROOT, &format!(".root root-add {USER}"))
        .await
        .expect("reply");
    assert!(reply.contains("is now a root user"));

    // The new root can run root commands.
    let reply = bot.send(CHAT, USER, ".root settings").await.expect("reply");
    assert!(reply.starts_with("*Global settings*"), "reply was: {reply}");

    bot.send(CHAT, ROOT, &format!(".root root-remove {USER}"))
        .await
        .expect("reply");
    let reply = bot.send(CHAT, USER, ".root settings").await.expect("reply");
    assert!(reply.contains("root permission"), "reply was: {reply}");
}

#[tokio::test]
async fn test_last_root_cannot_remove_itself() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, ROOT, &format!(".root root-remove {ROOT}"))
        .await
        .expect("reply");
    assert_eq!(reply, "Error: cannot remove the last root user");
    assert!(bot.state.is_root(ROOT).await);
}

#[tokio::test]
async fn test_global_disable_blocks_everyone_but_root_scope() {
    let bot = bot().await;
    bot.send(CHAT, ROOT, ".root bot-disable").await.expect("reply");

    let reply = bot.send(CHAT, USER, ".ping").await.expect("reply");
    assert!(reply.contains("disabled"), "reply was: {reply}");

    // Root can switch it back on from chat.
    let reply = bot.send(CHAT, ROOT, ".root bot-enable").await.expect("reply");
    assert_eq!(reply, "Bot enabled");
    assert_eq!(bot.send(CHAT, USER, ".ping").await.as_deref(), Some("Pong"));
}

#[tokio::test]
async fn test_invoke_pattern_override_at_runtime() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, ROOT, ".root set invoke_prefix_pattern ^!(.+)$")
        .await
        .expect("reply");
    assert!(reply.contains("Invocation pattern set"), "reply was: {reply}");

    // The new prefix works; the old one is no longer recognized.
    assert_eq!(bot.send(CHAT, USER, "!ping").await.as_deref(), Some("Pong"));
    assert!(bot.send(CHAT, USER, ".ping").await.is_none());

    // Root commands still use the new prefix to reset.
    let reply = bot
        .send(CHAT, ROOT, "!root set invoke_prefix_pattern default")
        .await
        .expect("reply");
    assert!(reply.contains("reset"), "reply was: {reply}");
    assert_eq!(bot.send(CHAT, USER, ".ping").await.as_deref(), Some("Pong"));
}

#[tokio::test]
async fn test_invalid_pattern_is_rejected() {
    let bot = bot().await;
    let reply = bot
        .send(CHAT, ROOT, ".root set invoke_prefix_pattern ([")
        .await
        .expect("reply");
    assert!(reply.starts_with("Error: invalid pattern"), "reply was: {reply}");
    // Parsing still works with the default pattern.
    assert_eq!(bot.send(CHAT, USER, ".ping").await.as_deref(), Some("Pong"));
}
