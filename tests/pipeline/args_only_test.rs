//! Args-only mode: bare lines bound to a designated command.

use crate::common::{bot_with_participants, CHAT, ROOT};

const USER: &str = "someone@s.whatsapp.net";

async fn args_only_bot() -> crate::common::TestBot {
    let bot = bot_with_participants(vec![(USER, false)]).await;
    bot.install_exp().await;
    let reply = bot
        .send(CHAT, ROOT, ".admin args-only exp add")
        .await
        .expect("reply");
    assert!(reply.contains("exp add"), "reply was: {reply}");
    bot
}

#[tokio::test]
async fn test_bare_line_executes_designated_command() {
    let bot = args_only_bot().await;
    let reply = bot.send(CHAT, USER, "75 Coffee").await.expect("reply");
    assert_eq!(reply, "Added: Coffee - 75 (new total: 75)");
}

#[tokio::test]
async fn test_non_matching_bare_line_is_silent() {
    let bot = args_only_bot().await;
    assert!(bot.send(CHAT, USER, "hello world").await.is_none());
    assert!(bot.send(CHAT, USER, "75").await.is_none());
}

#[tokio::test]
async fn test_args_only_is_idempotent() {
    let bot = args_only_bot().await;
    let first = bot.send(CHAT, USER, "10 Tea").await.expect("reply");
    assert_eq!(first, "Added: Tea - 10 (new total: 10)");
    let second = bot.send(CHAT, USER, "10 Tea").await.expect("reply");
    assert_eq!(second, "Added: Tea - 10 (new total: 20)");
}

#[tokio::test]
async fn test_prefixed_commands_still_work() {
    let bot = args_only_bot().await;
    assert_eq!(bot.send(CHAT, USER, ".ping").await.as_deref(), Some("Pong"));
}

#[tokio::test]
async fn test_args_only_ignored_after_uninstall() {
    let bot = args_only_bot().await;
    bot.send(CHAT, ROOT, ".root uninstall exp").await.expect("reply");
    assert!(bot.send(CHAT, USER, "75 Coffee").await.is_none());
}

#[tokio::test]
async fn test_args_only_cleared_with_wildcard() {
    let bot = args_only_bot().await;
    let reply = bot
        .send(CHAT, ROOT, ".admin args-only *")
        .await
        .expect("reply");
    assert!(reply.contains("cleared"), "reply was: {reply}");
    assert!(bot.send(CHAT, USER, "75 Coffee").await.is_none());
}
