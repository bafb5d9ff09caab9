//! Interactive sessions: prompting, collection, cancellation.

use crate::common::{bot_with_participants, CHAT};

const CHILD: &str = "kid@s.whatsapp.net";

async fn bot_with_child() -> crate::common::TestBot {
    let bot = bot_with_participants(vec![
        ("parent@s.whatsapp.net", true),
        (CHILD, false),
    ])
    .await;
    bot.install_exp().await;
    bot.grant_role("child", CHILD).await;
    bot
}

#[tokio::test]
async fn test_interactive_expense_add() {
    let bot = bot_with_child().await;

    // Bare `.exp add` opens a session prompting for the first parameter.
    let prompt = bot.send(CHAT, CHILD, ".exp add").await.expect("prompt");
    let last_line = prompt.lines().last().expect("line");
    assert_eq!(last_line, "*Amount?* _(int)_", "prompt was: {prompt}");
    assert!(prompt.contains("cancel"));

    // The amount is collected, then the item is prompted.
    let prompt = bot.send(CHAT, CHILD, "50").await.expect("prompt");
    assert!(prompt.contains("*Item?*"), "prompt was: {prompt}");

    // The final value completes the session and runs the handler.
    let reply = bot.send(CHAT, CHILD, "Lunch").await.expect("reply");
    assert_eq!(reply, "Added: Lunch - 50 (new total: 50)");

    // A later message is parsed fresh, not fed into a session.
    let reply = bot.send(CHAT, CHILD, ".ping").await.expect("reply");
    assert_eq!(reply, "Pong");
}

#[tokio::test]
async fn test_interactive_context_shows_running_total() {
    let bot = bot_with_child().await;
    bot.send(CHAT, CHILD, ".exp add 30 Taxi").await.expect("reply");

    let prompt = bot.send(CHAT, CHILD, ".exp add").await.expect("prompt");
    assert!(prompt.contains("Current total: 30"), "prompt was: {prompt}");
}

#[tokio::test]
async fn test_cancel_aborts_the_session() {
    let bot = bot_with_child().await;
    bot.send(CHAT, CHILD, ".exp add").await.expect("prompt");
    let reply = bot.send(CHAT, CHILD, "cancel").await.expect("reply");
    assert_eq!(reply, "Cancelled");

    // Nothing was recorded.
    let reply = bot.send(CHAT, CHILD, ".exp list").await.expect("reply");
    assert_eq!(reply, "No expenses recorded yet");
}

#[tokio::test]
async fn test_invalid_value_reprompts() {
    let bot = bot_with_child().await;
    bot.send(CHAT, CHILD, ".exp add").await.expect("prompt");
    let reply = bot.send(CHAT, CHILD, "a lot").await.expect("reply");
    assert!(reply.contains("not a valid int"), "reply was: {reply}");
    assert!(reply.contains("*Amount?*"));

    // The session is still live and accepts a correction.
    let prompt = bot.send(CHAT, CHILD, "25").await.expect("prompt");
    assert!(prompt.contains("*Item?*"));
}

#[tokio::test]
async fn test_message_during_prompt_is_never_reparsed() {
    let bot = bot_with_child().await;
    bot.send(CHAT, CHILD, ".exp add").await.expect("prompt");
    // Looks like a command, but the session consumes it as a value; an int
    // is expected, so it re-prompts instead of running `.ping`.
    let reply = bot.send(CHAT, CHILD, ".ping").await.expect("reply");
    assert!(reply.contains("*Amount?*"), "reply was: {reply}");
    assert!(!reply.contains("Pong"));
}

#[tokio::test]
async fn test_supplied_args_skip_the_session() {
    let bot = bot_with_child().await;
    let reply = bot.send(CHAT, CHILD, ".exp add 15 Tea").await.expect("reply");
    assert_eq!(reply, "Added: Tea - 15 (new total: 15)");
}

#[tokio::test]
async fn test_sessions_are_isolated_per_user() {
    let bot = bot_with_child().await;
    bot.grant_role("child", "other@s.whatsapp.net").await;

    bot.send(CHAT, CHILD, ".exp add").await.expect("prompt");
    // A different user in the same chat is not captured by the session.
    let reply = bot
        .send(CHAT, "other@s.whatsapp.net", ".ping")
        .await
        .expect("reply");
    assert_eq!(reply, "Pong");
}
