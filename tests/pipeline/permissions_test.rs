//! Role-based syntax selection and denials through the full pipeline.

use crate::common::{bot_with_participants, CHAT, ROOT};

const CHILD: &str = "kid@s.whatsapp.net";
const PARENT: &str = "mom@s.whatsapp.net";
const MEMBER: &str = "bystander@s.whatsapp.net";

async fn family_bot() -> crate::common::TestBot {
    let bot = bot_with_participants(vec![(PARENT, true), (CHILD, false), (MEMBER, false)]).await;
    bot.install_exp().await;
    bot.grant_role("child", CHILD).await;
    bot.grant_role("parent", PARENT).await;
    bot
}

#[tokio::test]
async fn test_child_binds_first_syntax_and_discards_surplus() {
    let bot = family_bot().await;
    bot.send(CHAT, CHILD, ".exp add 10 Bus").await.expect("reply");
    bot.send(CHAT, CHILD, ".exp add 20 Snacks").await.expect("reply");

    // Syntax 0 is {item_no, price?, item?}: tokens bind as item_no=1,
    // price=2, item="3"; the trailing `4` is discarded.
    let reply = bot.send(CHAT, CHILD, ".exp edit 1 2 3 4").await.expect("reply");
    assert_eq!(reply, "Updated: 3 - 2");

    let listing = bot.send(CHAT, CHILD, ".exp list").await.expect("reply");
    assert!(listing.contains("1. 3 - 2"), "listing was: {listing}");
    assert!(listing.contains("2. Snacks - 20"));
}

#[tokio::test]
async fn test_parent_binds_second_syntax() {
    let bot = family_bot().await;
    bot.send(CHAT, CHILD, ".exp add 10 Bus").await.expect("reply");

    // Syntax 1 is {child_no, item_no, price?, item?}: the parent edits the
    // first child's first item.
    let reply = bot
        .send(CHAT, PARENT, ".exp edit 1 1 99 Cinema")
        .await
        .expect("reply");
    assert_eq!(reply, "Updated: Cinema - 99");
}

#[tokio::test]
async fn test_member_is_denied_edit() {
    let bot = family_bot().await;
    let reply = bot.send(CHAT, MEMBER, ".exp edit 1 2 3 4").await.expect("reply");
    assert!(
        reply.to_lowercase().contains("permission"),
        "reply was: {reply}"
    );
}

#[tokio::test]
async fn test_service_denied_until_installed() {
    let bot = bot_with_participants(vec![]).await;
    let reply = bot.send(CHAT, ROOT, ".exp add 5 Tea").await.expect("reply");
    assert!(reply.contains("not installed"), "reply was: {reply}");
}

#[tokio::test]
async fn test_disabled_service_is_denied() {
    let bot = family_bot().await;
    bot.send(CHAT, ROOT, ".root service-disable exp")
        .await
        .expect("reply");
    let reply = bot.send(CHAT, CHILD, ".exp add 5 Tea").await.expect("reply");
    assert!(reply.contains("disabled"), "reply was: {reply}");

    bot.send(CHAT, ROOT, ".root service-enable exp")
        .await
        .expect("reply");
    let reply = bot.send(CHAT, CHILD, ".exp add 5 Tea").await.expect("reply");
    assert!(reply.starts_with("Added:"), "reply was: {reply}");
}

#[tokio::test]
async fn test_root_commands_denied_for_others() {
    let bot = family_bot().await;
    let reply = bot
        .send(CHAT, PARENT, ".root uninstall exp")
        .await
        .expect("reply");
    assert!(reply.contains("root permission"), "reply was: {reply}");
}

#[tokio::test]
async fn test_group_blacklist_silences_a_user() {
    let bot = family_bot().await;
    let reply = bot
        .send(CHAT, ROOT, &format!(".admin blacklist-add {MEMBER}"))
        .await
        .expect("reply");
    assert!(reply.contains("Blacklisted"), "reply was: {reply}");

    let reply = bot.send(CHAT, MEMBER, ".ping").await.expect("reply");
    assert!(reply.contains("not allowed"), "reply was: {reply}");

    // Other users are unaffected.
    assert_eq!(bot.send(CHAT, CHILD, ".ping").await.as_deref(), Some("Pong"));

    bot.send(CHAT, ROOT, &format!(".admin blacklist-remove {MEMBER}"))
        .await
        .expect("reply");
    assert_eq!(bot.send(CHAT, MEMBER, ".ping").await.as_deref(), Some("Pong"));
}

#[tokio::test]
async fn test_command_scoped_blacklist() {
    let bot = family_bot().await;
    bot.send(
        CHAT,
        ROOT,
        &format!(".root blacklist-add {CHILD} * exp add"),
    )
    .await
    .expect("reply");

    // Only `exp add` is denied; everything else still works.
    let reply = bot.send(CHAT, CHILD, ".exp add 5 Tea").await.expect("reply");
    assert!(reply.contains("not allowed"), "reply was: {reply}");
    assert_eq!(bot.send(CHAT, CHILD, ".ping").await.as_deref(), Some("Pong"));
}

#[tokio::test]
async fn test_private_chat_denies_group_only_service() {
    let bot = bot_with_participants(vec![]).await;
    let private = "someone@s.whatsapp.net";
    // Root installs in the private chat, but exp does not allow private use.
    bot.send(private, ROOT, ".root install exp").await.expect("reply");
    let reply = bot.send(private, ROOT, ".exp add 5 Tea").await.expect("reply");
    assert!(
        reply.contains("not available in private chats"),
        "reply was: {reply}"
    );
}
