//! Group membership events keep the role graph in step.

use crate::common::{bot_with_participants, participants_event, CHAT};

const ADMIN: &str = "a@s.whatsapp.net";
const MEMBER: &str = "b@s.whatsapp.net";

async fn installed_bot() -> crate::common::TestBot {
    let bot = bot_with_participants(vec![(ADMIN, true), (MEMBER, false)]).await;
    bot.install_exp().await;
    bot
}

#[tokio::test]
async fn test_install_partitions_roles() {
    let bot = installed_bot().await;
    assert_eq!(
        bot.state.users_with_role(CHAT, "exp", "admin").await,
        [ADMIN]
    );
    assert_eq!(
        bot.state.users_with_role(CHAT, "exp", "member").await,
        [MEMBER]
    );
    assert!(bot.state.users_with_role(CHAT, "exp", "child").await.is_empty());
}

#[tokio::test]
async fn test_promote_then_leave() {
    let bot = installed_bot().await;

    bot.router
        .handle_event(&participants_event(CHAT, "promote", &[MEMBER]))
        .await;
    assert_eq!(
        bot.state.users_with_role(CHAT, "exp", "admin").await,
        [ADMIN, MEMBER]
    );
    assert!(bot.state.users_with_role(CHAT, "exp", "member").await.is_empty());

    bot.router
        .handle_event(&participants_event(CHAT, "leave", &[MEMBER]))
        .await;
    for role in ["admin", "member", "parent", "child"] {
        let users = bot.state.users_with_role(CHAT, "exp", role).await;
        assert!(
            !users.iter().any(|u| u == MEMBER),
            "{MEMBER} still holds {role}"
        );
    }
    // The untouched admin keeps their role.
    assert_eq!(
        bot.state.users_with_role(CHAT, "exp", "admin").await,
        [ADMIN]
    );
}

#[tokio::test]
async fn test_join_and_demote_restore_member() {
    let bot = installed_bot().await;
    let newcomer = "c@s.whatsapp.net";

    bot.router
        .handle_event(&participants_event(CHAT, "join", &[newcomer]))
        .await;
    assert!(bot
        .state
        .users_with_role(CHAT, "exp", "member")
        .await
        .iter()
        .any(|u| u == newcomer));

    bot.router
        .handle_event(&participants_event(CHAT, "promote", &[newcomer]))
        .await;
    bot.router
        .handle_event(&participants_event(CHAT, "demote", &[newcomer]))
        .await;
    assert!(bot
        .state
        .users_with_role(CHAT, "exp", "member")
        .await
        .iter()
        .any(|u| u == newcomer));
    assert!(!bot
        .state
        .users_with_role(CHAT, "exp", "admin")
        .await
        .iter()
        .any(|u| u == newcomer));
}

#[tokio::test]
async fn test_unknown_change_kind_is_ignored() {
    let bot = installed_bot().await;
    bot.router
        .handle_event(&participants_event(CHAT, "modify", &[MEMBER]))
        .await;
    assert_eq!(
        bot.state.users_with_role(CHAT, "exp", "member").await,
        [MEMBER]
    );
}

#[tokio::test]
async fn test_event_for_unknown_chat_is_harmless() {
    let bot = installed_bot().await;
    bot.router
        .handle_event(&participants_event("other@g.us", "leave", &[MEMBER]))
        .await;
    assert_eq!(
        bot.state.users_with_role(CHAT, "exp", "member").await,
        [MEMBER]
    );
}
