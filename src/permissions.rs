//! Layered authorization: enable flags, blacklists, scope rules, syntax
//! selection.
//!
//! The manager answers one question per parsed command: may this user run
//! it here, and against which syntax? Denials carry a single human-readable
//! reason and no detail beyond that.

use std::sync::Arc;

use thiserror::Error;

use crate::parser::command::ParsedCommand;
use crate::schema::{CommandDefinition, CommandScope, ServiceLoader};
use crate::state::StateManager;

/// Why a command was denied. The display string is the full user-facing
/// reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    /// The bot is switched off globally.
    #[error("The bot is currently disabled")]
    BotDisabled,
    /// The bot is switched off in this chat.
    #[error("The bot is disabled in this chat")]
    BotDisabledInChat,
    /// A blacklist entry matched.
    #[error("You are not allowed to use this command here")]
    Blacklisted,
    /// Root scope without the root role.
    #[error("This command requires root permission")]
    RootRequired,
    /// Admin scope without an admin role in any installed service.
    #[error("This command requires admin permission in this chat")]
    AdminRequired,
    /// Service commands need the service installed first.
    #[error("Service '{0}' is not installed in this chat")]
    NotInstalled(String),
    /// The installed service is switched off.
    #[error("Service '{0}' is disabled in this chat")]
    ServiceDisabled(String),
    /// The service does not run in private chats.
    #[error("Service '{0}' is not available in private chats")]
    NoPrivateChat(String),
    /// No syntax admits any of the caller's roles.
    #[error("You do not have permission to use this command")]
    NoMatchingSyntax,
    /// The command vanished between parsing and authorization.
    #[error("Unknown command")]
    UnknownCommand,
}

/// A granted authorization.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// The caller's effective roles at grant time.
    pub effective_roles: Vec<String>,
    /// Index of the selected syntax.
    pub syntax_index: usize,
}

/// The lowest-indexed syntax whose role set contains `*` or intersects
/// `user_roles`; `None` when no syntax admits the caller.
pub fn get_best_matching_syntax(
    user_roles: &[String],
    def: &CommandDefinition,
) -> Option<usize> {
    (0..def.syntaxes.len()).find(|&i| {
        def.roles_for_syntax(i)
            .iter()
            .any(|allowed| allowed == "*" || user_roles.iter().any(|r| r == allowed))
    })
}

/// Role and blacklist evaluation over the shared state.
pub struct PermissionManager {
    state: Arc<StateManager>,
    loader: Arc<ServiceLoader>,
}

impl PermissionManager {
    /// Build a manager over the shared state and catalog.
    pub fn new(state: Arc<StateManager>, loader: Arc<ServiceLoader>) -> Self {
        Self { state, loader }
    }

    /// Effective role set of `(user, chat, service)`. Root users carry
    /// `root` and `admin` everywhere; service roles come from the instance
    /// role lists (wildcard entries grant the role to everyone).
    pub async fn effective_roles(
        &self,
        chat_id: &str,
        user_id: &str,
        service: Option<&str>,
    ) -> Vec<String> {
        let mut roles = Vec::new();
        if self.state.is_root(user_id).await {
            roles.push("root".to_owned());
            roles.push("admin".to_owned());
        }
        if let Some(service) = service {
            if let Some(instance) = self.state.service_instance(chat_id, service).await {
                for (role, users) in &instance.roles {
                    if users.iter().any(|u| u == user_id || u == "*")
                        && !roles.iter().any(|r| r == role)
                    {
                        roles.push(role.clone());
                    }
                }
            }
        }
        roles
    }

    /// Whether any blacklist entry (global first, then group) denies the
    /// call.
    pub async fn is_blacklisted(
        &self,
        chat_id: &str,
        user_id: &str,
        service: Option<&str>,
        command: &str,
    ) -> bool {
        self.state
            .read(|s| {
                let global = s
                    .root
                    .global_blacklist
                    .iter()
                    .any(|e| e.matches(user_id, chat_id, service, command));
                if global {
                    return true;
                }
                s.chats.get(chat_id).is_some_and(|c| {
                    c.group_blacklist
                        .iter()
                        .any(|e| e.matches(user_id, chat_id, service, command))
                })
            })
            .await
    }

    /// Authorize a parsed command for `(chat, user)`.
    pub async fn authorize(
        &self,
        chat_id: &str,
        user_id: &str,
        is_private: bool,
        parsed: &ParsedCommand,
    ) -> Result<Authorization, Denial> {
        let def = self
            .loader
            .get_command(&parsed.scope, &parsed.command)
            .ok_or(Denial::UnknownCommand)?;

        // Root commands stay reachable while the bot is disabled, so the
        // operator can switch it back on from chat.
        if parsed.scope != CommandScope::Root {
            if !self.state.bot_enabled().await {
                return Err(Denial::BotDisabled);
            }
            if !self.state.admin_settings(chat_id).await.bot_enabled {
                return Err(Denial::BotDisabledInChat);
            }
        }

        let service = match &parsed.scope {
            CommandScope::Service(id) => Some(id.as_str()),
            _ => None,
        };
        if self
            .is_blacklisted(chat_id, user_id, service, &parsed.command)
            .await
        {
            return Err(Denial::Blacklisted);
        }

        let mut roles = self.effective_roles(chat_id, user_id, service).await;
        let is_root = roles.iter().any(|r| r == "root");

        match &parsed.scope {
            CommandScope::Builtin => {}
            CommandScope::Root => {
                if !is_root {
                    return Err(Denial::RootRequired);
                }
            }
            CommandScope::Admin => {
                if !is_root {
                    if is_private {
                        return Err(Denial::AdminRequired);
                    }
                    if !self.state.is_service_admin_anywhere(chat_id, user_id).await {
                        return Err(Denial::AdminRequired);
                    }
                    roles.push("admin".to_owned());
                }
            }
            CommandScope::Service(id) => {
                let instance = self
                    .state
                    .service_instance(chat_id, id)
                    .await
                    .ok_or_else(|| Denial::NotInstalled(id.clone()))?;
                if !instance.enabled {
                    return Err(Denial::ServiceDisabled(id.clone()));
                }
                let allows_private = self
                    .loader
                    .get(id)
                    .is_some_and(|d| d.allow_in_private_chat);
                if is_private && !allows_private {
                    return Err(Denial::NoPrivateChat(id.clone()));
                }
            }
        }

        let syntax_index =
            get_best_matching_syntax(&roles, def).ok_or(Denial::NoMatchingSyntax)?;
        Ok(Authorization {
            effective_roles: roles,
            syntax_index,
        })
    }
}
