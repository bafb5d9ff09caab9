//! Runtime state: the mutable document, its manager, and the store behind it.

pub mod encode;
pub mod model;
pub mod store;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub use model::{
    ArgsOnlyBinding, AuditRecord, AuditStatus, AdminSettings, BlacklistEntry, BotState, ChatState,
    ChatType, RootState, ServiceInstance, Session, WILDCARD,
};
pub use store::{MemoryStore, SqliteStore, StateStore, StoreError};

use crate::schema::ServiceDefinition;

/// State mutation or lookup failure.
#[derive(Debug, Error)]
pub enum StateError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The chat has no state yet.
    #[error("unknown chat '{0}'")]
    ChatNotFound(String),
    /// The service is not installed in the chat.
    #[error("service '{service}' is not installed in this chat")]
    ServiceNotInstalled {
        /// Service id.
        service: String,
    },
    /// The service is already installed in the chat.
    #[error("service '{service}' is already installed in this chat")]
    AlreadyInstalled {
        /// Service id.
        service: String,
    },
    /// The role is not declared by the service.
    #[error("service '{service}' has no role '{role}'")]
    UnknownRole {
        /// Service id.
        service: String,
        /// Role name.
        role: String,
    },
    /// The storage list is not declared by the service.
    #[error("service '{service}' declares no storage '{name}'")]
    StorageNotDeclared {
        /// Service id.
        service: String,
        /// Storage name.
        name: String,
    },
    /// Removing the last root user is refused.
    #[error("cannot remove the last root user")]
    LastRootUser,
}

/// A group membership change from the upstream gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    /// Users joined the group.
    Join,
    /// Users left (or were removed from) the group.
    Leave,
    /// Users were made group admins.
    Promote,
    /// Users were demoted to plain members.
    Demote,
}

/// Owner of the mutable state document.
///
/// All reads and mutations go through this manager; every mutation is
/// persisted through the store before returning. Event-level serialization
/// is the router's job (per-chat locks); the internal `RwLock` only guards
/// the in-memory aggregate.
pub struct StateManager {
    state: RwLock<BotState>,
    store: Arc<dyn StateStore>,
}

impl StateManager {
    /// Load the document from the store, creating and seeding it with the
    /// initial root user on first boot.
    pub async fn load(store: Arc<dyn StateStore>, initial_root: &str) -> Result<Self, StateError> {
        let state = match store.load().await? {
            Some(state) => {
                debug!(chats = state.chats.len(), "state document loaded");
                state
            }
            None => {
                let mut state = BotState::default();
                if !initial_root.is_empty() {
                    state.root.root_users.insert(initial_root.to_owned());
                }
                store.save(&state).await?;
                info!(root = initial_root, "state document created");
                state
            }
        };
        Ok(Self {
            state: RwLock::new(state),
            store,
        })
    }

    /// The store this manager persists through.
    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.store)
    }

    /// Run a closure over a read snapshot of the document.
    pub async fn read<R>(&self, f: impl FnOnce(&BotState) -> R) -> R {
        let state = self.state.read().await;
        f(&state)
    }

    /// Apply a mutation and persist the document.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut BotState) -> R) -> Result<R, StateError> {
        let mut state = self.state.write().await;
        let result = f(&mut state);
        self.store.save(&state).await?;
        Ok(result)
    }

    /// Apply a fallible mutation; the document is persisted only on success.
    pub async fn try_mutate<R>(
        &self,
        f: impl FnOnce(&mut BotState) -> Result<R, StateError>,
    ) -> Result<R, StateError> {
        let mut state = self.state.write().await;
        let result = f(&mut state)?;
        self.store.save(&state).await?;
        Ok(result)
    }

    // ── Root state ──────────────────────────────────────────────

    /// Whether `user_id` is a root user.
    pub async fn is_root(&self, user_id: &str) -> bool {
        self.read(|s| s.root.root_users.contains(user_id)).await
    }

    /// Whether the bot is globally enabled.
    pub async fn bot_enabled(&self) -> bool {
        self.read(|s| s.root.bot_enabled).await
    }

    /// Enable or disable the bot globally.
    pub async fn set_bot_enabled(&self, enabled: bool) -> Result<(), StateError> {
        self.mutate(|s| s.root.bot_enabled = enabled).await
    }

    /// Grant root to a user. Returns false when already present.
    pub async fn add_root_user(&self, user_id: &str) -> Result<bool, StateError> {
        self.mutate(|s| s.root.root_users.insert(user_id.to_owned()))
            .await
    }

    /// Revoke root from a user; the last root user cannot be removed.
    pub async fn remove_root_user(&self, user_id: &str) -> Result<bool, StateError> {
        self.try_mutate(|s| {
            if s.root.root_users.contains(user_id) && s.root.root_users.len() == 1 {
                return Err(StateError::LastRootUser);
            }
            Ok(s.root.root_users.remove(user_id))
        })
        .await
    }

    // ── Chats ───────────────────────────────────────────────────

    /// Create chat state on first contact; type inferred from the id.
    pub async fn ensure_chat(&self, chat_id: &str) -> Result<(), StateError> {
        let exists = self.read(|s| s.chats.contains_key(chat_id)).await;
        if exists {
            return Ok(());
        }
        let chat_type = ChatType::from_chat_id(chat_id);
        self.mutate(|s| {
            s.chats
                .entry(chat_id.to_owned())
                .or_insert_with(|| ChatState::new(chat_type));
        })
        .await?;
        debug!(chat_id, ?chat_type, "chat state created");
        Ok(())
    }

    /// Admin settings of a chat (defaults when the chat is unknown).
    pub async fn admin_settings(&self, chat_id: &str) -> AdminSettings {
        self.read(|s| {
            s.chats
                .get(chat_id)
                .map(|c| c.admin_settings.clone())
                .unwrap_or_default()
        })
        .await
    }

    /// Update a chat's admin settings in place.
    pub async fn update_admin_settings(
        &self,
        chat_id: &str,
        f: impl FnOnce(&mut AdminSettings),
    ) -> Result<(), StateError> {
        self.try_mutate(|s| {
            let chat = s
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?;
            f(&mut chat.admin_settings);
            Ok(())
        })
        .await
    }

    // ── Services ────────────────────────────────────────────────

    /// Install a service into a chat, partitioning `participants`
    /// (`(user_id, is_group_admin)`) into the admin and member role lists.
    /// Every other declared role starts empty; declared storage starts
    /// empty.
    pub async fn install_service(
        &self,
        chat_id: &str,
        def: &ServiceDefinition,
        participants: &[(String, bool)],
    ) -> Result<(), StateError> {
        self.try_mutate(|s| {
            let chat = s
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?;
            if chat.services.contains_key(&def.id) {
                return Err(StateError::AlreadyInstalled {
                    service: def.id.clone(),
                });
            }

            let mut roles: std::collections::BTreeMap<String, Vec<String>> =
                def.roles.iter().map(|r| (r.clone(), Vec::new())).collect();
            for (user, is_admin) in participants {
                let bucket = if *is_admin { "admin" } else { "member" };
                if let Some(list) = roles.get_mut(bucket) {
                    list.push(user.clone());
                }
            }
            let storage = def
                .storage
                .iter()
                .map(|name| (name.clone(), Vec::new()))
                .collect();

            chat.services.insert(
                def.id.clone(),
                ServiceInstance {
                    enabled: true,
                    roles,
                    settings: def
                        .settings
                        .iter()
                        .map(|s| (s.name.clone(), s.default.clone()))
                        .collect(),
                    storage,
                },
            );
            Ok(())
        })
        .await?;
        info!(chat_id, service = %def.id, "service installed");
        Ok(())
    }

    /// Remove a service instance. Returns false when it was not installed.
    pub async fn uninstall_service(
        &self,
        chat_id: &str,
        service: &str,
    ) -> Result<bool, StateError> {
        let removed = self
            .mutate(|s| {
                s.chats
                    .get_mut(chat_id)
                    .is_some_and(|c| c.services.remove(service).is_some())
            })
            .await?;
        if removed {
            info!(chat_id, service, "service uninstalled");
        }
        Ok(removed)
    }

    /// Whether a service is installed in a chat.
    pub async fn is_installed(&self, chat_id: &str, service: &str) -> bool {
        self.read(|s| {
            s.chats
                .get(chat_id)
                .is_some_and(|c| c.services.contains_key(service))
        })
        .await
    }

    /// Clone of a service instance, if installed.
    pub async fn service_instance(
        &self,
        chat_id: &str,
        service: &str,
    ) -> Option<ServiceInstance> {
        self.read(|s| {
            s.chats
                .get(chat_id)
                .and_then(|c| c.services.get(service))
                .cloned()
        })
        .await
    }

    /// Enable or disable an installed service in a chat.
    pub async fn set_service_enabled(
        &self,
        chat_id: &str,
        service: &str,
        enabled: bool,
    ) -> Result<(), StateError> {
        self.try_mutate(|s| {
            let instance = s
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?
                .services
                .get_mut(service)
                .ok_or_else(|| StateError::ServiceNotInstalled {
                    service: service.to_owned(),
                })?;
            instance.enabled = enabled;
            Ok(())
        })
        .await
    }

    // ── Roles ───────────────────────────────────────────────────

    /// Ordered user ids holding `role` in `(chat, service)`.
    pub async fn users_with_role(&self, chat_id: &str, service: &str, role: &str) -> Vec<String> {
        self.read(|s| {
            s.chats
                .get(chat_id)
                .and_then(|c| c.services.get(service))
                .and_then(|i| i.roles.get(role))
                .cloned()
                .unwrap_or_default()
        })
        .await
    }

    /// Add a user to a declared role list. Returns false when already there.
    pub async fn add_user_role(
        &self,
        chat_id: &str,
        service: &str,
        role: &str,
        user_id: &str,
    ) -> Result<bool, StateError> {
        self.try_mutate(|s| {
            let instance = s
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?
                .services
                .get_mut(service)
                .ok_or_else(|| StateError::ServiceNotInstalled {
                    service: service.to_owned(),
                })?;
            let list = instance
                .roles
                .get_mut(role)
                .ok_or_else(|| StateError::UnknownRole {
                    service: service.to_owned(),
                    role: role.to_owned(),
                })?;
            if list.iter().any(|u| u == user_id) {
                return Ok(false);
            }
            list.push(user_id.to_owned());
            Ok(true)
        })
        .await
    }

    /// Remove a user from a role list. Returns false when not present.
    pub async fn remove_user_role(
        &self,
        chat_id: &str,
        service: &str,
        role: &str,
        user_id: &str,
    ) -> Result<bool, StateError> {
        self.try_mutate(|s| {
            let instance = s
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?
                .services
                .get_mut(service)
                .ok_or_else(|| StateError::ServiceNotInstalled {
                    service: service.to_owned(),
                })?;
            let list = instance
                .roles
                .get_mut(role)
                .ok_or_else(|| StateError::UnknownRole {
                    service: service.to_owned(),
                    role: role.to_owned(),
                })?;
            let before = list.len();
            list.retain(|u| u != user_id);
            Ok(list.len() < before)
        })
        .await
    }

    /// Apply a group membership change to every installed service of the
    /// chat: join and demote restore plain membership, promote moves the
    /// user to the admin list, leave removes the user from every role list.
    pub async fn apply_participant_change(
        &self,
        chat_id: &str,
        change: ParticipantChange,
        user_ids: &[String],
    ) -> Result<(), StateError> {
        self.mutate(|s| {
            let Some(chat) = s.chats.get_mut(chat_id) else {
                return;
            };
            for instance in chat.services.values_mut() {
                for user in user_ids {
                    match change {
                        ParticipantChange::Join => {
                            add_unique(instance.roles.get_mut("member"), user);
                        }
                        ParticipantChange::Demote => {
                            remove_from(instance.roles.get_mut("admin"), user);
                            add_unique(instance.roles.get_mut("member"), user);
                        }
                        ParticipantChange::Promote => {
                            remove_from(instance.roles.get_mut("member"), user);
                            add_unique(instance.roles.get_mut("admin"), user);
                        }
                        ParticipantChange::Leave => {
                            for list in instance.roles.values_mut() {
                                list.retain(|u| u != user);
                            }
                        }
                    }
                }
            }
        })
        .await
    }

    /// Whether the user holds an admin role in any installed service of the
    /// chat.
    pub async fn is_service_admin_anywhere(&self, chat_id: &str, user_id: &str) -> bool {
        self.read(|s| {
            s.chats.get(chat_id).is_some_and(|c| {
                c.services.values().any(|i| i.has_role("admin", user_id))
            })
        })
        .await
    }

    // ── Display names ───────────────────────────────────────────

    /// Remember the display name seen on an inbound message.
    pub async fn remember_display_name(
        &self,
        chat_id: &str,
        user_id: &str,
        name: &str,
    ) -> Result<(), StateError> {
        if name.is_empty() {
            return Ok(());
        }
        let known = self
            .read(|s| {
                s.chats
                    .get(chat_id)
                    .and_then(|c| c.display_names.get(user_id))
                    .is_some_and(|n| n == name)
            })
            .await;
        if known {
            return Ok(());
        }
        self.mutate(|s| {
            if let Some(chat) = s.chats.get_mut(chat_id) {
                chat.display_names
                    .insert(user_id.to_owned(), name.to_owned());
            }
        })
        .await
    }

    /// Display label for a user: remembered name, else the id's local part.
    pub async fn resolve_user_name(&self, chat_id: &str, user_id: &str) -> String {
        self.read(|s| {
            s.chats
                .get(chat_id)
                .and_then(|c| c.display_names.get(user_id))
                .cloned()
        })
        .await
        .unwrap_or_else(|| {
            user_id
                .split('@')
                .next()
                .unwrap_or(user_id)
                .to_owned()
        })
    }

    // ── Blacklists ──────────────────────────────────────────────

    /// Append a global deny rule.
    pub async fn add_global_blacklist(&self, entry: BlacklistEntry) -> Result<(), StateError> {
        self.mutate(|s| s.root.global_blacklist.push(entry)).await
    }

    /// Remove all global deny rules for a user; returns how many.
    pub async fn remove_global_blacklist(&self, user_id: &str) -> Result<usize, StateError> {
        self.mutate(|s| {
            let before = s.root.global_blacklist.len();
            s.root.global_blacklist.retain(|e| e.user_id != user_id);
            before.saturating_sub(s.root.global_blacklist.len())
        })
        .await
    }

    /// Append a chat-scoped deny rule.
    pub async fn add_group_blacklist(
        &self,
        chat_id: &str,
        entry: BlacklistEntry,
    ) -> Result<(), StateError> {
        self.try_mutate(|s| {
            s.chats
                .get_mut(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?
                .group_blacklist
                .push(entry);
            Ok(())
        })
        .await
    }

    /// Remove all chat-scoped deny rules for a user; returns how many.
    pub async fn remove_group_blacklist(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<usize, StateError> {
        self.mutate(|s| {
            s.chats
                .get_mut(chat_id)
                .map(|c| {
                    let before = c.group_blacklist.len();
                    c.group_blacklist.retain(|e| e.user_id != user_id);
                    before.saturating_sub(c.group_blacklist.len())
                })
                .unwrap_or(0)
        })
        .await
    }

    // ── Sessions ────────────────────────────────────────────────

    /// The live session for `(chat, user)`, if any.
    pub async fn session(&self, chat_id: &str, user_id: &str) -> Option<Session> {
        self.read(|s| {
            s.chats
                .get(chat_id)
                .and_then(|c| c.sessions.get(user_id))
                .cloned()
        })
        .await
    }

    /// Store (replacing any previous) the session for `(chat, user)`.
    pub async fn put_session(
        &self,
        chat_id: &str,
        user_id: &str,
        session: Session,
    ) -> Result<(), StateError> {
        self.try_mutate(|s| {
            s.chats
                .get_mut(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?
                .sessions
                .insert(user_id.to_owned(), session);
            Ok(())
        })
        .await
    }

    /// Drop the session for `(chat, user)`, if any.
    pub async fn remove_session(&self, chat_id: &str, user_id: &str) -> Result<(), StateError> {
        self.mutate(|s| {
            if let Some(chat) = s.chats.get_mut(chat_id) {
                chat.sessions.remove(user_id);
            }
        })
        .await
    }

    // ── Storage ─────────────────────────────────────────────────

    /// Read access to a declared storage list.
    pub async fn read_storage<R>(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        f: impl FnOnce(&[serde_json::Value]) -> R,
    ) -> Result<R, StateError> {
        self.read(|s| {
            let list = s
                .chats
                .get(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?
                .services
                .get(service)
                .ok_or_else(|| StateError::ServiceNotInstalled {
                    service: service.to_owned(),
                })?
                .storage
                .get(name)
                .ok_or_else(|| StateError::StorageNotDeclared {
                    service: service.to_owned(),
                    name: name.to_owned(),
                })?;
            Ok(f(list))
        })
        .await
    }

    /// Mutable access to a declared storage list; persists afterwards.
    pub async fn with_storage<R>(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        f: impl FnOnce(&mut Vec<serde_json::Value>) -> R,
    ) -> Result<R, StateError> {
        self.try_mutate(|s| {
            let list = s
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| StateError::ChatNotFound(chat_id.to_owned()))?
                .services
                .get_mut(service)
                .ok_or_else(|| StateError::ServiceNotInstalled {
                    service: service.to_owned(),
                })?
                .storage
                .get_mut(name)
                .ok_or_else(|| StateError::StorageNotDeclared {
                    service: service.to_owned(),
                    name: name.to_owned(),
                })?;
            Ok(f(list))
        })
        .await
    }
}

fn add_unique(list: Option<&mut Vec<String>>, user: &str) {
    if let Some(list) = list {
        if !list.iter().any(|u| u == user) {
            list.push(user.to_owned());
        }
    }
}

fn remove_from(list: Option<&mut Vec<String>>, user: &str) {
    if let Some(list) = list {
        list.retain(|u| u != user);
    }
}
