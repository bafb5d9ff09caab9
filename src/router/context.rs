//! Execution contexts handed to command handlers and interactive hooks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::gateway::{Gateway, GatewayError};
use crate::help::HelpGenerator;
use crate::parser::command::Args;
use crate::schema::ServiceLoader;
use crate::session::SessionManager;
use crate::state::StateManager;
use crate::storage::{StorageError, StorageManager};

/// Facts about the inbound message being processed.
#[derive(Debug, Clone)]
pub struct Context {
    /// Gateway message id (used for quoting replies).
    pub message_id: String,
    /// Conversation id.
    pub chat_id: String,
    /// Sender user id.
    pub user_id: String,
    /// Sender display label.
    pub user_name: String,
    /// Raw message body.
    pub body: String,
    /// Message timestamp.
    pub timestamp: DateTime<Utc>,
    /// Whether the chat is a group.
    pub is_group: bool,
    /// Id of the message this one replies to.
    pub replied_to_id: Option<String>,
    /// Text of the quoted message.
    pub quoted_body: Option<String>,
}

impl Context {
    /// Whether the chat is a private conversation.
    pub fn is_private(&self) -> bool {
        !self.is_group
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerReply {
    /// Reply text, quoted against the original message.
    Text(String),
    /// An error reply.
    Error(String),
    /// No reply at all.
    Silent,
}

impl From<String> for HandlerReply {
    fn from(text: String) -> Self {
        HandlerReply::Text(text)
    }
}

impl From<&str> for HandlerReply {
    fn from(text: &str) -> Self {
        HandlerReply::Text(text.to_owned())
    }
}

/// Handler outcome; failures are caught, audited, and surfaced generically.
pub type HandlerResult = anyhow::Result<HandlerReply>;

/// Boxed handler future. Handlers take the execution context by value, so
/// the future owns everything it needs.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A command handler callable.
pub type Handler = Arc<dyn Fn(HandlerContext) -> HandlerFuture + Send + Sync>;

/// An item rendered in an interactive prompt list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    /// Main label.
    pub label: String,
    /// Dimmed secondary line, if any.
    pub sublabel: Option<String>,
}

impl From<&str> for ListItem {
    fn from(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            sublabel: None,
        }
    }
}

impl From<String> for ListItem {
    fn from(label: String) -> Self {
        Self {
            label,
            sublabel: None,
        }
    }
}

/// Context a service contributes above an interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveContext {
    /// Free-form text.
    Text(String),
    /// A numbered list of items.
    List {
        /// Items to enumerate.
        items: Vec<ListItem>,
        /// Text shown instead of an empty list.
        empty_message: Option<String>,
    },
    /// Echo of an item the collected arguments already selected.
    Selected(ListItem),
    /// A plain message.
    Message(String),
}

/// Input handed to an interactive-context hook before each prompt.
#[derive(Clone)]
pub struct HookInput {
    /// Conversation id.
    pub chat_id: String,
    /// User being prompted.
    pub user_id: String,
    /// Service owning the command.
    pub service: String,
    /// Command being completed.
    pub command: String,
    /// Parameter about to be prompted.
    pub param: String,
    /// Arguments collected so far.
    pub args: Args,
    /// Shared state access.
    pub state: Arc<StateManager>,
    /// Storage access.
    pub storage: StorageManager,
}

/// Boxed future returned by a context hook.
pub type HookFuture = Pin<Box<dyn Future<Output = Option<InteractiveContext>> + Send>>;

/// An interactive-context producer a service may expose per command.
pub type ContextHook = Arc<dyn Fn(HookInput) -> HookFuture + Send + Sync>;

/// Everything a handler may touch while executing.
pub struct HandlerContext {
    /// The inbound message.
    pub ctx: Context,
    /// Bound (or session-collected) argument values.
    pub args: Args,
    /// Effective roles the permission manager computed for the caller.
    pub user_roles: Vec<String>,
    /// Service id, for service-scoped commands.
    pub service: Option<String>,
    /// Shared state manager.
    pub state: Arc<StateManager>,
    /// Storage manager.
    pub storage: StorageManager,
    /// The loaded catalog.
    pub loader: Arc<ServiceLoader>,
    /// Help renderer.
    pub help: Arc<HelpGenerator>,
    /// Session manager (lets handlers cancel or inspect prompts).
    pub sessions: Arc<SessionManager>,
    /// Outbound port.
    pub gateway: Arc<dyn Gateway>,
}

impl HandlerContext {
    // ── Argument accessors ──────────────────────────────────────

    /// A raw argument value.
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|v| !v.is_null())
    }

    /// A string argument.
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }

    /// An integer argument. Session-collected values arrive as strings and
    /// are coerced here.
    pub fn arg_i64(&self, name: &str) -> Option<i64> {
        match self.arg(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A boolean argument (accepting the parser's synonyms for strings).
    pub fn arg_bool(&self, name: &str) -> Option<bool> {
        match self.arg(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// A list argument as strings.
    pub fn arg_list(&self, name: &str) -> Vec<String> {
        match self.arg(name) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// A required string argument, as an error for handler `?` use.
    pub fn require_str(&self, name: &str) -> anyhow::Result<&str> {
        self.arg_str(name)
            .ok_or_else(|| anyhow::anyhow!("missing argument '{name}'"))
    }

    /// A required integer argument.
    pub fn require_i64(&self, name: &str) -> anyhow::Result<i64> {
        self.arg_i64(name)
            .ok_or_else(|| anyhow::anyhow!("missing argument '{name}'"))
    }

    // ── State helpers (chat- and service-scoped) ────────────────

    /// The service id, as an error for service-scoped handlers.
    pub fn require_service(&self) -> anyhow::Result<&str> {
        self.service
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("not a service command"))
    }

    /// User ids holding `role` in this chat's instance of the service.
    pub async fn users_with_role(&self, role: &str) -> anyhow::Result<Vec<String>> {
        let service = self.require_service()?;
        Ok(self
            .state
            .users_with_role(&self.ctx.chat_id, service, role)
            .await)
    }

    /// Add a user to a role of this service.
    pub async fn add_user_role(&self, role: &str, user_id: &str) -> anyhow::Result<bool> {
        let service = self.require_service()?;
        Ok(self
            .state
            .add_user_role(&self.ctx.chat_id, service, role, user_id)
            .await?)
    }

    /// Remove a user from a role of this service.
    pub async fn remove_user_role(&self, role: &str, user_id: &str) -> anyhow::Result<bool> {
        let service = self.require_service()?;
        Ok(self
            .state
            .remove_user_role(&self.ctx.chat_id, service, role, user_id)
            .await?)
    }

    /// Display label for a user in this chat.
    pub async fn resolve_user_name(&self, user_id: &str) -> String {
        self.state.resolve_user_name(&self.ctx.chat_id, user_id).await
    }

    // ── Storage helpers (chat- and service-scoped) ──────────────

    /// Append a record to this service's storage list.
    pub async fn storage_add(&self, name: &str, item: Value) -> Result<Value, StorageError> {
        let service = self.service.clone().unwrap_or_default();
        self.storage.add(&self.ctx.chat_id, &service, name, item).await
    }

    /// All records of this service's storage list.
    pub async fn storage_all(&self, name: &str) -> Result<Vec<Value>, StorageError> {
        let service = self.service.clone().unwrap_or_default();
        self.storage
            .query(&self.ctx.chat_id, &service, name, None)
            .await
    }

    // ── Outbound helpers ────────────────────────────────────────

    /// Send a plain message to the current chat.
    pub async fn send_message(&self, text: &str) -> Result<(), GatewayError> {
        self.gateway.send_message(&self.ctx.chat_id, text).await
    }

    /// Send a reply quoting the inbound message.
    pub async fn send_reply(&self, text: &str) -> Result<(), GatewayError> {
        self.gateway
            .send_reply(&self.ctx.chat_id, text, &self.ctx.message_id)
            .await
    }

    /// Send an error-styled reply quoting the inbound message.
    pub async fn send_error(&self, text: &str) -> Result<(), GatewayError> {
        self.send_reply(&format!("Error: {text}")).await
    }
}
