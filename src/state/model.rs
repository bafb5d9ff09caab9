//! The single logical state document owned by the core.
//!
//! Everything the bot remembers between events lives in [`BotState`]: the
//! root operator set, per-chat settings, installed service instances with
//! their role lists and storage, live interactive sessions, and blacklists.
//! The document is serialized as one aggregate through the state store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::parser::command::Args;
use crate::schema::CommandScope;

/// Wildcard marker accepted in role user lists and blacklist fields.
pub const WILDCARD: &str = "*";

/// Kind of chat a state entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// A WhatsApp group (`*@g.us`).
    Group,
    /// A direct conversation (`*@s.whatsapp.net`).
    Private,
}

impl ChatType {
    /// Infer the chat type from a chat id suffix.
    pub fn from_chat_id(chat_id: &str) -> Self {
        if chat_id.ends_with("@g.us") {
            Self::Group
        } else {
            Self::Private
        }
    }
}

/// A deny rule keyed by user id, scoped by optional wildcard sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// The denied user.
    pub user_id: String,
    /// Chats the rule applies to; absent means all.
    #[serde(default)]
    pub groups: Option<BTreeSet<String>>,
    /// Services the rule applies to; absent means all.
    #[serde(default)]
    pub services: Option<BTreeSet<String>>,
    /// Commands the rule applies to; absent means all.
    #[serde(default)]
    pub commands: Option<BTreeSet<String>>,
}

fn scope_field_matches(field: &Option<BTreeSet<String>>, value: Option<&str>) -> bool {
    match field {
        None => true,
        Some(set) => {
            set.contains(WILDCARD) || value.is_some_and(|v| set.contains(v))
        }
    }
}

impl BlacklistEntry {
    /// A rule denying the user everywhere.
    pub fn everywhere(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            groups: None,
            services: None,
            commands: None,
        }
    }

    /// Whether this entry denies `(user, chat, service, command)`.
    pub fn matches(
        &self,
        user_id: &str,
        chat_id: &str,
        service: Option<&str>,
        command: &str,
    ) -> bool {
        self.user_id == user_id
            && scope_field_matches(&self.groups, Some(chat_id))
            && scope_field_matches(&self.services, service)
            && scope_field_matches(&self.commands, Some(command))
    }
}

/// Global operator state and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootState {
    /// User ids with the `root` role everywhere.
    pub root_users: BTreeSet<String>,
    /// Whether the bot processes messages at all.
    pub bot_enabled: bool,
    /// Override for the invocation-prefix pattern, when configured at runtime.
    #[serde(default)]
    pub invoke_prefix_pattern: Option<String>,
    /// Snapshot of root-scope setting values.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    /// Deny rules evaluated for every chat.
    #[serde(default)]
    pub global_blacklist: Vec<BlacklistEntry>,
}

impl Default for RootState {
    fn default() -> Self {
        Self {
            root_users: BTreeSet::new(),
            bot_enabled: true,
            invoke_prefix_pattern: None,
            settings: BTreeMap::new(),
            global_blacklist: Vec::new(),
        }
    }
}

/// The designated command for bare args-only lines in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgsOnlyBinding {
    /// Service owning the command.
    pub service: String,
    /// Command name.
    pub command: String,
}

/// Per-chat administrative settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSettings {
    /// Whether the bot responds in this chat.
    pub bot_enabled: bool,
    /// Whether argument parse failures produce a reply.
    pub reply_on_parsing_error: bool,
    /// Designated args-only command, if configured.
    #[serde(default)]
    pub args_only_command: Option<ArgsOnlyBinding>,
    /// Service whose commands may omit the service token.
    #[serde(default)]
    pub disable_service_prefix: Option<String>,
    /// Values of declared admin-scope settings.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            bot_enabled: true,
            reply_on_parsing_error: false,
            args_only_command: None,
            disable_service_prefix: None,
            extra: BTreeMap::new(),
        }
    }
}

/// An installed service in one chat: role lists, settings, storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Whether the service currently accepts commands.
    pub enabled: bool,
    /// Role name to ordered member user ids; may contain the wildcard.
    pub roles: BTreeMap<String, Vec<String>>,
    /// Values of declared service settings.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    /// Storage name to ordered records; each record carries an `_id`.
    #[serde(default)]
    pub storage: BTreeMap<String, Vec<Value>>,
}

impl ServiceInstance {
    /// Whether `user_id` holds `role` here (directly or via wildcard).
    pub fn has_role(&self, role: &str, user_id: &str) -> bool {
        self.roles
            .get(role)
            .is_some_and(|users| users.iter().any(|u| u == user_id || u == WILDCARD))
    }
}

/// Persisted conversational state collecting missing arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Scope of the command being completed.
    pub scope: CommandScope,
    /// Canonical command name.
    pub command: String,
    /// Syntax the arguments bind against.
    pub syntax_index: usize,
    /// Arguments collected so far (prompted values stored as strings).
    pub args: Args,
    /// Names of parameters still to prompt for, in order.
    pub pending: Vec<String>,
    /// Index into `pending` of the parameter currently prompted.
    pub current: usize,
    /// Effective roles captured when the session was authorized.
    pub exec_roles: Vec<String>,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// Last user input; drives expiry.
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// The parameter name currently being prompted.
    pub fn current_param(&self) -> Option<&str> {
        self.pending.get(self.current).map(String::as_str)
    }

    /// Whether every pending parameter has been visited.
    pub fn is_complete(&self) -> bool {
        self.current >= self.pending.len()
    }
}

/// State of one chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatState {
    /// Group or private.
    pub chat_type: ChatType,
    /// Administrative settings.
    pub admin_settings: AdminSettings,
    /// Installed services by id.
    pub services: BTreeMap<String, ServiceInstance>,
    /// Known display names by user id.
    #[serde(default)]
    pub display_names: BTreeMap<String, String>,
    /// Deny rules evaluated for this chat only.
    #[serde(default)]
    pub group_blacklist: Vec<BlacklistEntry>,
    /// Live interactive sessions keyed by user id; one per user.
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
}

impl ChatState {
    /// Fresh state for a chat of the given type.
    pub fn new(chat_type: ChatType) -> Self {
        Self {
            chat_type,
            admin_settings: AdminSettings::default(),
            services: BTreeMap::new(),
            display_names: BTreeMap::new(),
            group_blacklist: Vec::new(),
            sessions: BTreeMap::new(),
        }
    }
}

/// The complete persistent document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotState {
    /// Global operator state.
    pub root: RootState,
    /// Per-chat state keyed by chat id.
    pub chats: BTreeMap<String, ChatState>,
}

/// Terminal or pending status of one processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// Processing has started.
    Pending,
    /// The event was handled.
    Success,
    /// Handling failed.
    Error,
}

impl AuditStatus {
    /// Stable string form used by the store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One append-only audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record id.
    pub id: Uuid,
    /// When processing began.
    pub timestamp: DateTime<Utc>,
    /// Sender.
    pub user_id: String,
    /// Chat the message arrived in.
    pub chat_id: String,
    /// Raw message body.
    pub raw_message: String,
    /// JSON of the parsed command(s), when parsing succeeded.
    #[serde(default)]
    pub parsed: Option<Value>,
    /// Processing status.
    pub status: AuditStatus,
    /// Reply text, for successful events.
    #[serde(default)]
    pub response: Option<String>,
    /// Failure detail, for errored events.
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_type_from_id() {
        assert_eq!(ChatType::from_chat_id("g1@g.us"), ChatType::Group);
        assert_eq!(
            ChatType::from_chat_id("u1@s.whatsapp.net"),
            ChatType::Private
        );
    }

    #[test]
    fn test_blacklist_everywhere_matches_all() {
        let entry = BlacklistEntry::everywhere("u1");
        assert!(entry.matches("u1", "g1@g.us", Some("exp"), "add"));
        assert!(entry.matches("u1", "g2@g.us", None, "ping"));
        assert!(!entry.matches("u2", "g1@g.us", None, "ping"));
    }

    #[test]
    fn test_blacklist_scoped_to_group() {
        let entry = BlacklistEntry {
            groups: Some(["g1@g.us".to_owned()].into()),
            ..BlacklistEntry::everywhere("u1")
        };
        assert!(entry.matches("u1", "g1@g.us", None, "ping"));
        assert!(!entry.matches("u1", "g2@g.us", None, "ping"));
    }

    #[test]
    fn test_blacklist_wildcard_fields() {
        let entry = BlacklistEntry {
            groups: Some([WILDCARD.to_owned()].into()),
            services: Some(["exp".to_owned()].into()),
            ..BlacklistEntry::everywhere("u1")
        };
        assert!(entry.matches("u1", "anywhere@g.us", Some("exp"), "add"));
        // A service-scoped rule does not match scopeless commands.
        assert!(!entry.matches("u1", "anywhere@g.us", None, "ping"));
    }

    #[test]
    fn test_has_role_wildcard() {
        let mut instance = ServiceInstance {
            enabled: true,
            roles: BTreeMap::new(),
            settings: BTreeMap::new(),
            storage: BTreeMap::new(),
        };
        instance
            .roles
            .insert("member".to_owned(), vec![WILDCARD.to_owned()]);
        assert!(instance.has_role("member", "anyone"));
        assert!(!instance.has_role("admin", "anyone"));
    }

    #[test]
    fn test_session_cursor() {
        let session = Session {
            scope: CommandScope::Builtin,
            command: "x".to_owned(),
            syntax_index: 0,
            args: Args::new(),
            pending: vec!["a".to_owned(), "b".to_owned()],
            current: 1,
            exec_roles: vec![],
            created_at: Utc::now(),
            last_activity: Utc::now(),
        };
        assert_eq!(session.current_param(), Some("b"));
        assert!(!session.is_complete());
    }

    #[test]
    fn test_state_document_roundtrip() {
        let mut state = BotState::default();
        state.root.root_users.insert("root@s.whatsapp.net".to_owned());
        state
            .chats
            .insert("g1@g.us".to_owned(), ChatState::new(ChatType::Group));
        let json = serde_json::to_value(&state).expect("serialize");
        let back: BotState = serde_json::from_value(json).expect("deserialize");
        assert!(back.root.root_users.contains("root@s.whatsapp.net"));
        assert!(back.chats.contains_key("g1@g.us"));
    }
}
