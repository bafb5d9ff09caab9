//! Command catalog schema: scopes, services, commands, syntaxes, parameters.
//!
//! Schemas are pure data, deserializable from JSON; handler code is attached
//! separately through the [`loader::ServiceLoader`] registry at boot.

pub mod loader;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use loader::ServiceLoader;

/// Which catalog a command belongs to and which permission rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandScope {
    /// Always-available commands (ping, help).
    Builtin,
    /// Per-chat administration commands.
    Admin,
    /// Global operator commands.
    Root,
    /// A command of the named installed service.
    Service(String),
}

impl std::fmt::Display for CommandScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::Admin => f.write_str("admin"),
            Self::Root => f.write_str("root"),
            Self::Service(id) => f.write_str(id),
        }
    }
}

/// One entry in the type catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    /// Human-readable description, shown in prompts and help output.
    pub description: String,
    /// Base type this type refines, if any.
    #[serde(default)]
    pub derived_from: Option<String>,
    /// Example values for help output.
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Mapping from type name to definition, immutable after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeCatalog {
    /// Known types by name.
    pub types: BTreeMap<String, TypeDef>,
}

impl TypeCatalog {
    /// Look up a type by name.
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// The description used when rendering prompts, falling back to the
    /// type name itself for types missing from the catalog.
    pub fn describe(&self, name: &str) -> String {
        self.get(name)
            .map(|t| t.description.clone())
            .unwrap_or_else(|| name.to_owned())
    }
}

/// One parameter of a command syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Parameter name, unique within its syntax.
    pub name: String,
    /// Type name from the catalog, or a union like `"Role|UserId|*"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Whether the single bound token is a comma-separated list.
    #[serde(default)]
    pub is_list: bool,
    /// Whether the parameter may be omitted.
    #[serde(default)]
    pub optional: bool,
    /// Value applied when the parameter is absent.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Prompt/help description.
    #[serde(default)]
    pub description: String,
    /// Minimum list length, for list parameters.
    #[serde(default)]
    pub min: Option<usize>,
    /// Maximum list length, for list parameters.
    #[serde(default)]
    pub max: Option<usize>,
}

impl ParameterDefinition {
    /// Shorthand for a required parameter with no list/default semantics.
    pub fn required(name: &str, type_name: &str, description: &str) -> Self {
        Self {
            name: name.to_owned(),
            type_name: type_name.to_owned(),
            is_list: false,
            optional: false,
            default: None,
            description: description.to_owned(),
            min: None,
            max: None,
        }
    }

    /// Shorthand for an optional parameter.
    pub fn optional(name: &str, type_name: &str, description: &str) -> Self {
        Self {
            optional: true,
            ..Self::required(name, type_name, description)
        }
    }

    /// Whether a missing argument is acceptable without prompting.
    pub fn can_be_absent(&self) -> bool {
        self.optional || self.default.is_some()
    }
}

/// One alternative signature of a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Syntax {
    /// Role names that may use this syntax; `*` matches everyone.
    pub allowed_roles: Vec<String>,
    /// Ordered parameter list; order is significant for binding.
    pub params: Vec<ParameterDefinition>,
}

impl Syntax {
    /// Build a syntax from role names and parameters.
    pub fn new(allowed_roles: &[&str], params: Vec<ParameterDefinition>) -> Self {
        Self {
            allowed_roles: allowed_roles.iter().map(|r| (*r).to_owned()).collect(),
            params,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A command as declared by its scope or service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDefinition {
    /// Canonical command name; lookup is case-insensitive.
    pub name: String,
    /// Help/description line.
    pub description: String,
    /// Whether missing required arguments open an interactive session.
    #[serde(default = "default_true")]
    pub interactive: bool,
    /// Fallback role set applied when a syntax declares none.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Ordered alternative signatures; the first role-matching one wins.
    pub syntaxes: Vec<Syntax>,
}

impl CommandDefinition {
    /// Build a command with a single syntax open to everyone.
    pub fn simple(name: &str, description: &str, params: Vec<ParameterDefinition>) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            interactive: true,
            allowed_roles: Vec::new(),
            syntaxes: vec![Syntax::new(&["*"], params)],
        }
    }

    /// The effective role set for a syntax, honouring the command fallback.
    pub fn roles_for_syntax(&self, index: usize) -> &[String] {
        match self.syntaxes.get(index) {
            Some(syntax) if !syntax.allowed_roles.is_empty() => &syntax.allowed_roles,
            _ => &self.allowed_roles,
        }
    }
}

/// A configurable setting declared by a scope or service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingDefinition {
    /// Setting key.
    pub name: String,
    /// Help line.
    pub description: String,
    /// Value applied until changed.
    pub default: serde_json::Value,
}

/// Catalog of one built-in scope (builtin, admin, or root).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeDefinition {
    /// Settings declared by this scope.
    #[serde(default)]
    pub settings: Vec<SettingDefinition>,
    /// Commands in declaration order.
    #[serde(default)]
    pub commands: Vec<CommandDefinition>,
}

impl ScopeDefinition {
    /// Case-insensitive command lookup returning the canonical definition.
    pub fn command(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A named bundle of commands, roles, settings, and storage declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Service id used as the command prefix token.
    pub id: String,
    /// Human-readable name for help output.
    pub display_name: String,
    /// Help line.
    pub description: String,
    /// Ordered role names; `admin` and `member` are added when missing.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Whether the service's commands run in private chats.
    #[serde(default)]
    pub allow_in_private_chat: bool,
    /// Whether only the first command of this service in a multi-command
    /// message is executed.
    #[serde(default)]
    pub one_cmd_per_msg: bool,
    /// Commands in declaration order.
    pub commands: Vec<CommandDefinition>,
    /// Settings declared by the service.
    #[serde(default)]
    pub settings: Vec<SettingDefinition>,
    /// Names of the storage lists this service owns.
    #[serde(default)]
    pub storage: Vec<String>,
}

impl ServiceDefinition {
    /// Case-insensitive command lookup returning the canonical definition.
    pub fn command(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}
