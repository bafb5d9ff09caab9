//! Boot-time assembly of the command catalog and handler registry.
//!
//! Schemas are data; handlers are code. The builder pairs the two and fails
//! fast on malformed syntaxes or commands with no implementation, so a bad
//! catalog never reaches the router.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use super::{
    CommandDefinition, CommandScope, ScopeDefinition, ServiceDefinition, TypeCatalog, TypeDef,
};
use crate::router::context::{ContextHook, Handler};

/// Base type names the type parser understands without a catalog entry.
const BASE_TYPES: &[&str] = &[
    "int", "float", "bool", "word", "string", "Arguments", "date", "time", "datetime", "email",
    "any", "*",
];

/// Catalog validation failure; fatal at boot.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A declared command has no registered handler.
    #[error("command '{scope} {command}' has no handler")]
    MissingHandler {
        /// Scope or service id.
        scope: String,
        /// Command name.
        command: String,
    },
    /// A parameter references a type the catalog does not know.
    #[error("command '{command}' parameter '{param}' has unknown type '{type_name}'")]
    UnknownType {
        /// Command name.
        command: String,
        /// Parameter name.
        param: String,
        /// The unresolvable type expression branch.
        type_name: String,
    },
    /// A syntax ends up with an empty role set.
    #[error("command '{command}' syntax {syntax} allows no roles")]
    NoRoles {
        /// Command name.
        command: String,
        /// Syntax index.
        syntax: usize,
    },
    /// Two services share an id.
    #[error("duplicate service id '{0}'")]
    DuplicateService(String),
    /// Two commands in one catalog share a name.
    #[error("duplicate command '{command}' in '{scope}'")]
    DuplicateCommand {
        /// Scope or service id.
        scope: String,
        /// Command name.
        command: String,
    },
}

/// The standard type catalog: base types plus the id-like derived types.
pub fn standard_type_catalog() -> TypeCatalog {
    fn base(description: &str) -> TypeDef {
        TypeDef {
            description: description.to_owned(),
            derived_from: None,
            examples: vec![],
        }
    }
    fn derived(description: &str, from: &str, example: &str) -> TypeDef {
        TypeDef {
            description: description.to_owned(),
            derived_from: Some(from.to_owned()),
            examples: vec![example.to_owned()],
        }
    }

    let mut types = BTreeMap::new();
    types.insert("int".to_owned(), base("int"));
    types.insert("float".to_owned(), base("number"));
    types.insert("bool".to_owned(), base("yes/no"));
    types.insert("word".to_owned(), base("word"));
    types.insert("string".to_owned(), base("text"));
    types.insert("Arguments".to_owned(), base("text"));
    types.insert("date".to_owned(), base("YYYY-MM-DD"));
    types.insert("time".to_owned(), base("HH:MM"));
    types.insert("datetime".to_owned(), base("ISO date-time"));
    types.insert("email".to_owned(), base("email address"));
    types.insert("any".to_owned(), base("anything"));
    types.insert("*".to_owned(), base("*"));
    types.insert(
        "GroupId".to_owned(),
        derived("group id", "string", "12345@g.us"),
    );
    types.insert(
        "UserId".to_owned(),
        derived("user id", "string", "491701234567@s.whatsapp.net"),
    );
    types.insert("Role".to_owned(), derived("role name", "word", "member"));
    types.insert("Service".to_owned(), derived("service id", "word", "exp"));
    types.insert("Command".to_owned(), derived("command name", "word", "add"));
    types.insert("Setting".to_owned(), derived("setting name", "word", "bot_enabled"));
    TypeCatalog { types }
}

/// `blacklist-add` → `blacklistAdd`, the alternative handler export name.
pub fn dash_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Immutable view of the loaded catalog plus handler lookup.
pub struct ServiceLoader {
    types: TypeCatalog,
    builtin: ScopeDefinition,
    admin: ScopeDefinition,
    root: ScopeDefinition,
    services: Vec<ServiceDefinition>,
    handlers: HashMap<(String, String), Handler>,
    hooks: HashMap<(String, String), ContextHook>,
}

impl std::fmt::Debug for ServiceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLoader")
            .field("types", &self.types)
            .field("builtin", &self.builtin)
            .field("admin", &self.admin)
            .field("root", &self.root)
            .field("services", &self.services)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceLoader {
    /// Start assembling a loader.
    pub fn builder() -> ServiceLoaderBuilder {
        ServiceLoaderBuilder::new()
    }

    /// The type catalog.
    pub fn type_catalog(&self) -> &TypeCatalog {
        &self.types
    }

    /// A service definition by id (case-insensitive).
    pub fn get(&self, service: &str) -> Option<&ServiceDefinition> {
        self.services
            .iter()
            .find(|s| s.id.eq_ignore_ascii_case(service))
    }

    /// The canonical id for a (possibly differently-cased) service token.
    pub fn canonical_service_id(&self, service: &str) -> String {
        self.get(service)
            .map(|s| s.id.clone())
            .unwrap_or_else(|| service.to_owned())
    }

    /// All services in registration order.
    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    /// One of the three built-in scopes by name.
    pub fn get_scope(&self, name: &str) -> Option<&ScopeDefinition> {
        match name {
            "builtin" => Some(&self.builtin),
            "admin" => Some(&self.admin),
            "root" => Some(&self.root),
            _ => None,
        }
    }

    /// A command definition by scope and (case-insensitive) name.
    pub fn get_command(&self, scope: &CommandScope, name: &str) -> Option<&CommandDefinition> {
        match scope {
            CommandScope::Builtin => self.builtin.command(name),
            CommandScope::Admin => self.admin.command(name),
            CommandScope::Root => self.root.command(name),
            CommandScope::Service(id) => self.get(id)?.command(name),
        }
    }

    /// The handler for a command: exact name first, then the dash-to-camel
    /// transform.
    pub fn get_handler(&self, scope: &CommandScope, name: &str) -> Option<Handler> {
        let key = scope.to_string();
        self.handlers
            .get(&(key.clone(), name.to_owned()))
            .or_else(|| self.handlers.get(&(key, dash_to_camel(name))))
            .cloned()
    }

    /// Ordered roles of a service; `[admin, member]` when unknown.
    pub fn roles(&self, service: &str) -> Vec<String> {
        self.get(service)
            .map(|s| s.roles.clone())
            .unwrap_or_else(|| vec!["admin".to_owned(), "member".to_owned()])
    }

    /// The interactive-context hook a service exposes for a command.
    pub fn context_hook(&self, service: &str, command: &str) -> Option<ContextHook> {
        self.hooks
            .get(&(service.to_owned(), command.to_owned()))
            .cloned()
    }

    /// Whether a service definition declares `one_cmd_per_msg`.
    pub fn one_cmd_per_msg(&self, service: &str) -> bool {
        self.get(service).is_some_and(|s| s.one_cmd_per_msg)
    }
}

/// Accumulates scopes, services, handlers, and hooks, then validates.
pub struct ServiceLoaderBuilder {
    types: TypeCatalog,
    builtin: ScopeDefinition,
    admin: ScopeDefinition,
    root: ScopeDefinition,
    services: Vec<ServiceDefinition>,
    handlers: HashMap<(String, String), Handler>,
    hooks: HashMap<(String, String), ContextHook>,
}

impl Default for ServiceLoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceLoaderBuilder {
    /// Empty builder with the standard type catalog.
    pub fn new() -> Self {
        Self {
            types: standard_type_catalog(),
            builtin: ScopeDefinition::default(),
            admin: ScopeDefinition::default(),
            root: ScopeDefinition::default(),
            services: Vec::new(),
            handlers: HashMap::new(),
            hooks: HashMap::new(),
        }
    }

    /// Add or replace a type catalog entry.
    pub fn type_def(mut self, name: &str, def: TypeDef) -> Self {
        self.types.types.insert(name.to_owned(), def);
        self
    }

    /// Set the builtin scope catalog.
    pub fn builtin_scope(mut self, scope: ScopeDefinition) -> Self {
        self.builtin = scope;
        self
    }

    /// Set the admin scope catalog.
    pub fn admin_scope(mut self, scope: ScopeDefinition) -> Self {
        self.admin = scope;
        self
    }

    /// Set the root scope catalog.
    pub fn root_scope(mut self, scope: ScopeDefinition) -> Self {
        self.root = scope;
        self
    }

    /// Register a service definition.
    pub fn service(mut self, def: ServiceDefinition) -> Self {
        self.services.push(def);
        self
    }

    /// Register a handler under `(scope-or-service, export-name)`.
    pub fn handler(mut self, scope: &str, name: &str, handler: Handler) -> Self {
        self.handlers
            .insert((scope.to_owned(), name.to_owned()), handler);
        self
    }

    /// Register an interactive-context hook for `(service, command)`.
    pub fn context_hook(mut self, service: &str, command: &str, hook: ContextHook) -> Self {
        self.hooks
            .insert((service.to_owned(), command.to_owned()), hook);
        self
    }

    /// Validate and freeze the catalog.
    pub fn build(mut self) -> Result<ServiceLoader, SchemaError> {
        // Implicitly complete service role lists.
        for def in &mut self.services {
            for required in ["member", "admin"] {
                if !def.roles.iter().any(|r| r == required) {
                    def.roles.insert(0, required.to_owned());
                }
            }
        }

        // Reject duplicate service ids.
        for (i, def) in self.services.iter().enumerate() {
            if self
                .services
                .iter()
                .skip(i.saturating_add(1))
                .any(|other| other.id.eq_ignore_ascii_case(&def.id))
            {
                return Err(SchemaError::DuplicateService(def.id.clone()));
            }
        }

        let scopes: Vec<(String, Vec<CommandDefinition>)> = [
            ("builtin", &self.builtin),
            ("admin", &self.admin),
            ("root", &self.root),
        ]
        .into_iter()
        .map(|(name, scope)| (name.to_owned(), scope.commands.clone()))
        .chain(
            self.services
                .iter()
                .map(|s| (s.id.clone(), s.commands.clone())),
        )
        .collect();

        for (scope, commands) in &scopes {
            for (i, command) in commands.iter().enumerate() {
                if commands
                    .iter()
                    .skip(i.saturating_add(1))
                    .any(|other| other.name.eq_ignore_ascii_case(&command.name))
                {
                    return Err(SchemaError::DuplicateCommand {
                        scope: scope.clone(),
                        command: command.name.clone(),
                    });
                }
                self.validate_command(scope, command)?;
            }
        }

        debug!(
            services = self.services.len(),
            handlers = self.handlers.len(),
            "catalog loaded"
        );
        Ok(ServiceLoader {
            types: self.types,
            builtin: self.builtin,
            admin: self.admin,
            root: self.root,
            services: self.services,
            handlers: self.handlers,
            hooks: self.hooks,
        })
    }

    fn validate_command(&self, scope: &str, command: &CommandDefinition) -> Result<(), SchemaError> {
        // Every declared command needs an implementation.
        let key = (scope.to_owned(), command.name.clone());
        let camel = (scope.to_owned(), dash_to_camel(&command.name));
        if !self.handlers.contains_key(&key) && !self.handlers.contains_key(&camel) {
            return Err(SchemaError::MissingHandler {
                scope: scope.to_owned(),
                command: command.name.clone(),
            });
        }

        for (i, syntax) in command.syntaxes.iter().enumerate() {
            if command.roles_for_syntax(i).is_empty() {
                return Err(SchemaError::NoRoles {
                    command: command.name.clone(),
                    syntax: i,
                });
            }
            for param in &syntax.params {
                for branch in param.type_name.split('|').map(str::trim) {
                    if !BASE_TYPES.contains(&branch) && self.types.get(branch).is_none() {
                        return Err(SchemaError::UnknownType {
                            command: command.name.clone(),
                            param: param.name.clone(),
                            type_name: branch.to_owned(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
