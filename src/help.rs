//! Renders command overviews and per-command usage text.

use std::sync::Arc;

use crate::schema::{CommandDefinition, ParameterDefinition, ServiceLoader};
use crate::state::StateManager;

/// Builds help replies from the catalog and the caller's standing.
pub struct HelpGenerator {
    loader: Arc<ServiceLoader>,
    state: Arc<StateManager>,
}

impl HelpGenerator {
    /// Build a generator over the catalog and shared state.
    pub fn new(loader: Arc<ServiceLoader>, state: Arc<StateManager>) -> Self {
        Self { loader, state }
    }

    /// Footer appended to unknown-command replies.
    pub fn unknown_hint(&self, token: &str) -> String {
        format!("Unknown command '{token}'.\n_Send .help for the list of available commands_")
    }

    /// The `*Commands*` overview: builtin commands in declaration order,
    /// then the sections the caller is entitled to see.
    pub async fn overview(&self, chat_id: &str, user_id: &str) -> String {
        let mut out = String::from("*Commands*\n");
        if let Some(scope) = self.loader.get_scope("builtin") {
            for command in &scope.commands {
                push_bullet(&mut out, &command.name, &command.description);
            }
        }

        let is_root = self.state.is_root(user_id).await;
        let is_admin = is_root
            || self.state.is_service_admin_anywhere(chat_id, user_id).await;

        if is_admin {
            if let Some(scope) = self.loader.get_scope("admin") {
                out.push_str("\n*Admin* — .admin <command>\n");
                for command in &scope.commands {
                    push_bullet(&mut out, &command.name, &command.description);
                }
            }
        }
        if is_root {
            if let Some(scope) = self.loader.get_scope("root") {
                out.push_str("\n*Root* — .root <command>\n");
                for command in &scope.commands {
                    push_bullet(&mut out, &command.name, &command.description);
                }
            }
        }

        for def in self.loader.services() {
            let Some(instance) = self.state.service_instance(chat_id, &def.id).await else {
                continue;
            };
            let mut roles: Vec<String> = instance
                .roles
                .iter()
                .filter(|(_, users)| users.iter().any(|u| u == user_id || u == "*"))
                .map(|(role, _)| role.clone())
                .collect();
            if is_root {
                roles.push("root".to_owned());
                roles.push("admin".to_owned());
            }
            let visible: Vec<&CommandDefinition> = def
                .commands
                .iter()
                .filter(|c| crate::permissions::get_best_matching_syntax(&roles, c).is_some())
                .collect();
            if visible.is_empty() {
                continue;
            }
            out.push_str(&format!(
                "\n*{}* — .{} <command>\n",
                def.display_name, def.id
            ));
            for command in visible {
                push_bullet(&mut out, &command.name, &command.description);
            }
        }
        out.trim_end().to_owned()
    }

    /// Detail for `.help <topic>` / `.help <service> <command>`.
    pub fn detail(&self, topic: &str, command: Option<&str>) -> String {
        // Two tokens: a service command.
        if let Some(command) = command {
            let Some(def) = self.loader.get(topic) else {
                return self.unknown_hint(topic);
            };
            let Some(cmd) = def.command(command) else {
                return self.unknown_hint(command);
            };
            return self.render_command(&format!(".{}", def.id), cmd);
        }

        // One token: a builtin command, else a service summary.
        if let Some(cmd) = self
            .loader
            .get_scope("builtin")
            .and_then(|s| s.command(topic))
        {
            return self.render_command(".", cmd);
        }
        if let Some(def) = self.loader.get(topic) {
            let mut out = format!("*{}*\n{}\n", def.display_name, def.description);
            for command in &def.commands {
                push_bullet(&mut out, &command.name, &command.description);
            }
            return out.trim_end().to_owned();
        }
        self.unknown_hint(topic)
    }

    /// Usage block for one command: every syntax, then parameter lines.
    fn render_command(&self, prefix: &str, cmd: &CommandDefinition) -> String {
        let mut out = format!("*{}*\n{}\n", cmd.name, cmd.description);
        for syntax in &cmd.syntaxes {
            let mut usage = if prefix == "." {
                format!(".{}", cmd.name)
            } else {
                format!("{prefix} {}", cmd.name)
            };
            for param in &syntax.params {
                usage.push(' ');
                usage.push_str(&param_usage(param));
            }
            out.push_str(&format!("`{usage}`\n"));
            for param in &syntax.params {
                let type_desc = self.loader.type_catalog().describe(&param.type_name);
                out.push_str(&format!("  {} — {} _({type_desc})_\n", param.name, param.description));
            }
        }
        out.trim_end().to_owned()
    }
}

fn push_bullet(out: &mut String, name: &str, description: &str) {
    out.push_str(&format!("- {name} — {description}\n"));
}

fn param_usage(param: &ParameterDefinition) -> String {
    if param.can_be_absent() {
        format!("[{}]", param.name)
    } else {
        format!("<{}>", param.name)
    }
}
