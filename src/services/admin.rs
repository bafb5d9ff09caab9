//! Per-chat administration commands (`.admin <command>`).
//!
//! Reachable by root users and by anyone holding the `admin` role in at
//! least one installed service of the chat.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::router::context::{HandlerContext, HandlerReply, HandlerResult};
use crate::schema::loader::ServiceLoaderBuilder;
use crate::schema::{CommandDefinition, ParameterDefinition, ScopeDefinition, SettingDefinition};
use crate::state::{ArgsOnlyBinding, BlacklistEntry};

use super::handler;

/// The admin scope catalog.
pub fn scope() -> ScopeDefinition {
    let mut list_param = ParameterDefinition::optional("services", "Service|*", "Services to match");
    list_param.is_list = true;
    let mut commands_param =
        ParameterDefinition::optional("commands", "Command|*", "Commands to match");
    commands_param.is_list = true;

    ScopeDefinition {
        settings: vec![
            SettingDefinition {
                name: "reply_on_parsing_error".to_owned(),
                description: "Reply when arguments fail to parse".to_owned(),
                default: Value::Bool(false),
            },
            SettingDefinition {
                name: "disable_service_prefix".to_owned(),
                description: "Service whose commands need no prefix token".to_owned(),
                default: Value::Null,
            },
        ],
        commands: vec![
            CommandDefinition::simple("bot-enable", "Let the bot respond in this chat", vec![]),
            CommandDefinition::simple("bot-disable", "Silence the bot in this chat", vec![]),
            CommandDefinition::simple(
                "set",
                "Change a chat setting",
                vec![
                    ParameterDefinition::required("setting", "Setting", "Setting"),
                    ParameterDefinition::required("value", "string", "New value"),
                ],
            ),
            CommandDefinition::simple("settings", "Show the chat settings", vec![]),
            CommandDefinition::simple(
                "args-only",
                "Bind bare messages to one command (`*` to clear)",
                vec![
                    ParameterDefinition::required("service", "Service|*", "Service"),
                    ParameterDefinition::optional("command", "Command", "Command"),
                ],
            ),
            CommandDefinition::simple(
                "blacklist-add",
                "Deny a user in this chat",
                vec![
                    ParameterDefinition::required("user", "UserId", "User"),
                    list_param,
                    commands_param,
                ],
            ),
            CommandDefinition::simple(
                "blacklist-remove",
                "Lift this chat's deny rules for a user",
                vec![ParameterDefinition::required("user", "UserId", "User")],
            ),
            CommandDefinition::simple("blacklist-list", "Show this chat's deny rules", vec![]),
            CommandDefinition::simple("members", "Show known members and their roles", vec![]),
        ],
    }
}

/// Attach the admin handlers.
pub fn register(builder: ServiceLoaderBuilder) -> ServiceLoaderBuilder {
    builder
        .handler("admin", "bot-enable", handler(|ctx| Box::pin(bot_enable(ctx))))
        .handler("admin", "bot-disable", handler(|ctx| Box::pin(bot_disable(ctx))))
        .handler("admin", "set", handler(|ctx| Box::pin(set(ctx))))
        .handler("admin", "settings", handler(|ctx| Box::pin(settings(ctx))))
        .handler("admin", "args-only", handler(|ctx| Box::pin(args_only(ctx))))
        .handler("admin", "blacklistAdd", handler(|ctx| Box::pin(blacklist_add(ctx))))
        .handler(
            "admin",
            "blacklist-remove",
            handler(|ctx| Box::pin(blacklist_remove(ctx))),
        )
        .handler(
            "admin",
            "blacklist-list",
            handler(|ctx| Box::pin(blacklist_list(ctx))),
        )
        .handler("admin", "members", handler(|ctx| Box::pin(members(ctx))))
}

async fn bot_enable(ctx: HandlerContext) -> HandlerResult {
    ctx.state
        .update_admin_settings(&ctx.ctx.chat_id, |s| s.bot_enabled = true)
        .await?;
    Ok("Bot enabled in this chat".into())
}

async fn bot_disable(ctx: HandlerContext) -> HandlerResult {
    ctx.state
        .update_admin_settings(&ctx.ctx.chat_id, |s| s.bot_enabled = false)
        .await?;
    Ok("Bot disabled in this chat".into())
}

async fn set(ctx: HandlerContext) -> HandlerResult {
    let setting = ctx.require_str("setting")?.to_owned();
    let value = ctx.require_str("value")?.to_owned();

    match setting.as_str() {
        "reply_on_parsing_error" => {
            let flag = matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1");
            ctx.state
                .update_admin_settings(&ctx.ctx.chat_id, |s| s.reply_on_parsing_error = flag)
                .await?;
            Ok(format!("reply_on_parsing_error = {flag}").into())
        }
        "disable_service_prefix" => {
            let cleared = matches!(value.as_str(), "off" | "*");
            if !cleared && ctx.loader.get(&value).is_none() {
                return Ok(HandlerReply::Error(format!("unknown service '{value}'")));
            }
            let canonical = ctx.loader.canonical_service_id(&value);
            ctx.state
                .update_admin_settings(&ctx.ctx.chat_id, move |s| {
                    s.disable_service_prefix = if cleared { None } else { Some(canonical) };
                })
                .await?;
            Ok(format!(
                "disable_service_prefix = {}",
                if cleared { "off" } else { value.as_str() }
            )
            .into())
        }
        _ => {
            let stored = value.clone();
            ctx.state
                .update_admin_settings(&ctx.ctx.chat_id, move |s| {
                    s.extra.insert(setting, Value::String(stored));
                })
                .await?;
            Ok(format!("Setting updated to '{value}'").into())
        }
    }
}

async fn settings(ctx: HandlerContext) -> HandlerResult {
    let s = ctx.state.admin_settings(&ctx.ctx.chat_id).await;
    let mut lines = vec![
        "*Chat settings*".to_owned(),
        format!("- bot_enabled: {}", s.bot_enabled),
        format!("- reply_on_parsing_error: {}", s.reply_on_parsing_error),
        format!(
            "- args_only_command: {}",
            s.args_only_command
                .as_ref()
                .map(|b| format!("{} {}", b.service, b.command))
                .unwrap_or_else(|| "off".to_owned())
        ),
        format!(
            "- disable_service_prefix: {}",
            s.disable_service_prefix.as_deref().unwrap_or("off")
        ),
    ];
    for (key, value) in &s.extra {
        lines.push(format!("- {key}: {value}"));
    }
    Ok(lines.join("\n").into())
}

async fn args_only(ctx: HandlerContext) -> HandlerResult {
    let service = ctx.require_str("service")?.to_owned();
    if service == "*" {
        ctx.state
            .update_admin_settings(&ctx.ctx.chat_id, |s| s.args_only_command = None)
            .await?;
        return Ok("Args-only mode cleared".into());
    }

    let Some(def) = ctx.loader.get(&service) else {
        return Ok(HandlerReply::Error(format!("unknown service '{service}'")));
    };
    if !ctx.state.is_installed(&ctx.ctx.chat_id, &def.id).await {
        return Ok(HandlerReply::Error(format!(
            "service '{}' is not installed here",
            def.id
        )));
    }
    let Some(command) = ctx.arg_str("command") else {
        return Ok(HandlerReply::Error("which command?".to_owned()));
    };
    let Some(cmd) = def.command(command) else {
        return Ok(HandlerReply::Error(format!(
            "service '{}' has no command '{command}'",
            def.id
        )));
    };

    let binding = ArgsOnlyBinding {
        service: def.id.clone(),
        command: cmd.name.clone(),
    };
    let reply = format!("Bare messages now run `{} {}`", binding.service, binding.command);
    ctx.state
        .update_admin_settings(&ctx.ctx.chat_id, move |s| {
            s.args_only_command = Some(binding);
        })
        .await?;
    Ok(reply.into())
}

fn list_arg_as_set(ctx: &HandlerContext, name: &str) -> Option<BTreeSet<String>> {
    let items = ctx.arg_list(name);
    if items.is_empty() {
        None
    } else {
        Some(items.into_iter().collect())
    }
}

async fn blacklist_add(ctx: HandlerContext) -> HandlerResult {
    let user = ctx.require_str("user")?.to_owned();
    let entry = BlacklistEntry {
        user_id: user.clone(),
        groups: None,
        services: list_arg_as_set(&ctx, "services"),
        commands: list_arg_as_set(&ctx, "commands"),
    };
    ctx.state.add_group_blacklist(&ctx.ctx.chat_id, entry).await?;
    Ok(format!("Blacklisted {user} in this chat").into())
}

async fn blacklist_remove(ctx: HandlerContext) -> HandlerResult {
    let user = ctx.require_str("user")?;
    let removed = ctx
        .state
        .remove_group_blacklist(&ctx.ctx.chat_id, user)
        .await?;
    if removed == 0 {
        Ok(HandlerReply::Error(format!("no deny rules for {user} here")))
    } else {
        Ok(format!("Removed {removed} deny rule(s) for {user}").into())
    }
}

async fn blacklist_list(ctx: HandlerContext) -> HandlerResult {
    let chat_id = ctx.ctx.chat_id.clone();
    let entries = ctx
        .state
        .read(move |s| {
            s.chats
                .get(&chat_id)
                .map(|c| c.group_blacklist.clone())
                .unwrap_or_default()
        })
        .await;
    if entries.is_empty() {
        return Ok("No deny rules in this chat".into());
    }
    let mut lines = vec!["*Deny rules*".to_owned()];
    for entry in entries {
        lines.push(format!("- {}{}", entry.user_id, describe_entry_scope(&entry)));
    }
    Ok(lines.join("\n").into())
}

fn describe_entry_scope(entry: &BlacklistEntry) -> String {
    let mut parts = Vec::new();
    if let Some(services) = &entry.services {
        parts.push(format!(
            "services: {}",
            services.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if let Some(commands) = &entry.commands {
        parts.push(format!(
            "commands: {}",
            commands.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join("; "))
    }
}

async fn members(ctx: HandlerContext) -> HandlerResult {
    let chat_id = ctx.ctx.chat_id.clone();
    let (names, services) = ctx
        .state
        .read(move |s| {
            let chat = s.chats.get(&chat_id);
            let names = chat.map(|c| c.display_names.clone()).unwrap_or_default();
            let services: Vec<(String, Vec<(String, Vec<String>)>)> = chat
                .map(|c| {
                    c.services
                        .iter()
                        .map(|(id, inst)| {
                            (
                                id.clone(),
                                inst.roles
                                    .iter()
                                    .map(|(role, users)| (role.clone(), users.clone()))
                                    .collect(),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            (names, services)
        })
        .await;

    let mut lines = vec!["*Members*".to_owned()];
    for (user, name) in &names {
        lines.push(format!("- {name} ({user})"));
    }
    for (service, roles) in services {
        lines.push(format!("\n*{service} roles*"));
        for (role, users) in roles {
            if !users.is_empty() {
                lines.push(format!("- {role}: {}", users.join(", ")));
            }
        }
    }
    Ok(lines.join("\n").into())
}
