//! Global operator commands (`.root <command>`).

use std::collections::BTreeSet;

use serde_json::Value;

use crate::router::context::{HandlerContext, HandlerReply, HandlerResult};
use crate::schema::loader::ServiceLoaderBuilder;
use crate::schema::{CommandDefinition, ParameterDefinition, ScopeDefinition, SettingDefinition};
use crate::state::BlacklistEntry;

use super::handler;

/// The root scope catalog.
pub fn scope() -> ScopeDefinition {
    let mut groups_param = ParameterDefinition::optional("groups", "GroupId|*", "Groups to match");
    groups_param.is_list = true;
    let mut services_param =
        ParameterDefinition::optional("services", "Service|*", "Services to match");
    services_param.is_list = true;
    let mut commands_param =
        ParameterDefinition::optional("commands", "Command|*", "Commands to match");
    commands_param.is_list = true;

    ScopeDefinition {
        settings: vec![SettingDefinition {
            name: "invoke_prefix_pattern".to_owned(),
            description: "Regex deciding whether a line addresses the bot".to_owned(),
            default: Value::Null,
        }],
        commands: vec![
            CommandDefinition::simple(
                "install",
                "Install a service into this chat",
                vec![ParameterDefinition::required("service", "Service", "Service")],
            ),
            CommandDefinition::simple(
                "uninstall",
                "Remove a service from this chat",
                vec![ParameterDefinition::required("service", "Service", "Service")],
            ),
            CommandDefinition::simple(
                "service-enable",
                "Re-enable an installed service",
                vec![ParameterDefinition::required("service", "Service", "Service")],
            ),
            CommandDefinition::simple(
                "service-disable",
                "Disable an installed service",
                vec![ParameterDefinition::required("service", "Service", "Service")],
            ),
            CommandDefinition::simple("bot-enable", "Enable the bot everywhere", vec![]),
            CommandDefinition::simple("bot-disable", "Disable the bot everywhere", vec![]),
            CommandDefinition::simple(
                "set",
                "Change a global setting",
                vec![
                    ParameterDefinition::required("setting", "Setting", "Setting"),
                    ParameterDefinition::required("value", "string", "New value"),
                ],
            ),
            CommandDefinition::simple("settings", "Show the global settings", vec![]),
            CommandDefinition::simple(
                "root-add",
                "Grant root to a user",
                vec![ParameterDefinition::required("user", "UserId", "User")],
            ),
            CommandDefinition::simple(
                "root-remove",
                "Revoke root from a user",
                vec![ParameterDefinition::required("user", "UserId", "User")],
            ),
            CommandDefinition::simple(
                "blacklist-add",
                "Deny a user globally",
                vec![
                    ParameterDefinition::required("user", "UserId", "User"),
                    groups_param,
                    services_param,
                    commands_param,
                ],
            ),
            CommandDefinition::simple(
                "blacklist-remove",
                "Lift global deny rules for a user",
                vec![ParameterDefinition::required("user", "UserId", "User")],
            ),
            CommandDefinition::simple("blacklist-list", "Show global deny rules", vec![]),
        ],
    }
}

/// Attach the root handlers.
pub fn register(builder: ServiceLoaderBuilder) -> ServiceLoaderBuilder {
    builder
        .handler("root", "install", handler(|ctx| Box::pin(install(ctx))))
        .handler("root", "uninstall", handler(|ctx| Box::pin(uninstall(ctx))))
        .handler(
            "root",
            "service-enable",
            handler(|ctx| Box::pin(service_enable(ctx))),
        )
        .handler(
            "root",
            "service-disable",
            handler(|ctx| Box::pin(service_disable(ctx))),
        )
        .handler("root", "bot-enable", handler(|ctx| Box::pin(bot_enable(ctx))))
        .handler("root", "bot-disable", handler(|ctx| Box::pin(bot_disable(ctx))))
        .handler("root", "set", handler(|ctx| Box::pin(set(ctx))))
        .handler("root", "settings", handler(|ctx| Box::pin(settings(ctx))))
        .handler("root", "root-add", handler(|ctx| Box::pin(root_add(ctx))))
        .handler("root", "root-remove", handler(|ctx| Box::pin(root_remove(ctx))))
        .handler("root", "blacklistAdd", handler(|ctx| Box::pin(blacklist_add(ctx))))
        .handler(
            "root",
            "blacklist-remove",
            handler(|ctx| Box::pin(blacklist_remove(ctx))),
        )
        .handler(
            "root",
            "blacklist-list",
            handler(|ctx| Box::pin(blacklist_list(ctx))),
        )
}

async fn install(ctx: HandlerContext) -> HandlerResult {
    let service = ctx.require_str("service")?;
    let Some(def) = ctx.loader.get(service) else {
        return Ok(HandlerReply::Error(format!("unknown service '{service}'")));
    };

    // Seed the role lists from the current group membership. Private chats
    // start with just the installing user as admin.
    let participants: Vec<(String, bool)> = if ctx.ctx.is_group {
        ctx.gateway
            .group_participants(&ctx.ctx.chat_id)
            .await?
            .into_iter()
            .map(|p| (p.jid, p.is_admin))
            .collect()
    } else {
        vec![(ctx.ctx.user_id.clone(), true)]
    };

    match ctx
        .state
        .install_service(&ctx.ctx.chat_id, def, &participants)
        .await
    {
        Ok(()) => Ok(format!("Service '{}' installed", def.display_name).into()),
        Err(crate::state::StateError::AlreadyInstalled { service }) => Ok(HandlerReply::Error(
            format!("service '{service}' is already installed in this chat"),
        )),
        Err(e) => Err(e.into()),
    }
}

async fn uninstall(ctx: HandlerContext) -> HandlerResult {
    let service = ctx.require_str("service")?;
    let id = ctx.loader.canonical_service_id(service);
    if ctx.state.uninstall_service(&ctx.ctx.chat_id, &id).await? {
        Ok(format!("Service '{id}' uninstalled").into())
    } else {
        Ok(HandlerReply::Error(format!(
            "service '{id}' is not installed here"
        )))
    }
}

async fn service_enable(ctx: HandlerContext) -> HandlerResult {
    let id = ctx.loader.canonical_service_id(ctx.require_str("service")?);
    ctx.state
        .set_service_enabled(&ctx.ctx.chat_id, &id, true)
        .await?;
    Ok(format!("Service '{id}' enabled").into())
}

async fn service_disable(ctx: HandlerContext) -> HandlerResult {
    let id = ctx.loader.canonical_service_id(ctx.require_str("service")?);
    ctx.state
        .set_service_enabled(&ctx.ctx.chat_id, &id, false)
        .await?;
    Ok(format!("Service '{id}' disabled").into())
}

async fn bot_enable(ctx: HandlerContext) -> HandlerResult {
    ctx.state.set_bot_enabled(true).await?;
    Ok("Bot enabled".into())
}

async fn bot_disable(ctx: HandlerContext) -> HandlerResult {
    ctx.state.set_bot_enabled(false).await?;
    Ok("Bot disabled".into())
}

async fn set(ctx: HandlerContext) -> HandlerResult {
    let setting = ctx.require_str("setting")?.to_owned();
    let value = ctx.require_str("value")?.to_owned();

    match setting.as_str() {
        "invoke_prefix_pattern" => {
            if matches!(value.as_str(), "off" | "default") {
                ctx.state
                    .mutate(|s| s.root.invoke_prefix_pattern = None)
                    .await?;
                return Ok("Invocation pattern reset to the configured default".into());
            }
            if let Err(e) = regex::Regex::new(&value) {
                return Ok(HandlerReply::Error(format!("invalid pattern: {e}")));
            }
            let stored = value.clone();
            ctx.state
                .mutate(move |s| s.root.invoke_prefix_pattern = Some(stored))
                .await?;
            Ok(format!("Invocation pattern set to `{value}`").into())
        }
        _ => {
            let stored = value.clone();
            ctx.state
                .mutate(move |s| {
                    s.root.settings.insert(setting, Value::String(stored));
                })
                .await?;
            Ok(format!("Setting updated to '{value}'").into())
        }
    }
}

async fn settings(ctx: HandlerContext) -> HandlerResult {
    let (enabled, pattern, extra) = ctx
        .state
        .read(|s| {
            (
                s.root.bot_enabled,
                s.root.invoke_prefix_pattern.clone(),
                s.root.settings.clone(),
            )
        })
        .await;
    let mut lines = vec![
        "*Global settings*".to_owned(),
        format!("- bot_enabled: {enabled}"),
        format!(
            "- invoke_prefix_pattern: {}",
            pattern.as_deref().unwrap_or("default")
        ),
    ];
    for (key, value) in &extra {
        lines.push(format!("- {key}: {value}"));
    }
    Ok(lines.join("\n").into())
}

async fn root_add(ctx: HandlerContext) -> HandlerResult {
    let user = ctx.require_str("user")?;
    if ctx.state.add_root_user(user).await? {
        Ok(format!("{user} is now a root user").into())
    } else {
        Ok(format!("{user} already is a root user").into())
    }
}

async fn root_remove(ctx: HandlerContext) -> HandlerResult {
    let user = ctx.require_str("user")?;
    match ctx.state.remove_root_user(user).await {
        Ok(true) => Ok(format!("{user} is no longer a root user").into()),
        Ok(false) => Ok(HandlerReply::Error(format!("{user} is not a root user"))),
        Err(crate::state::StateError::LastRootUser) => Ok(HandlerReply::Error(
            "cannot remove the last root user".to_owned(),
        )),
        Err(e) => Err(e.into()),
    }
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
        groups: list_arg_as_set(&ctx, "groups"),
        services: list_arg_as_set(&ctx, "services"),
        commands: list_arg_as_set(&ctx, "commands"),
    };
    ctx.state.add_global_blacklist(entry).await?;
    Ok(format!("Blacklisted {user} globally").into())
}

async fn blacklist_remove(ctx: HandlerContext) -> HandlerResult {
    let user = ctx.require_str("user")?;
    let removed = ctx.state.remove_global_blacklist(user).await?;
    if removed == 0 {
        Ok(HandlerReply::Error(format!("no global deny rules for {user}")))
    } else {
        Ok(format!("Removed {removed} global deny rule(s) for {user}").into())
    }
}

async fn blacklist_list(ctx: HandlerContext) -> HandlerResult {
    let entries = ctx
        .state
        .read(|s| s.root.global_blacklist.clone())
        .await;
    if entries.is_empty() {
        return Ok("No global deny rules".into());
    }
    let mut lines = vec!["*Global deny rules*".to_owned()];
    for entry in entries {
        let mut scope_parts = Vec::new();
        if let Some(groups) = &entry.groups {
            scope_parts.push(format!(
                "groups: {}",
                groups.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if let Some(services) = &entry.services {
            scope_parts.push(format!(
                "services: {}",
                services.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if let Some(commands) = &entry.commands {
            scope_parts.push(format!(
                "commands: {}",
                commands.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if scope_parts.is_empty() {
            lines.push(format!("- {}", entry.user_id));
        } else {
            lines.push(format!("- {} ({})", entry.user_id, scope_parts.join("; ")));
        }
    }
    Ok(lines.join("\n").into())
}
