//! Always-available commands: `ping` and `help`.

use crate::router::context::{HandlerContext, HandlerReply, HandlerResult};
use crate::schema::loader::ServiceLoaderBuilder;
use crate::schema::{CommandDefinition, ParameterDefinition, ScopeDefinition};

use super::handler;

/// The builtin scope catalog.
pub fn scope() -> ScopeDefinition {
    ScopeDefinition {
        settings: vec![],
        commands: vec![
            CommandDefinition::simple("ping", "Check that the bot is alive", vec![]),
            CommandDefinition::simple(
                "help",
                "List commands, or show details for one",
                vec![
                    ParameterDefinition::optional("topic", "word", "Command or service"),
                    ParameterDefinition::optional("command", "word", "Command of the service"),
                ],
            ),
        ],
    }
}

/// Attach the builtin handlers.
pub fn register(builder: ServiceLoaderBuilder) -> ServiceLoaderBuilder {
    builder
        .handler("builtin", "ping", handler(|ctx| Box::pin(ping(ctx))))
        .handler("builtin", "help", handler(|ctx| Box::pin(help(ctx))))
}

async fn ping(_ctx: HandlerContext) -> HandlerResult {
    Ok("Pong".into())
}

async fn help(ctx: HandlerContext) -> HandlerResult {
    let reply = match ctx.arg_str("topic") {
        None => ctx.help.overview(&ctx.ctx.chat_id, &ctx.ctx.user_id).await,
        Some(topic) => ctx.help.detail(topic, ctx.arg_str("command")),
    };
    Ok(HandlerReply::Text(reply))
}
