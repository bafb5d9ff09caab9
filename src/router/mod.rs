//! The orchestrator: sequences session, parser, permission, and handler
//! work for every inbound event and sends the reply.

pub mod context;
pub mod locks;

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::gateway::events::InboundEvent;
use crate::gateway::Gateway;
use crate::help::HelpGenerator;
use crate::parser::command::{Args, ParseContext, ParsedCommand, ParsedItem};
use crate::parser::CommandParser;
use crate::permissions::PermissionManager;
use crate::schema::{CommandScope, ServiceLoader};
use crate::session::{SessionManager, SessionStep};
use crate::state::{AuditStatus, StateManager};
use crate::storage::StorageManager;

pub use context::{Context, HandlerContext, HandlerReply};
pub use locks::ChatLocks;

/// Reply for errors thrown inside a handler.
const HANDLER_ERROR_REPLY: &str = "An error occurred while processing your command";

/// Router tunables, resolved from configuration at boot.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// First token selecting the root scope.
    pub root_prefix: String,
    /// First token selecting the admin scope.
    pub admin_prefix: String,
    /// Invocation pattern; capture group 1 is the line remainder.
    pub invoke_pattern: Regex,
    /// Session inactivity timeout in seconds.
    pub session_timeout_secs: i64,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            root_prefix: "root".to_owned(),
            admin_prefix: "admin".to_owned(),
            invoke_pattern: default_invoke_pattern(),
            session_timeout_secs: crate::session::DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

/// The default invocation pattern: a leading `.` not followed by another
/// `.`, with optional whitespace before the command.
pub fn default_invoke_pattern() -> Regex {
    Regex::new(r"^\.([^.][\s\S]*)$").expect("literal pattern compiles")
}

/// Outcome of processing one message.
struct Processed {
    reply: Option<String>,
    parsed: Option<Value>,
    error: Option<String>,
}

impl Processed {
    fn silent() -> Self {
        Self {
            reply: None,
            parsed: None,
            error: None,
        }
    }
}

/// Result of one handler dispatch.
struct Dispatched {
    reply: Option<String>,
    error: Option<String>,
}

/// The message router.
pub struct MessageRouter {
    loader: Arc<ServiceLoader>,
    state: Arc<StateManager>,
    storage: StorageManager,
    permissions: PermissionManager,
    sessions: Arc<SessionManager>,
    help: Arc<HelpGenerator>,
    gateway: Arc<dyn Gateway>,
    audit: AuditLog,
    parser: CommandParser,
    locks: ChatLocks,
    options: RouterOptions,
}

impl MessageRouter {
    /// Wire up the router and its collaborators.
    pub fn new(
        loader: Arc<ServiceLoader>,
        state: Arc<StateManager>,
        gateway: Arc<dyn Gateway>,
        options: RouterOptions,
    ) -> Self {
        let storage = StorageManager::new(Arc::clone(&state));
        let permissions = PermissionManager::new(Arc::clone(&state), Arc::clone(&loader));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&state),
            Arc::clone(&loader),
            storage.clone(),
            options.session_timeout_secs,
        ));
        let help = Arc::new(HelpGenerator::new(Arc::clone(&loader), Arc::clone(&state)));
        let audit = AuditLog::new(state.store());
        let parser = CommandParser::new(Arc::clone(&loader), options.invoke_pattern.clone());
        Self {
            loader,
            state,
            storage,
            permissions,
            sessions,
            help,
            gateway,
            audit,
            parser,
            locks: ChatLocks::new(),
            options,
        }
    }

    /// The session manager (exposed for wiring and tests).
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Process one inbound event end to end. Returns the reply text that
    /// was sent, if any.
    pub async fn handle_event(&self, event: &InboundEvent) -> Option<String> {
        if let Some(msg) = event.message() {
            if msg.from == event.device_id {
                debug!(chat_id = %msg.chat_id, "skipping self message");
                return None;
            }
            return self.handle_message(msg).await;
        }
        if let Some(payload) = event.participants() {
            self.handle_participants(payload).await;
            return None;
        }
        debug!(event = %event.event, "ignoring unhandled event");
        None
    }

    async fn handle_message(
        &self,
        msg: crate::gateway::events::MessagePayload,
    ) -> Option<String> {
        // Per-chat serialization: held across the whole pipeline.
        let _guard = self.locks.acquire(&msg.chat_id).await;

        if let Err(e) = self.state.ensure_chat(&msg.chat_id).await {
            error!(error = %e, chat_id = %msg.chat_id, "failed to create chat state");
            return None;
        }
        let user_name = msg.from_name.clone().unwrap_or_default();
        if let Err(e) = self
            .state
            .remember_display_name(&msg.chat_id, &msg.from, &user_name)
            .await
        {
            warn!(error = %e, "failed to remember display name");
        }

        let ctx = Context {
            message_id: msg.id.clone(),
            chat_id: msg.chat_id.clone(),
            user_id: msg.from.clone(),
            user_name,
            body: msg.body.clone(),
            timestamp: msg.timestamp_utc(),
            is_group: msg.chat_id.ends_with("@g.us"),
            replied_to_id: msg.replied_to_id.clone(),
            quoted_body: msg.quoted_body.clone(),
        };

        let audit_id = self.audit.begin(&ctx).await;
        let processed = self.process_message(&ctx).await;

        let mut send_error = None;
        if let Some(reply) = &processed.reply {
            if let Err(e) = self
                .gateway
                .send_reply(&ctx.chat_id, reply, &ctx.message_id)
                .await
            {
                // No retry; upstream may redeliver.
                warn!(error = %e, chat_id = %ctx.chat_id, "outbound send failed");
                send_error = Some(format!("outbound send failed: {e}"));
            }
        }

        let error = processed.error.clone().or(send_error);
        let status = if error.is_some() {
            AuditStatus::Error
        } else {
            AuditStatus::Success
        };
        self.audit
            .finish(
                audit_id,
                status,
                processed.parsed.as_ref(),
                processed.reply.as_deref(),
                error.as_deref(),
            )
            .await;

        // Locks for chats nobody is processing are dropped; the one held
        // here survives the sweep.
        self.locks.reap_idle().await;
        processed.reply
    }

    async fn handle_participants(&self, payload: crate::gateway::events::ParticipantsPayload) {
        let Some(change) = payload.change() else {
            debug!(kind = %payload.kind, "ignoring unknown participant change");
            return;
        };
        let _guard = self.locks.acquire(&payload.chat_id).await;
        match self
            .state
            .apply_participant_change(&payload.chat_id, change, &payload.jids)
            .await
        {
            Ok(()) => info!(
                chat_id = %payload.chat_id,
                ?change,
                count = payload.jids.len(),
                "applied participant change"
            ),
            Err(e) => error!(error = %e, chat_id = %payload.chat_id, "participant change failed"),
        }
    }

    /// The pipeline for one message: session, parse, authorize, execute.
    async fn process_message(&self, ctx: &Context) -> Processed {
        // The session check precedes parsing, so a message typed during a
        // prompt is always consumed by the session.
        match self
            .sessions
            .handle_input(&ctx.chat_id, &ctx.user_id, &ctx.body)
            .await
        {
            Ok(None) => {}
            Ok(Some(step)) => return self.process_session_step(ctx, step).await,
            Err(e) => {
                return Processed {
                    reply: None,
                    parsed: None,
                    error: Some(format!("session handling failed: {e}")),
                }
            }
        }

        let settings = self.state.admin_settings(&ctx.chat_id).await;
        let mut args_only = None;
        if let Some(binding) = &settings.args_only_command {
            if self
                .state
                .is_installed(&ctx.chat_id, &binding.service)
                .await
            {
                args_only = Some((binding.service.clone(), binding.command.clone()));
            }
        }
        let parse_ctx = ParseContext {
            root_prefix: self.options.root_prefix.clone(),
            admin_prefix: self.options.admin_prefix.clone(),
            args_only,
            disable_service_prefix: settings.disable_service_prefix.clone(),
        };

        // The root operator may have overridden the invocation pattern at
        // runtime; an invalid stored pattern falls back to the configured
        // one.
        let pattern_override = self
            .state
            .read(|s| s.root.invoke_prefix_pattern.clone())
            .await
            .and_then(|p| match Regex::new(&p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(error = %e, "ignoring invalid invocation pattern override");
                    None
                }
            });

        let items = self
            .parser
            .parse_with(&ctx.body, &parse_ctx, pattern_override.as_ref());
        if items.is_empty() {
            return Processed::silent();
        }
        let parsed_json = Value::Array(
            items
                .iter()
                .filter_map(|item| match item {
                    ParsedItem::Command(cmd) => serde_json::to_value(cmd).ok(),
                    _ => None,
                })
                .collect(),
        );

        // Only one command per message may go interactive.
        let interactive_candidates = {
            let mut count: usize = 0;
            for item in &items {
                if let ParsedItem::Command(cmd) = item {
                    if self.would_go_interactive(cmd) {
                        count = count.saturating_add(1);
                    }
                }
            }
            count
        };
        if interactive_candidates > 1 {
            return Processed {
                reply: Some("Only one interactive command per message".to_owned()),
                parsed: Some(parsed_json),
                error: None,
            };
        }

        let mut replies: Vec<String> = Vec::new();
        let mut first_error: Option<String> = None;
        let mut seen_single_shot: HashSet<String> = HashSet::new();

        for item in items {
            match item {
                ParsedItem::Unknown { token } => {
                    replies.push(self.help.unknown_hint(&token));
                }
                ParsedItem::Malformed { command, reason } => {
                    // Malformed items only arise from prefixed lines, which
                    // always surface their parse errors.
                    replies.push(format!("Could not run '{command}': {reason}"));
                }
                ParsedItem::Command(cmd) => {
                    if let CommandScope::Service(id) = &cmd.scope {
                        if self.loader.one_cmd_per_msg(id)
                            && !seen_single_shot.insert(id.clone())
                        {
                            debug!(service = %id, "skipping extra command of one-shot service");
                            continue;
                        }
                    }
                    let (reply, error) = self.process_command(ctx, cmd, &settings).await;
                    if let Some(reply) = reply {
                        replies.push(reply);
                    }
                    if first_error.is_none() {
                        first_error = error;
                    }
                }
            }
        }

        Processed {
            reply: if replies.is_empty() {
                None
            } else {
                Some(replies.join("\n"))
            },
            parsed: Some(parsed_json),
            error: first_error,
        }
    }

    fn would_go_interactive(&self, cmd: &ParsedCommand) -> bool {
        self.loader
            .get_command(&cmd.scope, &cmd.command)
            .is_some_and(|def| def.interactive)
            && cmd.raw_args_empty()
            && !cmd.missing.is_empty()
    }

    /// Authorize, re-bind, and execute (or prompt for) one parsed command.
    async fn process_command(
        &self,
        ctx: &Context,
        mut cmd: ParsedCommand,
        settings: &crate::state::AdminSettings,
    ) -> (Option<String>, Option<String>) {
        let auth = match self
            .permissions
            .authorize(&ctx.chat_id, &ctx.user_id, ctx.is_private(), &cmd)
            .await
        {
            Ok(auth) => auth,
            Err(denial) => {
                debug!(command = %cmd.command, %denial, "command denied");
                return (Some(denial.to_string()), None);
            }
        };

        if auth.syntax_index != cmd.syntax_index {
            cmd = match self.parser.rebind(&cmd, auth.syntax_index) {
                Ok(rebound) => rebound,
                Err(e) => {
                    if cmd.prefixed || settings.reply_on_parsing_error {
                        return (Some(format!("Could not run '{}': {e}", cmd.command)), None);
                    }
                    return (None, None);
                }
            };
        }

        if self.would_go_interactive(&cmd) {
            return match self
                .sessions
                .open(&ctx.chat_id, &ctx.user_id, &cmd, auth.effective_roles)
                .await
            {
                Ok(prompt) => (Some(prompt), None),
                Err(e) => (None, Some(format!("failed to open session: {e}"))),
            };
        }

        let dispatched = self
            .dispatch(ctx, &cmd.scope, &cmd.command, cmd.args, auth.effective_roles)
            .await;
        (dispatched.reply, dispatched.error)
    }

    async fn process_session_step(&self, ctx: &Context, step: SessionStep) -> Processed {
        match step {
            SessionStep::Cancelled => Processed {
                reply: Some("Cancelled".to_owned()),
                parsed: None,
                error: None,
            },
            SessionStep::Prompt(prompt) => Processed {
                reply: Some(prompt),
                parsed: None,
                error: None,
            },
            SessionStep::Invalid { reason, prompt } => Processed {
                reply: Some(format!("{reason}\n\n{prompt}")),
                parsed: None,
                error: None,
            },
            SessionStep::Complete(done) => {
                let parsed = serde_json::json!({
                    "scope": &done.scope,
                    "command": &done.command,
                    "args": &done.args,
                    "session": true,
                });
                let dispatched = self
                    .dispatch(ctx, &done.scope, &done.command, done.args, done.exec_roles)
                    .await;
                Processed {
                    reply: dispatched.reply,
                    parsed: Some(parsed),
                    error: dispatched.error,
                }
            }
        }
    }

    /// Invoke a handler with the full execution context.
    async fn dispatch(
        &self,
        ctx: &Context,
        scope: &CommandScope,
        command: &str,
        args: Args,
        user_roles: Vec<String>,
    ) -> Dispatched {
        let Some(handler) = self.loader.get_handler(scope, command) else {
            return Dispatched {
                reply: Some(self.help.unknown_hint(command)),
                error: None,
            };
        };
        let service = match scope {
            CommandScope::Service(id) => Some(id.clone()),
            _ => None,
        };
        let hctx = HandlerContext {
            ctx: ctx.clone(),
            args,
            user_roles,
            service,
            state: Arc::clone(&self.state),
            storage: self.storage.clone(),
            loader: Arc::clone(&self.loader),
            help: Arc::clone(&self.help),
            sessions: Arc::clone(&self.sessions),
            gateway: Arc::clone(&self.gateway),
        };

        match handler(hctx).await {
            Ok(HandlerReply::Text(text)) => Dispatched {
                reply: Some(text),
                error: None,
            },
            Ok(HandlerReply::Error(text)) => Dispatched {
                reply: Some(format!("Error: {text}")),
                error: None,
            },
            Ok(HandlerReply::Silent) => Dispatched {
                reply: None,
                error: None,
            },
            Err(e) => {
                error!(command, error = %e, "handler failed");
                Dispatched {
                    reply: Some(HANDLER_ERROR_REPLY.to_owned()),
                    error: Some(format!("{e:#}")),
                }
            }
        }
    }
}
