//! Multi-turn prompting for commands invoked with missing arguments.
//!
//! A session walks the caller through the missing parameters one prompt at
//! a time. Input typed during a prompt is always consumed by the session
//! (the router checks here before parsing), `cancel` aborts, `skip` passes
//! an optional parameter, and five minutes of silence expires the session
//! so the next message is treated fresh.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;

use crate::parser::command::{Args, ParsedCommand};
use crate::parser::types::TypeParser;
use crate::router::context::{HookInput, InteractiveContext, ListItem};
use crate::schema::{CommandScope, ParameterDefinition, ServiceLoader};
use crate::state::{Session, StateError, StateManager};
use crate::storage::StorageManager;

/// Default session inactivity timeout in seconds.
pub const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 300;

/// A session that collected everything it needed.
#[derive(Debug, Clone)]
pub struct CompletedSession {
    /// Scope of the completed command.
    pub scope: CommandScope,
    /// Canonical command name.
    pub command: String,
    /// Syntax the arguments were collected for.
    pub syntax_index: usize,
    /// Full argument set, prompted values included.
    pub args: Args,
    /// Effective roles captured when the session was opened.
    pub exec_roles: Vec<String>,
}

/// What one session input produced.
#[derive(Debug, Clone)]
pub enum SessionStep {
    /// The user aborted; reply tersely.
    Cancelled,
    /// The next prompt to send.
    Prompt(String),
    /// The input failed validation; re-prompt the same parameter.
    Invalid {
        /// Why the value was rejected.
        reason: String,
        /// The repeated prompt.
        prompt: String,
    },
    /// All parameters collected; execute the command.
    Complete(CompletedSession),
}

/// Drives interactive sessions stored in the state document.
pub struct SessionManager {
    state: Arc<StateManager>,
    loader: Arc<ServiceLoader>,
    storage: StorageManager,
    types: TypeParser,
    timeout: Duration,
}

impl SessionManager {
    /// Build a manager with the given inactivity timeout.
    pub fn new(
        state: Arc<StateManager>,
        loader: Arc<ServiceLoader>,
        storage: StorageManager,
        timeout_secs: i64,
    ) -> Self {
        let types = TypeParser::new(loader.type_catalog().clone());
        Self {
            state,
            loader,
            storage,
            types,
            timeout: Duration::seconds(timeout_secs),
        }
    }

    /// The live, unexpired session for `(chat, user)`. An expired session
    /// is deleted silently and reported as absent.
    pub async fn active(&self, chat_id: &str, user_id: &str) -> Result<Option<Session>, StateError> {
        let Some(session) = self.state.session(chat_id, user_id).await else {
            return Ok(None);
        };
        let idle = Utc::now().signed_duration_since(session.last_activity);
        if idle > self.timeout {
            debug!(chat_id, user_id, command = %session.command, "session expired");
            self.state.remove_session(chat_id, user_id).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Open a session for a command whose required arguments are missing.
    /// Returns the first prompt, prefixed with a cancellation hint.
    pub async fn open(
        &self,
        chat_id: &str,
        user_id: &str,
        parsed: &ParsedCommand,
        exec_roles: Vec<String>,
    ) -> Result<String, StateError> {
        let now = Utc::now();
        let session = Session {
            scope: parsed.scope.clone(),
            command: parsed.command.clone(),
            syntax_index: parsed.syntax_index,
            args: parsed.args.clone(),
            pending: parsed.missing.clone(),
            current: 0,
            exec_roles,
            created_at: now,
            last_activity: now,
        };
        let prompt = self.render_prompt(chat_id, user_id, &session).await;
        self.state.put_session(chat_id, user_id, session).await?;
        Ok(format!("_Reply \"cancel\" to abort_\n\n{prompt}"))
    }

    /// Feed one message into the live session.
    ///
    /// Returns `None` when there is no live session (absent or just
    /// expired); the router then processes the message fresh.
    pub async fn handle_input(
        &self,
        chat_id: &str,
        user_id: &str,
        body: &str,
    ) -> Result<Option<SessionStep>, StateError> {
        let Some(mut session) = self.active(chat_id, user_id).await? else {
            return Ok(None);
        };
        let input = body.trim();

        if input.eq_ignore_ascii_case("cancel") {
            self.state.remove_session(chat_id, user_id).await?;
            debug!(chat_id, user_id, "session cancelled");
            return Ok(Some(SessionStep::Cancelled));
        }

        let Some(param) = self.current_param_def(&session) else {
            // Catalog changed under a persisted session; drop it.
            self.state.remove_session(chat_id, user_id).await?;
            return Ok(None);
        };
        let param_name = param.name.clone();

        let value = if input.eq_ignore_ascii_case("skip") {
            if !param.can_be_absent() {
                let prompt = self.render_prompt(chat_id, user_id, &session).await;
                return Ok(Some(SessionStep::Invalid {
                    reason: format!("'{param_name}' is required"),
                    prompt,
                }));
            }
            self.types.parse(None, &param).unwrap_or(serde_json::Value::Null)
        } else {
            match self.types.parse(Some(input), &param) {
                Ok(value) => value,
                Err(e) => {
                    session.last_activity = Utc::now();
                    let prompt = self.render_prompt(chat_id, user_id, &session).await;
                    self.state.put_session(chat_id, user_id, session).await?;
                    return Ok(Some(SessionStep::Invalid {
                        reason: e.to_string(),
                        prompt,
                    }));
                }
            }
        };

        session.args.insert(param_name, value);
        session.current = session.current.saturating_add(1);
        session.last_activity = Utc::now();

        if session.is_complete() {
            self.state.remove_session(chat_id, user_id).await?;
            return Ok(Some(SessionStep::Complete(CompletedSession {
                scope: session.scope,
                command: session.command,
                syntax_index: session.syntax_index,
                args: session.args,
                exec_roles: session.exec_roles,
            })));
        }

        let prompt = self.render_prompt(chat_id, user_id, &session).await;
        self.state.put_session(chat_id, user_id, session).await?;
        Ok(Some(SessionStep::Prompt(prompt)))
    }

    /// The definition of the parameter currently prompted.
    fn current_param_def(&self, session: &Session) -> Option<ParameterDefinition> {
        let name = session.current_param()?;
        self.loader
            .get_command(&session.scope, &session.command)?
            .syntaxes
            .get(session.syntax_index)?
            .params
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Render the prompt for the session's current parameter: optional
    /// service context, blank line, then the question.
    async fn render_prompt(&self, chat_id: &str, user_id: &str, session: &Session) -> String {
        let Some(param) = self.current_param_def(session) else {
            return "…".to_owned();
        };

        let mut parts: Vec<String> = Vec::new();
        if let CommandScope::Service(service) = &session.scope {
            if let Some(hook) = self.loader.context_hook(service, &session.command) {
                let input = HookInput {
                    chat_id: chat_id.to_owned(),
                    user_id: user_id.to_owned(),
                    service: service.clone(),
                    command: session.command.clone(),
                    param: param.name.clone(),
                    args: session.args.clone(),
                    state: Arc::clone(&self.state),
                    storage: self.storage.clone(),
                };
                if let Some(context) = hook(input).await {
                    parts.push(render_context(&context));
                }
            }
        }

        let question = if param.description.is_empty() {
            param.name.clone()
        } else {
            param.description.clone()
        };
        let type_desc = self.types.catalog().describe(&param.type_name);
        let mut line = format!("*{question}?* _({type_desc})_");
        if param.can_be_absent() {
            line.push_str(" _or \"skip\"_");
        }
        parts.push(line);
        parts.join("\n\n")
    }
}

/// Render a hook contribution above the prompt question.
fn render_context(context: &InteractiveContext) -> String {
    match context {
        InteractiveContext::Text(text) | InteractiveContext::Message(text) => text.clone(),
        InteractiveContext::Selected(item) => format!("Selected: {}", render_item(item)),
        InteractiveContext::List {
            items,
            empty_message,
        } => {
            if items.is_empty() {
                return empty_message
                    .clone()
                    .unwrap_or_else(|| "Nothing here yet.".to_owned());
            }
            items
                .iter()
                .enumerate()
                .map(|(i, item)| format!("{}. {}", i.saturating_add(1), render_item(item)))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

fn render_item(item: &ListItem) -> String {
    match &item.sublabel {
        Some(sub) => format!("{} _{sub}_", item.label),
        None => item.label.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::command::ParsedCommand;
    use crate::state::MemoryStore;

    async fn fixture() -> (Arc<StateManager>, SessionManager) {
        let loader = Arc::new(crate::schema::loader::tests::test_loader());
        let state = Arc::new(
            StateManager::load(Arc::new(MemoryStore::new()), "root@s.whatsapp.net")
                .await
                .expect("load"),
        );
        state.ensure_chat("g1@g.us").await.expect("chat");
        let def = loader.get("exp").expect("exp declared").clone();
        state
            .install_service("g1@g.us", &def, &[])
            .await
            .expect("install");
        let storage = StorageManager::new(Arc::clone(&state));
        let sessions = SessionManager::new(
            Arc::clone(&state),
            loader,
            storage,
            DEFAULT_SESSION_TIMEOUT_SECS,
        );
        (state, sessions)
    }

    fn add_with_no_args() -> ParsedCommand {
        ParsedCommand {
            scope: CommandScope::Service("exp".to_owned()),
            command: "add".to_owned(),
            arg_tokens: vec![],
            syntax_index: 0,
            args: Args::new(),
            missing: vec!["amount".to_owned(), "item".to_owned()],
            prefixed: true,
        }
    }

    #[tokio::test]
    async fn test_open_prompts_first_missing_param() {
        let (_state, sessions) = fixture().await;
        let prompt = sessions
            .open("g1@g.us", "u1", &add_with_no_args(), vec!["child".to_owned()])
            .await
            .expect("open");
        assert!(prompt.starts_with("_Reply \"cancel\" to abort_"));
        assert!(prompt.ends_with("*Amount?* _(int)_"), "prompt was: {prompt}");
    }

    #[tokio::test]
    async fn test_collect_values_to_completion() {
        let (_state, sessions) = fixture().await;
        sessions
            .open("g1@g.us", "u1", &add_with_no_args(), vec!["child".to_owned()])
            .await
            .expect("open");

        let step = sessions
            .handle_input("g1@g.us", "u1", "50")
            .await
            .expect("input")
            .expect("live session");
        match step {
            SessionStep::Prompt(prompt) => {
                assert!(prompt.contains("*Item?*"), "prompt was: {prompt}")
            }
            other => panic!("expected prompt, got {other:?}"),
        }

        let step = sessions
            .handle_input("g1@g.us", "u1", "Lunch")
            .await
            .expect("input")
            .expect("live session");
        match step {
            SessionStep::Complete(done) => {
                assert_eq!(done.command, "add");
                assert_eq!(done.args.get("amount"), Some(&serde_json::json!(50)));
                assert_eq!(done.args.get("item"), Some(&serde_json::json!("Lunch")));
                assert_eq!(done.exec_roles, ["child"]);
            }
            other => panic!("expected completion, got {other:?}"),
        }

        // The session is gone afterwards.
        assert!(sessions
            .active("g1@g.us", "u1")
            .await
            .expect("active")
            .is_none());
    }

    #[tokio::test]
    async fn test_cancel_destroys_session() {
        let (_state, sessions) = fixture().await;
        sessions
            .open("g1@g.us", "u1", &add_with_no_args(), vec![])
            .await
            .expect("open");
        let step = sessions
            .handle_input("g1@g.us", "u1", "CANCEL")
            .await
            .expect("input")
            .expect("live session");
        assert!(matches!(step, SessionStep::Cancelled));
        assert!(sessions
            .active("g1@g.us", "u1")
            .await
            .expect("active")
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_value_reprompts_same_param() {
        let (_state, sessions) = fixture().await;
        sessions
            .open("g1@g.us", "u1", &add_with_no_args(), vec![])
            .await
            .expect("open");
        let step = sessions
            .handle_input("g1@g.us", "u1", "fifty")
            .await
            .expect("input")
            .expect("live session");
        match step {
            SessionStep::Invalid { prompt, reason } => {
                assert!(prompt.contains("*Amount?*"));
                assert!(reason.contains("fifty"));
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_skip_requires_optional() {
        let (_state, sessions) = fixture().await;
        sessions
            .open("g1@g.us", "u1", &add_with_no_args(), vec![])
            .await
            .expect("open");
        // `amount` is required; skip is rejected.
        let step = sessions
            .handle_input("g1@g.us", "u1", "skip")
            .await
            .expect("input")
            .expect("live session");
        assert!(matches!(step, SessionStep::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_expired_session_is_silently_dropped() {
        let (state, sessions) = fixture().await;
        sessions
            .open("g1@g.us", "u1", &add_with_no_args(), vec![])
            .await
            .expect("open");

        // Age the session past the timeout.
        let mut session = state.session("g1@g.us", "u1").await.expect("session");
        session.last_activity =
            Utc::now() - Duration::seconds(DEFAULT_SESSION_TIMEOUT_SECS.saturating_add(1));
        state
            .put_session("g1@g.us", "u1", session)
            .await
            .expect("put");

        assert!(sessions
            .handle_input("g1@g.us", "u1", "50")
            .await
            .expect("input")
            .is_none());
        assert!(state.session("g1@g.us", "u1").await.is_none());
    }

    #[tokio::test]
    async fn test_one_session_per_user_latest_wins() {
        let (state, sessions) = fixture().await;
        sessions
            .open("g1@g.us", "u1", &add_with_no_args(), vec![])
            .await
            .expect("open");
        let mut second = add_with_no_args();
        second.command = "edit".to_owned();
        second.missing = vec!["item_no".to_owned()];
        sessions
            .open("g1@g.us", "u1", &second, vec![])
            .await
            .expect("open");
        let live = state.session("g1@g.us", "u1").await.expect("session");
        assert_eq!(live.command, "edit");
    }
}
