//! Turns a raw message body into zero or more parsed commands.
//!
//! A body is split into lines; each line is either a prefixed command
//! (leading `.`), an args-only line bound to the chat's designated command,
//! or discarded. Argument tokens are bound positionally against the
//! command's first syntax; the router re-binds after the permission manager
//! selects a different syntax.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::tokenize::tokenize;
use crate::parser::types::{TypeError, TypeParser};
use crate::schema::{CommandScope, ServiceLoader, Syntax};

/// Bound argument values by parameter name.
pub type Args = BTreeMap<String, serde_json::Value>;

/// Apply an invocation pattern, returning the trimmed line remainder.
fn strip_prefix<'a>(pattern: &Regex, line: &'a str) -> Option<&'a str> {
    pattern
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// A command resolved from one line of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// Catalog the command belongs to.
    pub scope: CommandScope,
    /// Canonical command name.
    pub command: String,
    /// Argument tokens after the command words, in order.
    pub arg_tokens: Vec<String>,
    /// Index of the syntax the arguments are currently bound against.
    pub syntax_index: usize,
    /// Bound argument values.
    pub args: Args,
    /// Required parameters that did not bind.
    pub missing: Vec<String>,
    /// Whether the line carried the bot prefix (args-only lines do not).
    pub prefixed: bool,
}

impl ParsedCommand {
    /// Whether the caller supplied no argument tokens at all.
    pub fn raw_args_empty(&self) -> bool {
        self.arg_tokens.is_empty()
    }
}

/// Outcome of parsing a single line.
#[derive(Debug, Clone)]
pub enum ParsedItem {
    /// The line resolved to a command.
    Command(ParsedCommand),
    /// A prefixed line whose first token matched no catalog.
    Unknown {
        /// The unresolvable leading token.
        token: String,
    },
    /// A prefixed command whose arguments failed type checking.
    Malformed {
        /// The command that was addressed.
        command: String,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Per-chat inputs the parser needs beyond the message body.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    /// First-token prefix selecting the root scope.
    pub root_prefix: String,
    /// First-token prefix selecting the admin scope.
    pub admin_prefix: String,
    /// Designated `(service, command)` for bare args-only lines, when the
    /// chat has one configured and the service is installed.
    pub args_only: Option<(String, String)>,
    /// Service whose commands may omit the service token in this chat.
    pub disable_service_prefix: Option<String>,
}

/// The command parser.
pub struct CommandParser {
    loader: Arc<ServiceLoader>,
    types: TypeParser,
    invoke_pattern: Regex,
}

impl CommandParser {
    /// Build a parser over the loaded catalog with the given invocation
    /// pattern (capture group 1 must hold the line remainder).
    pub fn new(loader: Arc<ServiceLoader>, invoke_pattern: Regex) -> Self {
        let types = TypeParser::new(loader.type_catalog().clone());
        Self {
            loader,
            types,
            invoke_pattern,
        }
    }

    /// The typed-argument parser backing this command parser.
    pub fn types(&self) -> &TypeParser {
        &self.types
    }

    /// Parse a message body into per-line outcomes.
    pub fn parse(&self, body: &str, ctx: &ParseContext) -> Vec<ParsedItem> {
        self.parse_with(body, ctx, None)
    }

    /// Like [`parse`](Self::parse), with a runtime override of the
    /// invocation pattern (set by the root operator).
    pub fn parse_with(
        &self,
        body: &str,
        ctx: &ParseContext,
        pattern: Option<&Regex>,
    ) -> Vec<ParsedItem> {
        let pattern = pattern.unwrap_or(&self.invoke_pattern);
        let lines: Vec<&str> = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let Some(first) = lines.first() else {
            return Vec::new();
        };

        // A bare first line means the whole message may be an args-only
        // invocation of the chat's designated command.
        if strip_prefix(pattern, first).is_none() {
            if let Some(cmd) = self.parse_args_only(&tokenize(body), ctx) {
                return vec![ParsedItem::Command(cmd)];
            }
        }

        let mut items = Vec::new();
        for line in lines {
            match strip_prefix(pattern, line) {
                Some(rest) => {
                    if let Some(item) = self.parse_prefixed(rest, ctx) {
                        items.push(item);
                    }
                }
                None => {
                    if let Some(cmd) = self.parse_args_only(&tokenize(line), ctx) {
                        items.push(ParsedItem::Command(cmd));
                    }
                    // Otherwise the line is silently discarded.
                }
            }
        }
        items
    }

    fn parse_prefixed(&self, rest: &str, ctx: &ParseContext) -> Option<ParsedItem> {
        let tokens = tokenize(rest);
        let first = tokens.first()?.clone();

        if first == ctx.root_prefix {
            return Some(self.scoped_command(CommandScope::Root, &tokens[1..]));
        }
        if first == ctx.admin_prefix {
            return Some(self.scoped_command(CommandScope::Admin, &tokens[1..]));
        }
        if self.loader.get_command(&CommandScope::Builtin, &first).is_some() {
            return Some(self.scoped_command(CommandScope::Builtin, &tokens));
        }
        if self.loader.get(&first).is_some() {
            let scope = CommandScope::Service(self.loader.canonical_service_id(&first));
            return Some(self.scoped_command(scope, &tokens[1..]));
        }
        if let Some(service) = &ctx.disable_service_prefix {
            if self.loader.get(service).is_some() {
                let scope = CommandScope::Service(service.clone());
                return Some(self.scoped_command(scope, &tokens));
            }
        }
        Some(ParsedItem::Unknown { token: first })
    }

    /// Resolve and bind `[command, args…]` tokens inside a known scope.
    fn scoped_command(&self, scope: CommandScope, tokens: &[String]) -> ParsedItem {
        let Some(name) = tokens.first() else {
            return ParsedItem::Unknown {
                token: scope.to_string(),
            };
        };
        let Some(def) = self.loader.get_command(&scope, name) else {
            return ParsedItem::Unknown {
                token: name.clone(),
            };
        };
        let command = def.name.clone();
        let arg_tokens: Vec<String> = tokens.iter().skip(1).cloned().collect();

        match self.bind(&arg_tokens, def.syntaxes.first()) {
            Ok((args, missing)) => ParsedItem::Command(ParsedCommand {
                scope,
                command,
                arg_tokens,
                syntax_index: 0,
                args,
                missing,
                prefixed: true,
            }),
            Err(e) => ParsedItem::Malformed {
                command,
                reason: e.to_string(),
            },
        }
    }

    /// Bind a bare line against the chat's designated args-only command.
    /// Accepted only when every required parameter resolves.
    fn parse_args_only(&self, tokens: &[String], ctx: &ParseContext) -> Option<ParsedCommand> {
        let (service, command) = ctx.args_only.as_ref()?;
        let scope = CommandScope::Service(service.clone());
        let def = self.loader.get_command(&scope, command)?;
        let (args, missing) = self.bind(tokens, def.syntaxes.first()).ok()?;
        if !missing.is_empty() {
            return None;
        }
        Some(ParsedCommand {
            scope,
            command: def.name.clone(),
            arg_tokens: tokens.to_vec(),
            syntax_index: 0,
            args,
            missing,
            prefixed: false,
        })
    }

    /// Re-bind a parsed command against another of its syntaxes.
    pub fn rebind(
        &self,
        parsed: &ParsedCommand,
        syntax_index: usize,
    ) -> Result<ParsedCommand, TypeError> {
        let def = self.loader.get_command(&parsed.scope, &parsed.command);
        let syntax = def.and_then(|d| d.syntaxes.get(syntax_index));
        let (args, missing) = self.bind(&parsed.arg_tokens, syntax)?;
        Ok(ParsedCommand {
            syntax_index,
            args,
            missing,
            ..parsed.clone()
        })
    }

    /// Bind ordered tokens against a syntax's ordered parameters.
    ///
    /// Each parameter consumes one token, except a trailing `string` /
    /// `Arguments` parameter, which consumes the remaining tokens joined by
    /// spaces. Surplus tokens are discarded. Missing required parameters are
    /// reported rather than failed; present tokens that fail their type
    /// check are errors.
    fn bind(
        &self,
        tokens: &[String],
        syntax: Option<&Syntax>,
    ) -> Result<(Args, Vec<String>), TypeError> {
        let mut args = Args::new();
        let mut missing = Vec::new();
        let Some(syntax) = syntax else {
            return Ok((args, missing));
        };

        let last = syntax.params.len().saturating_sub(1);
        for (i, param) in syntax.params.iter().enumerate() {
            let greedy = i == last
                && !param.is_list
                && matches!(param.type_name.as_str(), "string" | "Arguments");
            let raw: Option<String> = if greedy {
                let rest = tokens.get(i..).unwrap_or(&[]);
                if rest.is_empty() {
                    None
                } else {
                    Some(rest.join(" "))
                }
            } else {
                tokens.get(i).cloned()
            };

            match raw {
                None if !param.can_be_absent() => missing.push(param.name.clone()),
                raw => {
                    let value = self.types.parse(raw.as_deref(), param)?;
                    args.insert(param.name.clone(), value);
                }
            }
        }
        Ok((args, missing))
    }
}
