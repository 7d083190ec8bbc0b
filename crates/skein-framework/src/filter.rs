//! Filter queries, triggers and the predicate-based composer operators.
//!
//! The operators in this module (`on`, `hears`, `command`, ...) only supply
//! predicates; every one of them is [`Composer::filter`] underneath.
//!
//! # Filter queries
//!
//! A query has up to three colon-separated levels, `kind[:key[:sub]]`:
//!
//! | Query | Matches |
//! |-------|---------|
//! | `message` | any update of kind `message` |
//! | `message:text` | messages with a `text` field |
//! | `:photo` / `msg:photo` | messages or channel posts with a photo |
//! | `edit:text` | edited messages or channel posts with text |
//! | `message:entities:url` | messages with a `url` entity |
//! | `:media` | messages or channel posts with a photo or a video |
//! | `callback_query:data` | callback queries carrying data |

use std::fmt;

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::composer::Composer;
use crate::context::{TriggerMatch, UpdateContext};
use crate::error::FilterError;
use crate::middleware::Middleware;
use skein_core::Update;

/// Every update kind a query may name in its first level.
pub const UPDATE_KINDS: &[&str] = &[
    "message",
    "edited_message",
    "channel_post",
    "edited_channel_post",
    "business_connection",
    "business_message",
    "edited_business_message",
    "deleted_business_messages",
    "message_reaction",
    "message_reaction_count",
    "inline_query",
    "chosen_inline_result",
    "callback_query",
    "shipping_query",
    "pre_checkout_query",
    "purchased_paid_media",
    "poll",
    "poll_answer",
    "my_chat_member",
    "chat_member",
    "chat_join_request",
    "chat_boost",
    "removed_chat_boost",
];

const FILE_KEYS: &[&str] = &[
    "photo",
    "animation",
    "audio",
    "document",
    "video",
    "video_note",
    "voice",
    "sticker",
];

fn expand_kind(level: &str) -> Option<Vec<&'static str>> {
    match level {
        "" | "msg" => Some(vec!["message", "channel_post"]),
        "edit" => Some(vec!["edited_message", "edited_channel_post"]),
        other => UPDATE_KINDS
            .iter()
            .find(|k| **k == other)
            .map(|k| vec![*k]),
    }
}

fn expand_key(level: &str) -> Vec<String> {
    match level {
        "media" => vec!["photo".into(), "video".into()],
        "file" => FILE_KEYS.iter().map(|k| k.to_string()).collect(),
        other => vec![other.to_string()],
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

// =============================================================================
// FilterQuery
// =============================================================================

/// A parsed filter query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterQuery {
    source: String,
    kinds: Vec<&'static str>,
    keys: Vec<String>,
    sub: Option<String>,
}

impl FilterQuery {
    /// Parses `kind[:key[:sub]]`.
    pub fn parse(query: &str) -> Result<Self, FilterError> {
        if query.is_empty() {
            return Err(FilterError::Empty);
        }

        let levels: Vec<&str> = query.split(':').collect();
        if levels.len() > 3 {
            return Err(FilterError::TooDeep(query.to_string()));
        }
        if levels[1..].iter().any(|l| l.is_empty()) {
            return Err(FilterError::EmptyLevel(query.to_string()));
        }

        let kinds = expand_kind(levels[0]).ok_or_else(|| FilterError::UnknownKind {
            kind: levels[0].to_string(),
            query: query.to_string(),
        })?;

        Ok(Self {
            source: query.to_string(),
            kinds,
            keys: levels.get(1).map(|l| expand_key(l)).unwrap_or_default(),
            sub: levels.get(2).map(|l| l.to_string()),
        })
    }

    /// Returns `true` if `update` satisfies the query.
    pub fn matches(&self, update: &Update) -> bool {
        self.kinds.iter().any(|kind| {
            update
                .get(kind)
                .is_some_and(|payload| self.matches_payload(payload))
        })
    }

    fn matches_payload(&self, payload: &Value) -> bool {
        if self.keys.is_empty() {
            return true;
        }
        self.keys.iter().any(|key| {
            let Some(value) = payload.get(key).filter(|v| is_truthy(v)) else {
                return false;
            };
            match &self.sub {
                None => true,
                Some(sub) if key == "entities" || key == "caption_entities" => {
                    value.as_array().is_some_and(|entities| {
                        entities
                            .iter()
                            .any(|e| e.get("type").and_then(Value::as_str) == Some(sub.as_str()))
                    })
                }
                Some(sub) => match value {
                    Value::Array(items) => items
                        .iter()
                        .any(|item| item.get(sub).is_some_and(is_truthy)),
                    other => other.get(sub).is_some_and(is_truthy),
                },
            }
        })
    }
}

impl fmt::Display for FilterQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for FilterQuery {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Triggers
// =============================================================================

/// Something a piece of text can be matched against.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// The whole text must be equal.
    Text(String),
    /// The pattern must match somewhere in the text.
    Pattern(Regex),
}

impl Trigger {
    /// Matches `text`, returning what was matched.
    pub fn find(&self, text: &str) -> Option<TriggerMatch> {
        match self {
            Self::Text(expected) => (expected == text).then(|| TriggerMatch {
                matched: text.to_string(),
                groups: Vec::new(),
            }),
            Self::Pattern(regex) => regex.captures(text).map(|caps| TriggerMatch {
                matched: caps
                    .get(0)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                groups: caps
                    .iter()
                    .skip(1)
                    .map(|g| g.map(|m| m.as_str().to_string()))
                    .collect(),
            }),
        }
    }
}

impl From<&str> for Trigger {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Trigger {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Regex> for Trigger {
    fn from(r: Regex) -> Self {
        Self::Pattern(r)
    }
}

/// One or more triggers; the first that matches wins.
#[derive(Debug, Clone)]
pub struct Triggers(Vec<Trigger>);

impl Triggers {
    /// Matches `text` against each trigger in order.
    pub fn find(&self, text: &str) -> Option<TriggerMatch> {
        self.0.iter().find_map(|t| t.find(text))
    }
}

impl From<Trigger> for Triggers {
    fn from(t: Trigger) -> Self {
        Self(vec![t])
    }
}

impl From<&str> for Triggers {
    fn from(s: &str) -> Self {
        Self(vec![s.into()])
    }
}

impl From<String> for Triggers {
    fn from(s: String) -> Self {
        Self(vec![s.into()])
    }
}

impl From<Regex> for Triggers {
    fn from(r: Regex) -> Self {
        Self(vec![r.into()])
    }
}

impl<T: Into<Trigger>> From<Vec<T>> for Triggers {
    fn from(list: Vec<T>) -> Self {
        Self(list.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Trigger>, const N: usize> From<[T; N]> for Triggers {
    fn from(list: [T; N]) -> Self {
        Self(list.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Commands
// =============================================================================

/// A `/command` split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParsedCommand<'a> {
    name: &'a str,
    target: Option<&'a str>,
    args: &'a str,
}

fn parse_command(text: &str) -> Option<ParsedCommand<'_>> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim_start()),
        None => (rest, ""),
    };
    let (name, target) = match head.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (head, None),
    };
    (!name.is_empty()).then_some(ParsedCommand { name, target, args })
}

fn matches_command<C: UpdateContext>(ctx: &C, names: &[String]) -> bool {
    let Some(command) = ctx.update().text().and_then(parse_command) else {
        return false;
    };
    if !names.iter().any(|n| n == command.name) {
        return false;
    }
    if let (Some(target), Some(own)) = (
        command.target,
        ctx.me().and_then(|me| me.username.as_deref()),
    ) {
        if !target.eq_ignore_ascii_case(own) {
            trace!(addressed_to = target, "command addressed to another bot");
            return false;
        }
    }
    ctx.set_match(TriggerMatch {
        matched: command.args.to_string(),
        groups: Vec::new(),
    });
    true
}

fn matches_reaction<C: UpdateContext>(ctx: &C, reactions: &[String]) -> bool {
    let Some(payload) = ctx.update().get("message_reaction") else {
        return false;
    };
    let reaction_id = |r: &Value| {
        r.get("emoji")
            .or_else(|| r.get("custom_emoji_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| r.get("type").and_then(Value::as_str).map(str::to_string))
    };
    let list = |field: &str| -> Vec<String> {
        payload
            .get(field)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|r| reaction_id(r)).collect())
            .unwrap_or_default()
    };

    let old = list("old_reaction");
    list("new_reaction")
        .into_iter()
        .filter(|r| !old.contains(r))
        .any(|r| reactions.contains(&r))
}

/// Matches a string field of a payload against triggers, recording the match.
fn matches_field<C: UpdateContext>(ctx: &C, kind: &str, field: &str, triggers: &Triggers) -> bool {
    let found = ctx
        .update()
        .get(kind)
        .and_then(|p| p.get(field))
        .and_then(Value::as_str)
        .and_then(|value| triggers.find(value));
    match found {
        Some(m) => {
            ctx.set_match(m);
            true
        }
        None => false,
    }
}

fn parse_or_panic(query: &str) -> FilterQuery {
    FilterQuery::parse(query).unwrap_or_else(|e| panic!("invalid filter query: {e}"))
}

// =============================================================================
// Composer operators
// =============================================================================

impl<C: UpdateContext> Composer<C> {
    /// Runs `middleware` for updates matching the filter query.
    ///
    /// # Panics
    ///
    /// Panics if `query` is not a valid filter query.
    pub fn on(&self, query: &str, middleware: impl Into<Middleware<C>>) -> Composer<C> {
        let query = parse_or_panic(query);
        self.filter(move |ctx: &C| query.matches(ctx.update()), middleware)
    }

    /// Runs `middleware` for updates matching any of the queries.
    ///
    /// # Panics
    ///
    /// Panics if any query is invalid.
    pub fn on_any(&self, queries: &[&str], middleware: impl Into<Middleware<C>>) -> Composer<C> {
        let queries: Vec<FilterQuery> = queries.iter().map(|q| parse_or_panic(q)).collect();
        self.filter(
            move |ctx: &C| queries.iter().any(|q| q.matches(ctx.update())),
            middleware,
        )
    }

    /// Runs `middleware` for messages whose text or caption matches.
    pub fn hears(
        &self,
        triggers: impl Into<Triggers>,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C> {
        let triggers = triggers.into();
        self.filter(
            move |ctx: &C| match ctx.update().text().and_then(|t| triggers.find(t)) {
                Some(m) => {
                    ctx.set_match(m);
                    true
                }
                None => false,
            },
            middleware,
        )
    }

    /// Runs `middleware` for `/name` commands.
    ///
    /// `/name@bot` only matches when `bot` is this bot's username, or when
    /// the username is unknown. The arguments are recorded as the match.
    pub fn command(&self, name: &str, middleware: impl Into<Middleware<C>>) -> Composer<C> {
        self.commands(&[name], middleware)
    }

    /// Like [`command`](Self::command) for several command names.
    pub fn commands(&self, names: &[&str], middleware: impl Into<Middleware<C>>) -> Composer<C> {
        let names: Vec<String> = names
            .iter()
            .map(|n| n.trim_start_matches('/').to_string())
            .collect();
        self.filter(move |ctx: &C| matches_command(ctx, &names), middleware)
    }

    /// Runs `middleware` when one of `reactions` was newly added to a message.
    ///
    /// Entries are emoji or custom emoji identifiers.
    pub fn reaction(&self, reactions: &[&str], middleware: impl Into<Middleware<C>>) -> Composer<C> {
        let reactions: Vec<String> = reactions.iter().map(|r| r.to_string()).collect();
        self.filter(move |ctx: &C| matches_reaction(ctx, &reactions), middleware)
    }

    /// Runs `middleware` for updates from chats of the given types.
    pub fn chat_type(&self, types: &[&str], middleware: impl Into<Middleware<C>>) -> Composer<C> {
        let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
        self.filter(
            move |ctx: &C| {
                ctx.update()
                    .chat_type()
                    .is_some_and(|t| types.iter().any(|x| x == t))
            },
            middleware,
        )
    }

    /// Runs `middleware` for callback queries whose data matches.
    pub fn callback_query(
        &self,
        triggers: impl Into<Triggers>,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C> {
        self.payload_field("callback_query", "data", triggers.into(), middleware)
    }

    /// Runs `middleware` for game queries whose short name matches.
    pub fn game_query(
        &self,
        triggers: impl Into<Triggers>,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C> {
        self.payload_field("callback_query", "game_short_name", triggers.into(), middleware)
    }

    /// Runs `middleware` for inline queries whose query text matches.
    pub fn inline_query(
        &self,
        triggers: impl Into<Triggers>,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C> {
        self.payload_field("inline_query", "query", triggers.into(), middleware)
    }

    /// Runs `middleware` for chosen inline results whose id matches.
    pub fn chosen_inline_result(
        &self,
        triggers: impl Into<Triggers>,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C> {
        self.payload_field("chosen_inline_result", "result_id", triggers.into(), middleware)
    }

    /// Runs `middleware` for pre-checkout queries whose invoice payload matches.
    pub fn pre_checkout_query(
        &self,
        triggers: impl Into<Triggers>,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C> {
        self.payload_field("pre_checkout_query", "invoice_payload", triggers.into(), middleware)
    }

    /// Runs `middleware` for shipping queries whose invoice payload matches.
    pub fn shipping_query(
        &self,
        triggers: impl Into<Triggers>,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C> {
        self.payload_field("shipping_query", "invoice_payload", triggers.into(), middleware)
    }

    fn payload_field(
        &self,
        kind: &'static str,
        field: &'static str,
        triggers: Triggers,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C> {
        self.filter(
            move |ctx: &C| matches_field(ctx, kind, field, &triggers),
            middleware,
        )
    }
}
