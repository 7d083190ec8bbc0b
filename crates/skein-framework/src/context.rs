//! Per-update context.
//!
//! The framework is generic over the context type threaded through a chain.
//! Anything implementing [`UpdateContext`] works with the filter operators
//! (`on`, `hears`, `command`, ...); [`Context`] is the default choice.
//!
//! A context is created once per update and owned by the dispatch that
//! created it. Middleware shares it as an `Arc` and may decorate it through
//! interior mutability (the state map, the trigger match) but never replaces
//! it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use skein_core::{BotInfo, Update};

/// What a trigger matched in the update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerMatch {
    /// The matched text. For commands, the arguments after the command.
    pub matched: String,
    /// Capture groups of a pattern trigger, in order.
    pub groups: Vec<Option<String>>,
}

/// Access to the update behind a context.
pub trait UpdateContext: Send + Sync + 'static {
    /// The update being processed.
    fn update(&self) -> &Update;

    /// Identity of the bot, if known.
    fn me(&self) -> Option<&BotInfo> {
        None
    }

    /// Records what a trigger matched. The default discards it.
    fn set_match(&self, _m: TriggerMatch) {}
}

// =============================================================================
// Context
// =============================================================================

/// The default context: the update, the bot identity, the last trigger
/// match, and a type-keyed state map for decoration.
///
/// # Example
///
/// ```rust,ignore
/// async fn handle(ctx: Arc<Context>, next: Next) -> MiddlewareResult {
///     ctx.set_state(Session { visits: 1 });
///     next.run().await
/// }
/// ```
pub struct Context {
    update: Update,
    me: Option<BotInfo>,
    matched: Mutex<Option<TriggerMatch>>,
    state: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Context {
    /// Creates a context for `update`.
    pub fn new(update: Update, me: Option<BotInfo>) -> Self {
        Self {
            update,
            me,
            matched: Mutex::new(None),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the last trigger match, if any.
    pub fn get_match(&self) -> Option<TriggerMatch> {
        self.matched.lock().clone()
    }

    /// Stores a value in the state map.
    ///
    /// Only one value per type can be stored; subsequent calls overwrite.
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a cloned value from the state map.
    pub fn get_state<T: Clone + 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Returns `true` if a value of type `T` exists in the state map.
    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.lock().contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns a value from the state map.
    pub fn take_state<T: 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }
}

impl UpdateContext for Context {
    fn update(&self) -> &Update {
        &self.update
    }

    fn me(&self) -> Option<&BotInfo> {
        self.me.as_ref()
    }

    fn set_match(&self, m: TriggerMatch) {
        *self.matched.lock() = Some(m);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("update_id", &self.update.update_id)
            .field("kind", &self.update.kind())
            .field("matched", &*self.matched.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        Context::new(Update::new(1, "message", json!({ "text": "hi" })), None)
    }

    #[test]
    fn test_state_roundtrip() {
        let ctx = ctx();
        assert!(!ctx.has_state::<u32>());

        ctx.set_state(7u32);
        assert_eq!(ctx.get_state::<u32>(), Some(7));
        assert_eq!(ctx.take_state::<u32>(), Some(7));
        assert!(!ctx.has_state::<u32>());
    }

    #[test]
    fn test_set_match_overwrites() {
        let ctx = ctx();
        ctx.set_match(TriggerMatch {
            matched: "a".into(),
            groups: vec![],
        });
        ctx.set_match(TriggerMatch {
            matched: "b".into(),
            groups: vec![Some("x".into())],
        });
        assert_eq!(ctx.get_match().map(|m| m.matched), Some("b".to_string()));
    }
}
