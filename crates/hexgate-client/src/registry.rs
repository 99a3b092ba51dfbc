//! Host callbacks the engine may invoke mid-execution.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use hexgate_common::{EngineValue, ValueKind};
use thiserror::Error;

/// Errors reported back to the engine as a callback reply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallbackError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("callback '{name}' rejected argument {index}: {kind} is not accepted")]
    Rejected {
        name: String,
        index: usize,
        kind: ValueKind,
    },

    #[error("callback '{name}' failed: {message}")]
    Failed { name: String, message: String },

    #[error("callback '{name}' panicked: {message}")]
    Panicked { name: String, message: String },
}

/// Which argument tags a handler accepts.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ArgPolicy {
    /// Every argument is passed through.
    #[default]
    Any,
    /// Arguments with an unlisted tag are dropped.
    Filter(Vec<ValueKind>),
    /// An argument with an unlisted tag rejects the call.
    Strict(Vec<ValueKind>),
}

impl ArgPolicy {
    /// Applies the policy, returning the position and tag of the first
    /// rejected argument under `Strict`.
    pub fn apply(&self, args: Vec<EngineValue>) -> Result<Vec<EngineValue>, (usize, ValueKind)> {
        match self {
            ArgPolicy::Any => Ok(args),
            ArgPolicy::Filter(kinds) => Ok(args
                .into_iter()
                .filter(|arg| kinds.contains(&ValueKind::of(arg)))
                .collect()),
            ArgPolicy::Strict(kinds) => {
                if let Some((index, arg)) = args
                    .iter()
                    .enumerate()
                    .find(|(_, arg)| !kinds.contains(&ValueKind::of(arg)))
                {
                    return Err((index, ValueKind::of(arg)));
                }
                Ok(args)
            }
        }
    }
}

type HandlerFn = dyn Fn(Vec<EngineValue>) -> Result<Option<EngineValue>, String> + Send + Sync;

/// A host function bound to a callback name.
///
/// Handlers return `Ok(None)` for "nothing", which the engine receives as
/// `null`, and `Err(message)` to report a failure.
#[derive(Clone)]
pub struct CallbackHandler {
    policy: ArgPolicy,
    func: Arc<HandlerFn>,
}

impl CallbackHandler {
    /// A handler accepting arguments of any tag.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Vec<EngineValue>) -> Result<Option<EngineValue>, String> + Send + Sync + 'static,
    {
        Self::with_policy(ArgPolicy::Any, func)
    }

    pub fn with_policy<F>(policy: ArgPolicy, func: F) -> Self
    where
        F: Fn(Vec<EngineValue>) -> Result<Option<EngineValue>, String> + Send + Sync + 'static,
    {
        Self {
            policy,
            func: Arc::new(func),
        }
    }

    pub fn policy(&self) -> &ArgPolicy {
        &self.policy
    }

    fn call(&self, name: &str, args: Vec<EngineValue>) -> Result<EngineValue, CallbackError> {
        let args = self
            .policy
            .apply(args)
            .map_err(|(index, kind)| CallbackError::Rejected {
                name: name.to_string(),
                index,
                kind,
            })?;

        match catch_unwind(AssertUnwindSafe(|| (self.func)(args))) {
            Ok(Ok(value)) => Ok(value.unwrap_or(EngineValue::Null)),
            Ok(Err(message)) => Err(CallbackError::Failed {
                name: name.to_string(),
                message,
            }),
            Err(payload) => Err(CallbackError::Panicked {
                name: name.to_string(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Name → handler table.
///
/// At most one handler is held per name; registering a name again replaces
/// the previous handler.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<String, CallbackHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous handler.
    pub fn register(&self, name: impl Into<String>, handler: CallbackHandler) {
        let name = name.into();
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), handler)
            .is_some();
        tracing::debug!(callback = %name, replaced, "Registered callback");
    }

    /// Removes the handler for `name`. Returns whether one was present.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the handler registered under `name` on the calling thread.
    ///
    /// The lock is released before the handler runs, so a handler may
    /// itself register or unregister callbacks.
    pub fn invoke(&self, name: &str, args: Vec<EngineValue>) -> Result<EngineValue, CallbackError> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CallbackError::UnknownFunction(name.to_string()))?;

        handler.call(name, args)
    }
}
