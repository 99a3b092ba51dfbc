//! Callbacks installed by default.

use hexgate_common::{EngineValue, ValueKind};

use crate::registry::{ArgPolicy, CallbackHandler, CallbackRegistry};

/// Name of the built-in print callback.
pub const PRINT: &str = "print";

/// Builds a `print` handler writing to `sink`.
///
/// Only string arguments are printed; others are dropped. The strings are
/// joined with single spaces into one line. The handler returns `null`.
pub fn print_handler<F>(sink: F) -> CallbackHandler
where
    F: Fn(&str) + Send + Sync + 'static,
{
    CallbackHandler::with_policy(ArgPolicy::Filter(vec![ValueKind::String]), move |args| {
        let line = args
            .iter()
            .filter_map(EngineValue::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        sink(&line);
        Ok(None)
    })
}

/// Registers the built-in callbacks. `print` writes to stdout.
pub fn install_builtins(registry: &CallbackRegistry) {
    registry.register(PRINT, print_handler(|line| println!("{}", line)));
}
