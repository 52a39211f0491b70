//! Render Wrappers
//!
//! Adapters from typed expressions to sink-shaped payloads. Each wrapper
//! takes the application's expression and returns the fallible closure an
//! output binding expects; the output widget kind determines which wrapper
//! fits (text widgets take strings, plot/table widgets take structured
//! data).

use serde::Serialize;

use crate::error::EvalError;

use super::sink::SinkValue;

/// Wrap a text expression for a text output.
pub fn render_text<F>(f: F) -> impl Fn() -> Result<SinkValue, EvalError> + Send + Sync + 'static
where
    F: Fn() -> String + Send + Sync + 'static,
{
    move || Ok(SinkValue::String(f()))
}

/// Wrap an expression producing any serializable value (a number, a record,
/// a plot description) for a structured output.
pub fn render_value<T, F>(f: F) -> impl Fn() -> Result<SinkValue, EvalError> + Send + Sync + 'static
where
    T: Serialize,
    F: Fn() -> T + Send + Sync + 'static,
{
    move || serde_json::to_value(f()).map_err(|e| EvalError::failed(e))
}

/// Wrap an expression producing rows for a table output.
pub fn render_table<T, F>(f: F) -> impl Fn() -> Result<SinkValue, EvalError> + Send + Sync + 'static
where
    T: Serialize,
    F: Fn() -> Vec<T> + Send + Sync + 'static,
{
    move || serde_json::to_value(f()).map_err(|e| EvalError::failed(e))
}
