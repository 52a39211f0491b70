//! Output Layer
//!
//! Everything between a computed value and the widget that displays it:
//! the sink abstraction pushes land on, the binding table entry that pairs
//! a sink name with its implicit derived node, and the render wrappers that
//! adapt typed expressions to sink payloads.
//!
//! Errors are scoped per sink: a failing computation pushes an error
//! indicator to its own output and leaves every other output alone.

mod binding;
mod render;
mod sink;

pub(crate) use binding::OutputBinding;
pub use render::{render_table, render_text, render_value};
pub use sink::{MemorySink, OutputHandle, OutputSink, SinkUpdate, SinkValue};
