//! Output Sinks
//!
//! A sink is the external destination for output values: in a deployed
//! frontend, the widget layer that renders text, plots, and tables. The
//! engine only requires that pushed payloads match what the sink expects;
//! everything else about presentation is the sink's business.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// The payload type pushed to sinks.
///
/// JSON covers the shapes output widgets consume (text, records, tables)
/// without the engine knowing widget types.
pub type SinkValue = serde_json::Value;

/// One push to a named sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkUpdate {
    /// A fresh value.
    Value(SinkValue),

    /// An error indicator: the computation behind this sink failed.
    Error(String),
}

/// Receives pushes for a session's named outputs.
pub trait OutputSink: Send + Sync {
    /// Deliver an update for the named output.
    fn receive(&self, name: &str, update: SinkUpdate);
}

/// An in-memory sink that records every update, for tests and demos.
#[derive(Default)]
pub struct MemorySink {
    updates: RwLock<HashMap<String, Vec<SinkUpdate>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent update for a name, if any.
    pub fn latest(&self, name: &str) -> Option<SinkUpdate> {
        self.updates
            .read()
            .get(name)
            .and_then(|v| v.last().cloned())
    }

    /// Every update a name has received, oldest first.
    pub fn history(&self, name: &str) -> Vec<SinkUpdate> {
        self.updates.read().get(name).cloned().unwrap_or_default()
    }

    /// How many updates a name has received.
    pub fn update_count(&self, name: &str) -> usize {
        self.updates.read().get(name).map_or(0, Vec::len)
    }

    /// Names that have received at least one update.
    pub fn names(&self) -> Vec<String> {
        self.updates.read().keys().cloned().collect()
    }
}

impl OutputSink for MemorySink {
    fn receive(&self, name: &str, update: SinkUpdate) {
        self.updates
            .write()
            .entry(name.to_string())
            .or_default()
            .push(update);
    }
}

/// A write handle handed to event observers.
///
/// Observers produce output by writing through this handle instead of
/// mutating a shared namespace; the handle is injected per pass.
pub struct OutputHandle {
    sink: Arc<dyn OutputSink>,
}

impl OutputHandle {
    pub(crate) fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }

    /// Push a value to a named output.
    pub fn write(&self, name: &str, value: SinkValue) {
        self.sink.receive(name, SinkUpdate::Value(value));
    }

    /// Push an error indicator to a named output.
    pub fn error(&self, name: &str, message: impl std::fmt::Display) {
        self.sink.receive(name, SinkUpdate::Error(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_history_per_name() {
        let sink = MemorySink::new();

        sink.receive("a", SinkUpdate::Value(SinkValue::from(1)));
        sink.receive("a", SinkUpdate::Value(SinkValue::from(2)));
        sink.receive("b", SinkUpdate::Error("boom".into()));

        assert_eq!(sink.update_count("a"), 2);
        assert_eq!(sink.latest("a"), Some(SinkUpdate::Value(SinkValue::from(2))));
        assert_eq!(sink.latest("b"), Some(SinkUpdate::Error("boom".into())));
        assert_eq!(sink.latest("c"), None);
        assert_eq!(
            sink.history("a"),
            vec![
                SinkUpdate::Value(SinkValue::from(1)),
                SinkUpdate::Value(SinkValue::from(2)),
            ]
        );
    }

    #[test]
    fn handle_writes_through() {
        let sink = Arc::new(MemorySink::new());
        let handle = OutputHandle::new(sink.clone());

        handle.write("greeting", SinkValue::from("hi"));
        handle.error("plot", "no data");

        assert_eq!(
            sink.latest("greeting"),
            Some(SinkUpdate::Value(SinkValue::from("hi")))
        );
        assert_eq!(sink.latest("plot"), Some(SinkUpdate::Error("no data".into())));
    }
}
