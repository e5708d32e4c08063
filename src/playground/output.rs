//! Output capture for console calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::PlaygroundError;
use crate::playground::serializer::Data;

/// The console call a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Log,
    Warn,
    Error,
    Table,
}

/// One captured line of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    /// Kind of the originating call.
    #[serde(rename = "type")]
    pub kind: OutputKind,
    /// One entry per logged argument.
    pub data: Vec<Data>,
}

impl OutputLine {
    /// Create a new line.
    pub fn new(kind: OutputKind, data: Vec<Data>) -> Self {
        Self { kind, data }
    }

    /// The single error line reported for a failed run.
    pub fn failure(error: &PlaygroundError) -> Self {
        Self::new(
            OutputKind::Error,
            vec![Data::error(error.kind(), &error.to_string())],
        )
    }

    /// Check if this is an error line.
    pub fn is_error(&self) -> bool {
        self.kind == OutputKind::Error
    }
}

/// A shared, append-only buffer of output lines.
///
/// Clones share the same buffer, so the host keeps whatever a timed-out
/// run managed to log.
#[derive(Clone, Debug, Default)]
pub struct OutputCollector {
    lines: Arc<Mutex<Vec<OutputLine>>>,
}

impl OutputCollector {
    /// Create a new empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutputLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line.
    pub fn push(&self, line: OutputLine) {
        self.lock().push(line);
    }

    /// Append a line built from its parts.
    pub fn append(&self, kind: OutputKind, data: Vec<Data>) {
        self.push(OutputLine::new(kind, data));
    }

    /// Take the captured lines, leaving the buffer empty.
    pub fn take(&self) -> Vec<OutputLine> {
        std::mem::take(&mut *self.lock())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playground::serializer::DataType;
    use serde_json::json;

    #[test]
    fn test_clones_share_buffer() {
        let collector = OutputCollector::new();
        let writer = collector.clone();
        writer.append(OutputKind::Log, vec![Data::new(DataType::Number, "1")]);
        writer.append(OutputKind::Warn, vec![]);
        let lines = collector.take();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].kind, OutputKind::Warn);
    }

    #[test]
    fn test_take_empties_buffer() {
        let collector = OutputCollector::new();
        collector.append(OutputKind::Log, vec![]);
        assert_eq!(collector.take().len(), 1);
        assert!(collector.take().is_empty());
    }

    #[test]
    fn test_failure_line() {
        let line = OutputLine::failure(&PlaygroundError::IterationLimitExceeded);
        assert!(line.is_error());
        assert_eq!(line.data.len(), 1);
        assert_eq!(
            line.data[0].parsed().unwrap(),
            json!({ "name": "IterationLimitExceeded", "message": "Loop iteration limit exceeded" })
        );
    }

    #[test]
    fn test_wire_shape() {
        let line = OutputLine::new(OutputKind::Table, vec![Data::new(DataType::String, "|a|")]);
        assert_eq!(
            serde_json::to_value(&line).unwrap(),
            json!({ "type": "table", "data": [{ "type": "string", "value": "|a|" }] })
        );
    }
}
