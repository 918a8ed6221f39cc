//! Record sinks.
//!
//! The driver hands every successful [`UpsertRecord`] to a [`RecordSink`].
//! The upsert collaborator sits behind this trait; this crate ships sinks
//! for JSON lines, CSV, and an in-memory buffer.

use std::io::Write;

use serde_json::{Map, Value};

use crate::error::SinkResult;
use crate::transform::builder::UpsertRecord;

pub trait RecordSink {
    fn write(&mut self, record: &UpsertRecord) -> SinkResult<()>;

    /// Flush buffered output. Called once after the last record.
    fn finish(&mut self) -> SinkResult<()> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn write(&mut self, record: &UpsertRecord) -> SinkResult<()> {
        (**self).write(record)
    }

    fn finish(&mut self) -> SinkResult<()> {
        (**self).finish()
    }
}

// =============================================================================
// JSON Lines
// =============================================================================

/// One JSON object per line, written as records arrive.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write(&mut self, record: &UpsertRecord) -> SinkResult<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> SinkResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// =============================================================================
// CSV
// =============================================================================

/// CSV of destination columns.
///
/// Records are buffered so the header can be the union of all columns, in
/// the order they were first seen. Everything is written on `finish`.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn write(&mut self, record: &UpsertRecord) -> SinkResult<()> {
        for column in record.columns.keys() {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
        self.rows.push(record.columns.clone());
        Ok(())
    }

    fn finish(&mut self) -> SinkResult<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        self.writer.write_record(&self.columns)?;
        for row in self.rows.drain(..) {
            let fields = self.columns.iter().map(|c| csv_field(row.get(c)));
            self.writer.write_record(fields)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

fn csv_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<UpsertRecord>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, record: &UpsertRecord) -> SinkResult<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> SinkResult<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(key: &str, columns: Value) -> UpsertRecord {
        UpsertRecord {
            table: "crf63_dailysales".into(),
            alternate_key: "crf63_businesskey".into(),
            key: key.into(),
            columns: columns.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn test_json_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write(&record("a", json!({ "crf63_businesskey": "a", "n": 1 }))).unwrap();
        sink.write(&record("b", json!({ "crf63_businesskey": "b" }))).unwrap();
        sink.finish().unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["key"], "a");
        assert_eq!(lines[0]["columns"]["n"], 1);
        assert_eq!(lines[1]["table"], "crf63_dailysales");
    }

    #[test]
    fn test_csv_header_is_union_of_columns() {
        let mut buf = Vec::new();
        {
            let mut sink = CsvSink::new(&mut buf);
            sink.write(&record("a", json!({ "key": "a", "sales": 1.5 }))).unwrap();
            sink.write(&record("b", json!({ "key": "b", "orders": 3, "note": "x, y" })))
                .unwrap();
            sink.finish().unwrap();
        }

        let out = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "key,sales,orders,note");
        assert_eq!(lines[1], "a,1.5,,");
        assert_eq!(lines[2], "b,,3,\"x, y\"");
    }

    #[test]
    fn test_csv_without_records_writes_nothing() {
        let mut buf = Vec::new();
        {
            let mut sink = CsvSink::new(&mut buf);
            sink.finish().unwrap();
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_boxed_sink() {
        let mut sink: Box<dyn RecordSink> = Box::new(MemorySink::new());
        sink.write(&record("a", json!({}))).unwrap();
        sink.finish().unwrap();
    }
}
