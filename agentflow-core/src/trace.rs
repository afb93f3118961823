//! Entry-point tracing
//!
//! [`traced`] wraps any workflow entry point and reports its name, input,
//! output (or error) and duration to a [`TraceSink`]. It is a pure side channel:
//! the wrapped future's result is returned untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow_core::trace::{traced, InMemoryTraceSink};
//!
//! let sink = InMemoryTraceSink::new();
//! let answer = traced(&sink, "prompt_chain", json!({"query": query}), chain.run(query, &steps)).await?;
//! println!("{}", sink.to_json_pretty()?);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;
use uuid::Uuid;

/// One observed invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: Uuid,
    pub name: String,
    pub input: Value,
    /// Serialized output, `Null` on failure
    pub output: Value,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TraceRecord {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Destination for trace records
pub trait TraceSink: Send + Sync {
    fn record(&self, record: TraceRecord);
}

/// Collects records in memory for inspection or export
#[derive(Debug, Default)]
pub struct InMemoryTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl InMemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records collected so far, in completion order
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.records())
    }

    /// Export to pretty JSON
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.records())
    }

    /// One line per record
    pub fn to_summary(&self) -> String {
        self.records()
            .iter()
            .map(|r| {
                format!(
                    "{} {} {}ms{}",
                    r.name,
                    if r.success() { "SUCCESS" } else { "FAILED" },
                    r.duration_ms,
                    r.error.as_ref().map(|e| format!(" ({})", e)).unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TraceSink for InMemoryTraceSink {
    fn record(&self, record: TraceRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

/// Emits each record as a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&self, record: TraceRecord) {
        match &record.error {
            None => tracing::info!(
                trace_id = %record.id,
                name = %record.name,
                duration_ms = record.duration_ms,
                "Workflow completed"
            ),
            Some(error) => tracing::warn!(
                trace_id = %record.id,
                name = %record.name,
                duration_ms = record.duration_ms,
                %error,
                "Workflow failed"
            ),
        }
    }
}

/// Run `future`, reporting it to `sink` without altering its result
pub async fn traced<F, T, E>(sink: &dyn TraceSink, name: &str, input: Value, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    T: Serialize,
    E: Display,
{
    let started_at = Utc::now();
    let start = Instant::now();

    let result = future.await;

    let (output, error) = match &result {
        Ok(value) => (serde_json::to_value(value).unwrap_or(Value::Null), None),
        Err(e) => (Value::Null, Some(e.to_string())),
    };

    sink.record(TraceRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        input,
        output,
        error,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
    });

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_traced_passes_result_through() {
        let sink = InMemoryTraceSink::new();

        let value: Result<Vec<String>, String> = traced(&sink, "fan_out", json!({"n": 2}), async {
            Ok(vec!["a".to_string(), "b".to_string()])
        })
        .await;

        assert_eq!(value.unwrap(), vec!["a", "b"]);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "fan_out");
        assert_eq!(records[0].input, json!({"n": 2}));
        assert_eq!(records[0].output, json!(["a", "b"]));
        assert!(records[0].success());
    }

    #[tokio::test]
    async fn test_traced_records_errors() {
        let sink = InMemoryTraceSink::new();

        let result: Result<(), String> =
            traced(&sink, "route", Value::Null, async { Err("no route".to_string()) }).await;

        assert_eq!(result.unwrap_err(), "no route");
        let record = &sink.records()[0];
        assert_eq!(record.error.as_deref(), Some("no route"));
        assert_eq!(record.output, Value::Null);
        assert!(sink.to_summary().contains("route FAILED"));
    }

    #[tokio::test]
    async fn test_json_export() {
        let sink = InMemoryTraceSink::new();
        let _: Result<u32, String> = traced(&sink, "a", Value::Null, async { Ok(1) }).await;
        let _: Result<u32, String> = traced(&LogTraceSink, "b", Value::Null, async { Ok(2) }).await;

        let exported: Vec<TraceRecord> = serde_json::from_str(&sink.to_json().unwrap()).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].output, json!(1));
    }
}
