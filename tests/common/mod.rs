//! Shared helpers for the middleware integration tests.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use logguard::{Field, Logger, Request, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

#[derive(Clone, Debug)]
pub struct Record {
    pub level: Level,
    pub message: String,
    pub fields: Vec<Field>,
}

#[allow(dead_code)]
impl Record {
    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.key.as_ref()).collect()
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }

    /// The field's payload as plain text, without the quoting `Display` adds.
    pub fn text(&self, key: &str) -> Option<String> {
        self.value(key).map(|v| match v {
            Value::Str(s) | Value::Any(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Keeps every record in memory, in emission order.
#[derive(Default)]
pub struct RecordingLogger {
    records: Mutex<Vec<Record>>,
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    fn push(&self, level: Level, message: &str, fields: &[Field]) {
        self.records.lock().unwrap().push(Record {
            level,
            message: message.to_owned(),
            fields: fields.to_vec(),
        });
    }
}

impl Logger for RecordingLogger {
    fn info(&self, message: &str, fields: &[Field]) {
        self.push(Level::Info, message, fields);
    }

    fn error(&self, message: &str, fields: &[Field]) {
        self.push(Level::Error, message, fields);
    }
}

#[allow(dead_code)]
pub fn get(uri: &str) -> Request {
    Request::new(
        http::Request::builder()
            .uri(uri)
            .header("host", "api.test")
            .header("user-agent", "integration-test")
            .body(Bytes::new())
            .unwrap(),
    )
    .with_remote_addr("127.0.0.1:40000".parse().unwrap())
}
