//! Structured logger seam.
//!
//! The middleware never format or persist records themselves. They hand a
//! message plus an ordered list of [`Field`]s to a [`Logger`], which owns
//! output format and destination. [`TracingLogger`] forwards to `tracing`;
//! anything else (a JSON writer, a test recorder) implements the trait.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};

/// One key/value pair of a structured record.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub key: Cow<'static, str>,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Duration(Duration),
    Time(DateTime<FixedOffset>),
    /// Free-form value rendered with `Display` at construction time.
    Any(String),
}

impl Field {
    pub fn str(key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: Value::Str(value.into()) }
    }

    pub fn int(key: impl Into<Cow<'static, str>>, value: i64) -> Self {
        Self { key: key.into(), value: Value::Int(value) }
    }

    pub fn duration(key: impl Into<Cow<'static, str>>, value: Duration) -> Self {
        Self { key: key.into(), value: Value::Duration(value) }
    }

    pub fn time(key: impl Into<Cow<'static, str>>, value: impl Into<DateTime<FixedOffset>>) -> Self {
        Self { key: key.into(), value: Value::Time(value.into()) }
    }

    pub fn any(key: impl Into<Cow<'static, str>>, value: impl fmt::Display) -> Self {
        Self { key: key.into(), value: Value::Any(value.to_string()) }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Duration(d) => write!(f, "{d:?}"),
            Self::Time(t) => f.write_str(&t.to_rfc3339()),
            Self::Any(s) => write!(f, "{s:?}"),
        }
    }
}

/// Destination for every record the middleware emit.
///
/// Called concurrently from every in-flight request.
pub trait Logger: Send + Sync + 'static {
    fn info(&self, message: &str, fields: &[Field]);
    fn error(&self, message: &str, fields: &[Field]);
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn info(&self, message: &str, fields: &[Field]) {
        (**self).info(message, fields);
    }

    fn error(&self, message: &str, fields: &[Field]) {
        (**self).error(message, fields);
    }
}

/// Emits records as `tracing` events under the `logguard` target.
///
/// `tracing` needs field names at compile time, so the dynamic field list is
/// rendered into a single `fields` value as space-separated `key=value` pairs.
/// Install any subscriber (e.g. `tracing_subscriber::fmt::init()`) to see them.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str, fields: &[Field]) {
        tracing::info!(target: "logguard", fields = %Pairs(fields), "{message}");
    }

    fn error(&self, message: &str, fields: &[Field]) {
        tracing::error!(target: "logguard", fields = %Pairs(fields), "{message}");
    }
}

struct Pairs<'a>(&'a [Field]);

impl fmt::Display for Pairs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", field.key, field.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_render_in_order() {
        let fields = [
            Field::int("status", 200),
            Field::str("path", "/ping"),
            Field::duration("latency", Duration::from_millis(3)),
        ];
        assert_eq!(Pairs(&fields).to_string(), r#"status=200 path="/ping" latency=3ms"#);
        assert_eq!(Pairs(&[]).to_string(), "");
    }

    #[test]
    fn time_renders_rfc3339() {
        let t = DateTime::parse_from_rfc3339("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(Field::time("time", t).value.to_string(), "2024-05-01T12:00:00+02:00");
    }
}
