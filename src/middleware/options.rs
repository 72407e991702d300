//! Shared configuration for [`AccessLog`](super::AccessLog) and
//! [`Recovery`](super::Recovery).
//!
//! `Options` is a plain record filled by a fluent builder. Setters run in the
//! order they are called:
//!
//! - scalar settings (`time_format`, `utc`, `stack`, `skip`) overwrite,
//! - `skip_paths` replaces the whole set,
//! - `custom_field` / `custom_fields` append.
//!
//! The logger has no default. It is the constructor argument, so an
//! `Options` without one cannot be built:
//!
//! ```compile_fail
//! let options = logguard::middleware::Options::default();
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use tracing::warn;

use crate::context::Context;
use crate::logger::{Field, Logger};

/// RFC 3339 with nanosecond precision, e.g. `2024-05-01T12:00:00.123456789+02:00`.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f%:z";

/// Contributes one extra field to every record, evaluated per request.
pub type FieldFn = Arc<dyn Fn(&Context) -> Field + Send + Sync>;

/// Returns `true` to suppress the access record for a request.
pub type SkipFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Configuration of one middleware instance. Immutable once handed to
/// [`AccessLog::new`](super::AccessLog::new) or
/// [`Recovery::new`](super::Recovery::new).
///
/// ```rust
/// use logguard::middleware::Options;
/// use logguard::{Field, TracingLogger};
///
/// let options = Options::new(TracingLogger)
///     .utc(true)
///     .time_format("%Y-%m-%dT%H:%M:%S%:z")
///     .skip_paths(["/healthz", "/readyz"])
///     .custom_field(|ctx| Field::str("ip", ctx.request().client_ip()));
/// ```
#[derive(Clone)]
pub struct Options {
    pub(crate) time_format: String,
    pub(crate) utc: bool,
    pub(crate) skip_paths: HashSet<String>,
    pub(crate) skip: SkipFn,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) custom_fields: Vec<FieldFn>,
    pub(crate) stack: bool,
}

impl Options {
    pub fn new(logger: impl Logger) -> Self {
        Self {
            time_format: DEFAULT_TIME_FORMAT.to_owned(),
            utc: false,
            skip_paths: HashSet::new(),
            skip: Arc::new(|_: &Context| false),
            logger: Arc::new(logger),
            custom_fields: Vec::new(),
            stack: false,
        }
    }

    /// strftime pattern for the access record's `time` field.
    ///
    /// An unparsable pattern is reported once here and replaced by
    /// [`DEFAULT_TIME_FORMAT`] when formatting.
    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        let format = format.into();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            warn!(format = %format, "invalid time format, falling back to RFC 3339");
        }
        self.time_format = format;
        self
    }

    /// Convert the access log completion time to UTC before formatting. Local
    /// time otherwise.
    pub fn utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Attach a stack trace to panic records. Only [`Recovery`](super::Recovery)
    /// reads this.
    pub fn stack(mut self, stack: bool) -> Self {
        self.stack = stack;
        self
    }

    /// Exact request paths (query string excluded) that get no access record.
    pub fn skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Dynamic skip rule, evaluated after the handler has run.
    pub fn skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.skip = Arc::new(skip);
        self
    }

    pub fn custom_field<F>(mut self, field: F) -> Self
    where
        F: Fn(&Context) -> Field + Send + Sync + 'static,
    {
        self.custom_fields.push(Arc::new(field));
        self
    }

    pub fn custom_fields(mut self, fields: impl IntoIterator<Item = FieldFn>) -> Self {
        self.custom_fields.extend(fields);
        self
    }

    pub(crate) fn custom_values(&self, ctx: &Context) -> impl Iterator<Item = Field> {
        self.custom_fields.iter().map(move |field| field(ctx))
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("time_format", &self.time_format)
            .field("utc", &self.utc)
            .field("skip_paths", &self.skip_paths)
            .field("custom_fields", &self.custom_fields.len())
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::TracingLogger;
    use crate::request::Request;
    use bytes::Bytes;

    fn ctx() -> Context {
        Context::new(Request::new(http::Request::new(Bytes::new())))
    }

    #[test]
    fn defaults() {
        let options = Options::new(TracingLogger);
        assert_eq!(options.time_format, DEFAULT_TIME_FORMAT);
        assert!(!options.utc);
        assert!(!options.stack);
        assert!(options.skip_paths.is_empty());
        assert!(options.custom_fields.is_empty());
        assert!(!(options.skip)(&ctx()));
    }

    #[test]
    fn later_scalar_settings_win() {
        let options = Options::new(TracingLogger)
            .utc(true)
            .time_format("%H")
            .utc(false)
            .time_format("%M")
            .stack(true);
        assert!(!options.utc);
        assert_eq!(options.time_format, "%M");
        assert!(options.stack);
    }

    #[test]
    fn skip_paths_replace_and_custom_fields_append() {
        let extra: FieldFn = Arc::new(|_: &Context| Field::int("c", 3));
        let options = Options::new(TracingLogger)
            .skip_paths(["/a", "/b"])
            .skip_paths(["/c"])
            .custom_field(|_| Field::int("a", 1))
            .custom_field(|_| Field::int("b", 2))
            .custom_fields([extra]);

        assert_eq!(options.skip_paths, HashSet::from(["/c".to_owned()]));
        let keys: Vec<_> = options.custom_values(&ctx()).map(|f| f.key).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn skip_predicate_is_replaced() {
        let options = Options::new(TracingLogger)
            .skip(|_| false)
            .skip(|ctx| ctx.request().path() == "/");
        assert!((options.skip)(&ctx()));
    }
}
