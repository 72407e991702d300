//! Structured access logging.

use std::fmt::Write as _;
use std::time::Instant;

use chrono::{DateTime, Local, TimeZone, Utc};

use super::options::{DEFAULT_TIME_FORMAT, Options};
use super::{Middleware, Next};
use crate::context::Context;
use crate::handler::BoxFuture;
use crate::logger::Field;

/// Emits one record per request once the rest of the chain has finished.
///
/// - Requests whose path is in `skip_paths`, or for which the skip predicate
///   holds, produce nothing.
/// - Requests that accumulated errors produce one error record per error,
///   the error message being the whole record.
/// - Everything else produces one info record, message = path, with fields
///   `status`, `method`, `path`, `query`, `ip`, `user-agent`, `latency`,
///   `time`, followed by the custom fields in registration order.
///
/// Path and query are captured before delegating, so inner middleware that
/// rewrite the URI do not change what is logged or skipped.
pub struct AccessLog {
    options: Options,
}

impl AccessLog {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    fn format_time<Tz>(&self, time: DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let mut out = String::new();
        if write!(out, "{}", time.format(&self.options.time_format)).is_err() {
            out.clear();
            let _ = write!(out, "{}", time.format(DEFAULT_TIME_FORMAT));
        }
        out
    }

    fn emit(&self, ctx: &Context, path: String, query: String, start: Instant) {
        let latency = start.elapsed();
        let end = Local::now();
        let time = if self.options.utc {
            self.format_time(end.with_timezone(&Utc))
        } else {
            self.format_time(end)
        };

        let logger = &self.options.logger;
        if !ctx.errors().is_empty() {
            for err in ctx.errors() {
                logger.error(&err.to_string(), &[]);
            }
            return;
        }

        let req = ctx.request();
        let mut fields = Vec::with_capacity(8 + self.options.custom_fields.len());
        fields.extend([
            Field::int("status", i64::from(ctx.status().as_u16())),
            Field::str("method", req.method().as_str()),
            Field::str("path", path.as_str()),
            Field::str("query", query),
            Field::str("ip", req.client_ip()),
            Field::str("user-agent", req.user_agent()),
            Field::duration("latency", latency),
            Field::str("time", time),
        ]);
        fields.extend(self.options.custom_values(ctx));

        logger.info(&path, &fields);
    }
}

impl Middleware for AccessLog {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let start = Instant::now();
            let path = ctx.request().path().to_owned();
            let query = ctx.request().query().to_owned();

            next.run(ctx).await;

            if (self.options.skip)(ctx) || self.options.skip_paths.contains(&path) {
                return;
            }
            self.emit(ctx, path, query, start);
        })
    }
}
