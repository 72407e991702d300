//! Panic recovery.
//!
//! # Why a panic is caught here and not in the server
//!
//! A panic inside a handler unwinds through the connection task. tokio
//! contains it, but the client sees the connection drop with no response,
//! and nothing useful reaches the logs. [`Recovery`] wraps the rest of the
//! chain in [`catch_unwind`](futures_util::FutureExt::catch_unwind) and turns
//! the panic into a logged record plus a `500`.
//!
//! # Broken connections
//!
//! A panic whose payload is an I/O error saying the peer went away (broken
//! pipe, connection reset) is not a bug in the handler. It is logged without
//! a stack trace, attached to the request as an error and the chain is
//! aborted. No status is set: there is nobody left to send it to.
//!
//! # Stack traces
//!
//! By the time `catch_unwind` returns, the stack has been unwound. With
//! [`Options::stack`](super::Options::stack) enabled, a panic hook records a
//! [`Backtrace`] on the panicking thread. The future is polled on that same
//! thread, so the recovery code picks it up before yielding.
//!
//! The hook is process-wide once installed, but it only captures while a
//! [`Recovery`] is polling its downstream chain on the current thread. Panics
//! elsewhere pass straight to the previous hook. Frames belonging to the hook
//! and to the std panic machinery are cut, so the trace starts at the code
//! that panicked.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use chrono::{DateTime, FixedOffset, Local};
use futures_util::FutureExt;
use futures_util::future::poll_fn;
use http::StatusCode;

use super::options::Options;
use super::{Middleware, Next};
use crate::context::Context;
use crate::error::RequestError;
use crate::handler::BoxFuture;
use crate::logger::Field;

/// Message of every record for a recovered panic.
pub const RECOVERED_MESSAGE: &str = "recovered from panic";

/// Catches panics raised anywhere downstream.
///
/// Outcome per request:
///
/// | Downstream | Record | Context |
/// |---|---|---|
/// | returns normally | none | untouched |
/// | broken connection | error, message = path, `error` + `request` | error attached, aborted, status untouched |
/// | any other panic | error, [`RECOVERED_MESSAGE`], `time` + `error` + `request` + custom fields (+ `stack`) | aborted with `500`, empty body |
///
/// The `time` field is the local wall clock; the UTC flag only affects the
/// access log. The panic is never resumed.
pub struct Recovery {
    options: Options,
}

impl Recovery {
    pub fn new(options: Options) -> Self {
        if options.stack {
            install_backtrace_hook();
        }
        Self { options }
    }

    fn recover(&self, ctx: &mut Context, payload: Box<dyn Any + Send>) {
        let backtrace = self.options.stack.then(take_backtrace);
        let value = describe(payload.as_ref());
        let request = ctx.request().dump();

        if is_broken_connection(payload.as_ref()) {
            self.options.logger.error(
                ctx.request().path(),
                &[Field::any("error", &value), Field::str("request", request)],
            );
            ctx.error(into_request_error(payload, value));
            ctx.abort();
            return;
        }

        let now: DateTime<FixedOffset> = Local::now().into();

        let mut fields = Vec::with_capacity(4 + self.options.custom_fields.len());
        fields.extend([
            Field::time("time", now),
            Field::any("error", &value),
            Field::str("request", request),
        ]);
        fields.extend(self.options.custom_values(ctx));
        if let Some(backtrace) = backtrace {
            fields.push(Field::str("stack", backtrace));
        }

        self.options.logger.error(RECOVERED_MESSAGE, &fields);
        ctx.abort_with_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
}

impl Middleware for Recovery {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut downstream = next.run(ctx);
            let armed = poll_fn(move |cx| {
                let _armed = Armed::enter();
                downstream.as_mut().poll(cx)
            });
            let outcome = AssertUnwindSafe(armed).catch_unwind().await;
            if let Err(payload) = outcome {
                self.recover(ctx, payload);
            }
        })
    }
}

// ── Classification ────────────────────────────────────────────────────────────

/// True when the payload is, or wraps, an I/O error reporting that the peer
/// closed or reset the connection.
fn is_broken_connection(payload: &(dyn Any + Send)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> =
        if let Some(err) = payload.downcast_ref::<io::Error>() {
            Some(err as &(dyn std::error::Error + 'static))
        } else if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
            Some(&**err as &(dyn std::error::Error + 'static))
        } else {
            None
        };

    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if is_peer_gone(io_err) {
                return true;
            }
        }
        current = err.source();
    }
    false
}

fn is_peer_gone(err: &io::Error) -> bool {
    if matches!(err.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("broken pipe") || message.contains("connection reset by peer")
}

/// Human-readable panic value.
fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(err) = payload.downcast_ref::<io::Error>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        err.to_string()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

/// Keeps the original error type when the payload was one.
fn into_request_error(payload: Box<dyn Any + Send>, value: String) -> RequestError {
    match payload.downcast::<io::Error>() {
        Ok(err) => RequestError::from(*err),
        Err(payload) => match payload.downcast::<Box<dyn std::error::Error + Send + Sync>>() {
            Ok(err) => RequestError::msg(err),
            Err(_) => RequestError::msg(value),
        },
    }
}

// ── Backtrace capture ─────────────────────────────────────────────────────────

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
    static ARMED: Cell<usize> = const { Cell::new(0) };
}

static HOOK: Once = Once::new();

/// Symbols of the frames between the hook and the panicking code.
const PANIC_MACHINERY: &[&str] = &[
    "std::panicking::",
    "core::panicking::",
    "std::panic::panic_any",
    "rust_begin_unwind",
    "__rust_end_short_backtrace",
];

/// Marks the current thread as polling a recovery boundary for as long as
/// the guard lives. Nests, and unwinds cleanly.
struct Armed;

impl Armed {
    fn enter() -> Self {
        ARMED.with(|depth| depth.set(depth.get() + 1));
        Armed
    }
}

impl Drop for Armed {
    fn drop(&mut self) {
        ARMED.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Chains a hook in front of the current one that records where the panic
/// happened. The previous hook still runs.
fn install_backtrace_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if ARMED.with(Cell::get) > 0 {
                let trace = fault_site(&Backtrace::force_capture().to_string());
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}

/// The trace recorded for the last panic on this thread. Falls back to the
/// current stack if a hook installed later replaced ours.
fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}

/// Drops the frames above the first frame of the panicking code: the hook,
/// the capture itself and the std panic machinery. A trace without
/// symbols is returned unchanged.
fn fault_site(rendered: &str) -> String {
    let lines: Vec<&str> = rendered.lines().collect();
    let frames: Vec<usize> = (0..lines.len()).filter(|&i| is_frame_header(lines[i])).collect();
    let is_machinery = |i: usize| PANIC_MACHINERY.iter().any(|m| lines[i].contains(m));

    let Some(first) = frames.iter().position(|&i| is_machinery(i)) else {
        return rendered.to_owned();
    };
    match frames[first..].iter().find(|&&i| !is_machinery(i)) {
        Some(&start) => lines[start..].join("\n"),
        None => rendered.to_owned(),
    }
}

/// `  12: symbol`, as rendered by `Backtrace`'s `Display`.
fn is_frame_header(line: &str) -> bool {
    line.trim_start()
        .split_once(": ")
        .is_some_and(|(index, _)| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload<T: Any + Send>(value: T) -> Box<dyn Any + Send> {
        Box::new(value)
    }

    #[derive(Debug)]
    struct WriteFailed(io::Error);

    impl std::fmt::Display for WriteFailed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("write failed")
        }
    }

    impl std::error::Error for WriteFailed {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn broken_pipe_and_reset_are_broken_connections() {
        assert!(is_broken_connection(payload(io::Error::from(io::ErrorKind::BrokenPipe)).as_ref()));
        assert!(is_broken_connection(payload(io::Error::from(io::ErrorKind::ConnectionReset)).as_ref()));
        assert!(is_broken_connection(
            payload(io::Error::other("write tcp 10.0.0.1:80: Connection Reset By Peer")).as_ref()
        ));
        assert!(is_broken_connection(payload(io::Error::other("BROKEN PIPE")).as_ref()));
    }

    #[test]
    fn nested_io_error_is_found_through_source_chain() {
        let wrapped: Box<dyn std::error::Error + Send + Sync> =
            Box::new(WriteFailed(io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_broken_connection(payload(wrapped).as_ref()));
    }

    #[test]
    fn other_panics_are_generic() {
        assert!(!is_broken_connection(payload("broken pipe").as_ref()));
        assert!(!is_broken_connection(payload(String::from("boom")).as_ref()));
        assert!(!is_broken_connection(payload(io::Error::from(io::ErrorKind::NotFound)).as_ref()));
        assert!(!is_broken_connection(payload(42_u8).as_ref()));
    }

    #[test]
    fn describe_common_payloads() {
        assert_eq!(describe(payload("boom").as_ref()), "boom");
        assert_eq!(describe(payload(String::from("boom")).as_ref()), "boom");
        assert_eq!(describe(payload(io::Error::other("eof")).as_ref()), "eof");
        assert_eq!(describe(payload(7_i32).as_ref()), "Box<dyn Any>");
    }

    const RENDERED: &str = "   0: std::backtrace::Backtrace::force_capture
             at /rustc/library/std/src/backtrace.rs:312:9
   1: logguard::middleware::recovery::install_backtrace_hook::{{closure}}::{{closure}}
   2: std::thread::local::LocalKey<T>::with
   3: std::panicking::rust_panic_with_hook
   4: std::panicking::begin_panic_handler::{{closure}}
   5: std::sys::backtrace::__rust_end_short_backtrace
   6: rust_begin_unwind
   7: core::panicking::panic_fmt
   8: orders::checkout::{{closure}}
             at ./src/checkout.rs:42:5
   9: std::panicking::try::do_call
  10: main";

    #[test]
    fn fault_site_starts_at_the_panicking_frame() {
        let trimmed = fault_site(RENDERED);
        assert!(trimmed.starts_with("   8: orders::checkout::{{closure}}\n             at ./src/checkout.rs:42:5"));
        assert!(!trimmed.contains("install_backtrace_hook"));
        assert!(trimmed.ends_with("  10: main"));
    }

    #[test]
    fn unsymbolized_trace_is_kept_whole() {
        let raw = "   0: <unknown>\n   1: <unknown>";
        assert_eq!(fault_site(raw), raw);
        assert_eq!(fault_site("disabled backtrace"), "disabled backtrace");
    }

    #[test]
    fn hook_ignores_panics_outside_a_recovery_boundary() {
        install_backtrace_hook();
        LAST_BACKTRACE.with(|slot| slot.borrow_mut().take());

        let _ = panic::catch_unwind(|| panic!("not ours"));
        assert!(LAST_BACKTRACE.with(|slot| slot.borrow().is_none()));

        let _ = panic::catch_unwind(|| {
            let _armed = Armed::enter();
            panic!("ours");
        });
        assert!(LAST_BACKTRACE.with(|slot| slot.borrow_mut().take()).is_some());
        assert_eq!(ARMED.with(Cell::get), 0);
    }

    #[test]
    fn broken_connection_error_keeps_io_type() {
        let err = into_request_error(payload(io::Error::from(io::ErrorKind::BrokenPipe)), String::new());
        assert_eq!(err.inner().downcast_ref::<io::Error>().map(io::Error::kind), Some(io::ErrorKind::BrokenPipe));
    }
}
