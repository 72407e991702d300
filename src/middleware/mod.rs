//! Middleware layer.
//!
//! Middleware wrap the rest of the handling chain. Each one receives the
//! request [`Context`] and a [`Next`] handle; calling `next.run(ctx).await`
//! runs every inner middleware and finally the route handler. Work done
//! before that call sees the request as it arrived, work done after it sees
//! the outcome.
//!
//! ```text
//! Router::wrap(AccessLog)  ─┐ outermost
//! Router::wrap(Recovery)   ─┤
//! route handler            ─┘ innermost
//! ```
//!
//! Built-in middleware:
//! - [`AccessLog`] — one structured record per request (status, method,
//!   path, latency, …) or one error record per accumulated request error
//! - [`Recovery`] — catches panics raised downstream, logs them and answers
//!   `500` instead of tearing down the connection task
//!
//! Both are configured through the same [`Options`].

mod access_log;
mod options;
mod recovery;

use std::sync::Arc;

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler};

pub use access_log::AccessLog;
pub use options::{DEFAULT_TIME_FORMAT, FieldFn, Options, SkipFn};
pub use recovery::{RECOVERED_MESSAGE, Recovery};

/// A request interceptor.
///
/// Implementations are shared by every concurrent request, hence `Send + Sync`.
///
/// ```rust
/// use logguard::middleware::{Middleware, Next};
/// use logguard::{BoxFuture, Context};
///
/// struct Deny;
///
/// impl Middleware for Deny {
///     fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
///         Box::pin(async move {
///             if ctx.request().header("x-api-key").is_none() {
///                 ctx.abort_with_status(http::StatusCode::UNAUTHORIZED);
///                 return;
///             }
///             next.run(ctx).await;
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()>;
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

/// The remainder of the chain after the current middleware.
pub struct Next<'a> {
    middleware: &'a [BoxedMiddleware],
    endpoint: &'a BoxedHandler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a [BoxedMiddleware], endpoint: &'a BoxedHandler) -> Self {
        Self { middleware, endpoint }
    }

    /// Runs the rest of the chain to completion.
    ///
    /// Does nothing once the context has been aborted.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        Box::pin(async move {
            if ctx.is_aborted() {
                return;
            }
            match self.middleware.split_first() {
                Some((current, rest)) => {
                    current.handle(ctx, Next::new(rest, self.endpoint)).await;
                }
                None => {
                    let response = self.endpoint.call(ctx.request().clone()).await;
                    ctx.set_response(response);
                }
            }
        })
    }
}
