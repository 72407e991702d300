//! # logguard
//!
//! Access logging and panic recovery for a minimal HTTP framework.
//!
//! Two middleware, one configuration:
//!
//! - [`AccessLog`](middleware::AccessLog) — one structured record per
//!   request: status, method, path, query, client IP, user agent, latency,
//!   completion time and any custom fields. Requests that accumulated errors
//!   log those errors instead. Selected paths can be skipped.
//! - [`Recovery`](middleware::Recovery) — a last-resort barrier. A panic
//!   anywhere downstream is caught, logged with a dump of the request (and
//!   optionally a stack trace) and answered with `500`. Panics caused by the
//!   client hanging up are recognised and logged without the noise.
//!
//! Records go to any [`Logger`]; [`TracingLogger`] forwards them to `tracing`.
//!
//! The host around them is deliberately small: a radix-tree [`Router`], a
//! hyper-based [`Server`] with graceful shutdown, and the per-request
//! [`Context`] that middleware share.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use logguard::middleware::{AccessLog, Options, Recovery};
//! use logguard::{Field, Request, Router, Server, TracingLogger};
//!
//! #[tokio::main]
//! async fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     let options = Options::new(TracingLogger)
//!         .utc(true)
//!         .custom_field(|ctx| Field::str("ip", ctx.request().client_ip()));
//!
//!     let app = Router::new()
//!         .wrap(AccessLog::new(options.clone().skip_paths(["/healthz"])))
//!         .wrap(Recovery::new(options.stack(true)))
//!         .get("/ping", ping)
//!         .get("/healthz", ping);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn ping(_req: Request) -> &'static str {
//!     "pong"
//! }
//! ```

mod context;
mod error;
mod handler;
mod logger;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use context::Context;
pub use error::{Error, RequestError};
pub use handler::{BoxFuture, Handler};
pub use logger::{Field, Logger, TracingLogger, Value};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
