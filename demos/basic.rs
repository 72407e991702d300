//! Access log + panic recovery on a tiny service.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:8080/ping     # one info record
//!   curl http://localhost:8080/panic    # 500, one recovery record with stack, one access record
//!   curl http://localhost:8080/skip1    # nothing logged (skip path)
//!   curl http://localhost:8080/skip2    # nothing logged (skip predicate)

use logguard::middleware::{AccessLog, Options, Recovery};
use logguard::{Field, Request, Router, Server, TracingLogger};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let shared = Options::new(TracingLogger)
        .custom_field(|ctx| Field::str("custom field1", ctx.request().client_ip()))
        .custom_field(|ctx| Field::any("custom field2", ctx.request().client_ip()));

    let access = shared
        .clone()
        .utc(true)
        .time_format("%Y-%m-%dT%H:%M:%S%:z")
        .skip_paths(["/skip1"])
        .skip(|ctx| ctx.request().path() == "/skip2");

    let app = Router::new()
        .wrap(AccessLog::new(access))
        .wrap(Recovery::new(shared.stack(true)))
        .get("/ping", ping)
        .get("/panic", explode)
        .get("/skip1", |_req: Request| async { "skip1!" })
        .get("/skip2", |_req: Request| async { "skip2!" });

    if let Err(e) = Server::bind("0.0.0.0:8080").serve(app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}

async fn ping(_req: Request) -> String {
    format!("pong {}", chrono::Utc::now().timestamp())
}

async fn explode(_req: Request) -> &'static str {
    panic!("An unexpected error happen!");
}
