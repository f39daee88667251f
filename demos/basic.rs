//! Minimal hookd example: a users resource, admission control and hooks.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic [config.toml]
//!
//! Try:
//!   curl -i http://localhost:9090/ping
//!   curl http://localhost:9090/api/users/42
//!   curl -X POST http://localhost:9090/api/users -d '{"name":"alice"}'
//!   curl 'http://localhost:9090/api/users?password=secret'   # filtered in the log
//!   curl http://localhost:9090/-/healthz

use std::path::Path;
use std::sync::Arc;

use hookd::{
    boxed, middleware, Action, AppConfig, AppServer, BoxFuture, Configer, Context, Controller,
    NamedHook, Request, Response, StatusCode,
};

#[tokio::main]
async fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => match AppConfig::load(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(2);
            }
        },
        None => {
            let mut config = AppConfig::default();
            config.name = "basic".to_owned();
            config.section_mut().server.throttle = 100;
            config
        }
    };
    hookd::logging::init(&config.section().logger);

    let mut app = AppServer::new(&config);
    app.use_middleware(middleware::recovery);
    app.hooks_mut()
        .response_ready
        .push_back(NamedHook::new("powered-by", powered_by));

    app.get("/ping", ping);
    let api = app.group("/api", [boxed(middleware::request_id)]);
    api.resource("users", &Users);

    Arc::new(app).dispatch().await;
}

// GET /ping → 204 No Content
fn ping(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        ctx.set_status(StatusCode::NO_CONTENT);
        ctx.finish();
    })
}

fn powered_by<'a>(resp: &'a mut Response, _req: &'a mut Request) -> BoxFuture<'a, bool> {
    Box::pin(async move {
        resp.headers_mut().insert("x-powered-by", http::HeaderValue::from_static("hookd"));
        true
    })
}

struct Users;

impl Controller for Users {
    fn id(&self) -> Option<String> {
        Some("id".to_owned())
    }

    fn index(&self) -> Option<Action> {
        Some(boxed(list_users))
    }

    fn create(&self) -> Option<Action> {
        Some(boxed(create_user))
    }

    fn show(&self) -> Option<Action> {
        Some(boxed(show_user))
    }
}

// GET /api/users
fn list_users(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if let Err(e) = ctx.json(&serde_json::json!([{ "id": "42", "name": "alice" }])) {
            ctx.logger().error(e);
        }
    })
}

// POST /api/users
fn create_user(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        if ctx.request().body().is_empty() {
            ctx.abort_with_status(StatusCode::BAD_REQUEST);
            return;
        }
        ctx.set_header(http::header::LOCATION, http::HeaderValue::from_static("/api/users/99"));
        ctx.set_status(StatusCode::CREATED);
        ctx.text(r#"{"id":"99"}"#);
    })
}

// GET /api/users/{id}
fn show_user(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let id = ctx.param("id").unwrap_or("unknown").to_owned();
        let request_id = ctx
            .get_final::<String>(middleware::REQUEST_ID_KEY)
            .cloned()
            .unwrap_or_default();
        if let Err(e) = ctx.json(&serde_json::json!({ "id": id, "request_id": request_id })) {
            ctx.logger().error(e);
        }
    })
}
