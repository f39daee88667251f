//! Shared fixtures for the network tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hookd::{AppConfig, AppServer, BoxFuture, Context, Error, StatusCode};
use tokio::task::JoinHandle;

/// A running server on an ephemeral port.
pub struct TestServer {
    pub app: Arc<AppServer>,
    pub addr: SocketAddr,
    pub task: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Triggers shutdown and waits for the accept loop to drain.
    pub async fn stop(self) {
        self.app.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Default config listening on an ephemeral loopback port.
pub fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.name = "hookd-test".to_owned();
    config.section_mut().server.port = 0;
    config
}

/// Binds and serves `app` in the background.
pub async fn start(app: AppServer) -> TestServer {
    let app = Arc::new(app);
    let listener = app.bind().await.unwrap();
    let addr = listener.tcp_addr().expect("tcp listener");
    let task = tokio::spawn(Arc::clone(&app).serve(listener));
    TestServer { app, addr, task }
}

/// A client that never reuses connections, so each request dials anew.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

pub fn ping(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        ctx.set_status(StatusCode::NO_CONTENT);
        ctx.finish();
    })
}

pub fn slow(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        ctx.text("slow done");
    })
}

pub fn sleepy(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.text("awake");
    })
}

pub fn echo(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let body = ctx.request().body().to_vec();
        ctx.set_status(StatusCode::CREATED);
        ctx.response_mut().write(&body);
    })
}

pub fn explode(_ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move { panic!("handler exploded") })
}
