//! Structured logging.
//!
//! Every line goes through `tracing`. [`init`] installs a subscriber for
//! binaries; libraries embedding hookd can install their own instead.
//! Each request gets a [`RequestLogger`]: a span carrying the request id,
//! created when the request arrives and dropped when it completes.

use std::fmt;

use http::Uri;
use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggerConfig;

/// Replacement for filtered query values.
pub const FILTERED: &str = "[FILTERED]";

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Returns `false` if a subscriber was already installed.
pub fn init(config: &LoggerConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Per-request child logger.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    request_id: String,
    span: Span,
}

impl RequestLogger {
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let span = tracing::info_span!("request", request_id = %request_id);
        Self { request_id, span }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn debug(&self, msg: impl fmt::Display) {
        tracing::debug!(parent: &self.span, request_id = %self.request_id, "{msg}");
    }

    pub fn info(&self, msg: impl fmt::Display) {
        tracing::info!(parent: &self.span, request_id = %self.request_id, "{msg}");
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        tracing::warn!(parent: &self.span, request_id = %self.request_id, "{msg}");
    }

    pub fn error(&self, msg: impl fmt::Display) {
        tracing::error!(parent: &self.span, request_id = %self.request_id, "{msg}");
    }
}

/// Renders `uri` as `path?query` with the values of `params` replaced by
/// [`FILTERED`]. Parameter names match case-insensitively.
pub fn filter_url(uri: &Uri, params: &[String]) -> String {
    let path = uri.path();
    let Some(query) = uri.query() else {
        return path.to_owned();
    };
    if params.is_empty() {
        return format!("{path}?{query}");
    }

    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if params.iter().any(|p| p.eq_ignore_ascii_case(&key)) {
            out.append_pair(&key, FILTERED);
        } else {
            out.append_pair(&key, &value);
        }
    }
    format!("{path}?{}", out.finish())
}
