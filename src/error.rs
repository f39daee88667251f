//! Unified error type.

use thiserror::Error;

/// The error type returned by hookd's fallible operations.
///
/// Application-level failures (404, 418, 429, ...) are HTTP responses, not
/// `Error`s. This type covers infrastructure: configuration, binding,
/// reading request bodies, and context misuse.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("config parse: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// [`Context::set_final`](crate::Context::set_final) refused to
    /// overwrite an existing key.
    #[error("settings key `{0}` is frozen")]
    SettingsKey(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("invalid uri: {0}")]
    InvalidUriParts(#[from] http::uri::InvalidUriParts),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("reading request body: {0}")]
    Body(#[from] hyper::Error),

    #[error("response not ready before write deadline")]
    WriteTimeout,
}
