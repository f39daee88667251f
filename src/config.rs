//! Typed configuration sections.
//!
//! The server never parses files itself; it reads a [`SectionConfig`]
//! through the [`Configer`] trait. [`AppConfig`] is the stock TOML-backed
//! implementation:
//!
//! ```toml
//! name = "billing"
//! mode = "production"
//!
//! [sections.production.server]
//! addr = "0.0.0.0"
//! port = 8080
//! throttle = 500
//!
//! [sections.production.logger]
//! level = "info"
//! filter_params = ["password", "token"]
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default header carrying the request id.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Narrow read-only view the server takes its settings from.
pub trait Configer: Send + Sync {
    /// Application name, used in log lines.
    fn name(&self) -> &str;

    /// The section for the active run mode.
    fn section(&self) -> &SectionConfig;
}

/// TOML-backed configuration with one section per run mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub mode: String,
    pub sections: HashMap<String, SectionConfig>,

    #[serde(skip)]
    fallback: SectionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "hookd".to_owned(),
            mode: "development".to_owned(),
            sections: HashMap::new(),
            fallback: SectionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Builds a config whose active section is `section`.
    pub fn with_section(name: impl Into<String>, section: SectionConfig) -> Self {
        let mut config = Self { name: name.into(), ..Self::default() };
        config.sections.insert(config.mode.clone(), section);
        config
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks serde can't express. Reports every problem at once.
    pub fn validate(&self) -> Result<(), Error> {
        let mut problems = Vec::new();
        for (mode, section) in &self.sections {
            section.server.collect_problems(mode, &mut problems);
            if section.logger.level.parse::<tracing_subscriber::EnvFilter>().is_err() {
                problems.push(format!("[{mode}] logger.level `{}` is not a filter directive", section.logger.level));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join(", ")))
        }
    }

    /// Mutable access to the active section, creating it if needed.
    pub fn section_mut(&mut self) -> &mut SectionConfig {
        self.sections.entry(self.mode.clone()).or_default()
    }
}

impl Configer for AppConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn section(&self) -> &SectionConfig {
        self.sections.get(&self.mode).unwrap_or(&self.fallback)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SectionConfig {
    pub server: ServerConfig,
    pub logger: LoggerConfig,
}

/// Listener, transport and admission-control settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `"tcp"` or `"unix"`.
    pub network: String,
    /// Host for tcp, socket path for unix.
    pub addr: String,
    pub port: u16,
    /// Header read timeout in seconds.
    pub rtimeout: u64,
    /// Deadline in seconds for a response to be ready; 0 disables it.
    pub wtimeout: u64,
    pub max_header_bytes: usize,
    /// Header the request id is read from and echoed on.
    pub request_id: String,
    /// Requests per second admitted by the throttle hook; 0 disables it.
    pub throttle: u32,
    /// Tokens in the demotion bucket; 0 disables it.
    pub demotion: u32,
    /// Demotion wait and refill window in seconds.
    pub demotion_window: u64,
    /// Query parameter that lets a request skip demotion; empty for none.
    pub demotion_bypass: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_owned(),
            addr: "127.0.0.1".to_owned(),
            port: 9090,
            rtimeout: 5,
            wtimeout: 10,
            max_header_bytes: 64 * 1024,
            request_id: DEFAULT_REQUEST_ID_HEADER.to_owned(),
            throttle: 0,
            demotion: 0,
            demotion_window: 1,
            demotion_bypass: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn is_unix(&self) -> bool {
        self.network == "unix"
    }

    /// `host:port` for tcp listeners.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.rtimeout)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.wtimeout > 0).then(|| Duration::from_secs(self.wtimeout))
    }

    pub fn demotion_window(&self) -> Duration {
        Duration::from_secs(self.demotion_window.max(1))
    }

    pub fn demotion_bypass(&self) -> Option<String> {
        (!self.demotion_bypass.is_empty()).then(|| self.demotion_bypass.clone())
    }

    fn collect_problems(&self, mode: &str, problems: &mut Vec<String>) {
        if self.network != "tcp" && self.network != "unix" {
            problems.push(format!("[{mode}] server.network must be tcp or unix, got `{}`", self.network));
        }
        if self.addr.is_empty() {
            problems.push(format!("[{mode}] server.addr is empty"));
        }
        if http::HeaderName::from_bytes(self.request_id.as_bytes()).is_err() {
            problems.push(format!("[{mode}] server.request_id `{}` is not a header name", self.request_id));
        }
        if self.demotion > 0 && self.demotion_window == 0 {
            problems.push(format!("[{mode}] server.demotion_window must be positive"));
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// `EnvFilter` directive, e.g. `info` or `hookd=debug`.
    pub level: String,
    /// Query parameters whose values never reach the request log.
    pub filter_params: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            filter_params: vec!["password".to_owned()],
        }
    }
}
