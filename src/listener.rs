//! TCP and Unix-domain listeners.
//!
//! Dropping a [`Listener`] closes the socket, so connection attempts made
//! after shutdown are refused by the OS. A Unix listener also removes its
//! socket file.

use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;

use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::hooks::{Hook, NamedHook};
use crate::request::Request;
use crate::response::Response;

/// Name of the path-rewriting hook installed for Unix sockets.
pub const UNIX_REWRITE_HOOK: &str = "unix-rewrite";

pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

/// An accepted connection.
pub enum Accepted {
    Tcp(TcpStream, SocketAddr),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Listener {
    pub async fn bind(config: &ServerConfig) -> Result<Self, Error> {
        if config.is_unix() {
            return Self::bind_unix(&config.addr);
        }
        let addr = config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Self::Tcp(listener))
    }

    #[cfg(unix)]
    fn bind_unix(path: &str) -> Result<Self, Error> {
        use std::os::unix::fs::FileTypeExt;

        let path = PathBuf::from(path);
        // a socket left behind by a previous run would make bind fail
        if let Ok(meta) = std::fs::symlink_metadata(&path) {
            if meta.file_type().is_socket() {
                std::fs::remove_file(&path)?;
            }
        }
        let listener = UnixListener::bind(&path).map_err(|source| Error::Bind {
            addr: path.display().to_string(),
            source,
        })?;
        Ok(Self::Unix { listener, path })
    }

    #[cfg(not(unix))]
    fn bind_unix(path: &str) -> Result<Self, Error> {
        Err(Error::Bind {
            addr: path.to_owned(),
            source: io::Error::new(io::ErrorKind::Unsupported, "unix sockets are not available"),
        })
    }

    pub async fn accept(&self) -> io::Result<Accepted> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok(Accepted::Tcp(stream, peer))
            }
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(Accepted::Unix(stream))
            }
        }
    }

    /// Human-readable bound address, for logs.
    pub fn local_addr(&self) -> String {
        match self {
            Self::Tcp(listener) => listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|e| format!("<unknown: {e}>")),
            #[cfg(unix)]
            Self::Unix { path, .. } => format!("unix:{}", path.display()),
        }
    }

    /// The bound TCP address; `None` for Unix sockets.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix { .. } => None,
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "removing socket file: {e}");
                }
            }
        }
    }
}

/// A `RequestReceived` hook that strips the socket path from request paths,
/// so `GET /tmp/app.sock/ping` routes as `GET /ping`.
pub fn unix_rewrite_hook(socket_path: impl Into<String>) -> NamedHook {
    let prefix = socket_path.into().trim_end_matches('/').to_owned();
    NamedHook::new(UNIX_REWRITE_HOOK, UnixRewrite { prefix })
}

struct UnixRewrite {
    prefix: String,
}

impl Hook for UnixRewrite {
    fn apply<'a>(&'a self, resp: &'a mut Response, req: &'a mut Request) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(rest) = req.path().strip_prefix(self.prefix.as_str()) else {
                return true;
            };
            if !rest.is_empty() && !rest.starts_with('/') {
                return true;
            }
            let rewritten = if rest.is_empty() { "/".to_owned() } else { rest.to_owned() };
            if let Err(e) = req.set_path(&rewritten) {
                tracing::warn!(path = req.path(), "unix path rewrite failed: {e}");
                resp.write_header(http::StatusCode::BAD_REQUEST);
                resp.flush_header();
                return false;
            }
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, Uri};

    use super::*;

    async fn rewrite(hook: &NamedHook, uri: &'static str) -> String {
        let mut req = Request::new(Method::GET, Uri::from_static(uri));
        assert!(hook.apply.apply(&mut Response::new(), &mut req).await);
        req.uri().to_string()
    }

    #[tokio::test]
    async fn strips_socket_path_prefix() {
        let hook = unix_rewrite_hook("/tmp/app.sock");
        assert_eq!(rewrite(&hook, "/tmp/app.sock/ping?x=1").await, "/ping?x=1");
        assert_eq!(rewrite(&hook, "/tmp/app.sock").await, "/");
        assert_eq!(rewrite(&hook, "/tmp/app.socket/ping").await, "/tmp/app.socket/ping");
        assert_eq!(rewrite(&hook, "/ping").await, "/ping");
    }

    #[tokio::test]
    async fn tcp_bind_reports_address() {
        let config = ServerConfig { port: 0, ..ServerConfig::default() };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.tcp_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(listener.local_addr(), addr.to_string());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_replaces_stale_socket_and_cleans_up() {
        let path = std::env::temp_dir().join(format!("hookd-{}.sock", uuid::Uuid::new_v4()));
        let config = ServerConfig {
            network: "unix".to_owned(),
            addr: path.display().to_string(),
            ..ServerConfig::default()
        };

        let first = Listener::bind(&config).await.unwrap();
        // leak the first socket file by forgetting its cleanup
        std::mem::forget(first);
        assert!(path.exists());

        let second = Listener::bind(&config).await.unwrap();
        assert!(path.exists());
        drop(second);
        assert!(!path.exists());
    }
}
