//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Uri, Version};
use http::header::IntoHeaderName;

use crate::error::Error;

/// An incoming HTTP request with its body fully read.
///
/// Hooks receive it mutably: a `RequestReceived` hook may rewrite the path
/// before routing happens.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Default for Request {
    fn default() -> Self {
        Self::new(Method::GET, Uri::from_static("/"))
    }
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr,
        }
    }

    /// Builder-style header insertion, mostly for tests.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn version(&self) -> Version { self.version }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of the query parameter `key`, percent-decoded.
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    pub fn has_query(&self, key: &str) -> bool {
        self.query(key).is_some()
    }

    /// Replaces the path, keeping the query string.
    pub fn set_path(&mut self, path: &str) -> Result<(), Error> {
        let path_and_query = match self.uri.query() {
            Some(q) => format!("{path}?{q}"),
            None => path.to_owned(),
        };
        let mut parts = self.uri.clone().into_parts();
        parts.path_and_query = Some(path_and_query.parse()?);
        self.uri = Uri::from_parts(parts)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_lookup_decodes() {
        let req = Request::new(Method::GET, "/search?q=hello%20world&fast=1".parse().unwrap());
        assert_eq!(req.query("q").as_deref(), Some("hello world"));
        assert!(req.has_query("fast"));
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn set_path_keeps_query() {
        let mut req = Request::new(Method::GET, "/tmp/app.sock/ping?x=1".parse().unwrap());
        req.set_path("/ping").unwrap();
        assert_eq!(req.path(), "/ping");
        assert_eq!(req.uri().query(), Some("x=1"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::default().with_header("x-request-id", "abc");
        assert_eq!(req.header("X-Request-Id"), Some("abc"));
    }
}
