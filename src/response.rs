//! Outgoing HTTP response with deferred header flushing.
//!
//! Handlers write through a [`Response`]: the status and headers stay
//! mutable until the first body byte (or an explicit
//! [`flush_header`](Response::flush_header)), at which point registered
//! filters run once and the header is committed. Body bytes are buffered
//! and handed to the transport when the middleware chain returns.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

/// Size sentinel: the header has not been flushed yet.
const NOT_WRITTEN: isize = -1;

/// Runs once, right before the header is committed.
pub type ResponseFilter = Box<dyn FnOnce(&mut Response) + Send + Sync>;

/// Common content-type values.
pub enum ContentType {
    Html,        // text/html; charset=utf-8
    Json,        // application/json
    OctetStream, // application/octet-stream
    Text,        // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

/// The writer a request's hooks and handlers share.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    size: isize,
    filters: Vec<ResponseFilter>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("size", &self.size)
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            size: NOT_WRITTEN,
            filters: Vec::new(),
        }
    }

    /// A flushed response carrying a plain-text body.
    pub fn text(status: StatusCode, body: &str) -> Self {
        let mut resp = Self::new();
        resp.set_content_type(ContentType::Text);
        resp.write_header(status);
        resp.write(body.as_bytes());
        resp
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Body bytes written so far, or `-1` if the header is still pending.
    pub fn size(&self) -> isize {
        self.size
    }

    pub fn is_flushed(&self) -> bool {
        self.size != NOT_WRITTEN
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn set_content_type(&mut self, content_type: ContentType) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Registers a filter. Filters run in reverse registration order.
    pub fn before(&mut self, filter: impl FnOnce(&mut Response) + Send + Sync + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// Sets the status. Once the header is flushed the call is ignored with
    /// a warning.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.is_flushed() {
            tracing::warn!(
                current = %self.status,
                attempted = %status,
                "response header already flushed, ignoring status change"
            );
            return;
        }
        self.status = status;
    }

    /// Commits the header. Idempotent.
    pub fn flush_header(&mut self) {
        if self.is_flushed() {
            return;
        }
        let filters = std::mem::take(&mut self.filters);
        for filter in filters.into_iter().rev() {
            filter(self);
        }
        self.size = 0;
    }

    /// Appends body bytes, flushing the header first. Returns `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.flush_header();
        self.body.extend_from_slice(data);
        self.size += data.len() as isize;
        data.len()
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut resp = http::Response::new(Full::new(Bytes::from(self.body)));
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        resp
    }
}
