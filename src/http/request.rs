//! Request heads, parsed with [`httparse`] or built in-process.

use thiserror::Error;

use super::{Headers, Method};

/// Why a buffer could not be turned into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// The header block has not fully arrived yet.
    #[error("request head is incomplete")]
    Incomplete,

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request line has no {field}")]
    MissingField { field: &'static str },
}

/// The head of an HTTP/1.x request.
///
/// The body is not retained: every route in this crate is a read, so the
/// server only needs [`content_length`](Self::content_length) to skip past it.
///
/// # Examples
///
/// ```
/// use payload_gate::http::{Method, Request};
///
/// let raw = b"GET /pkg/vue/_payload.json?v=3 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, head_len) = Request::parse(raw).unwrap();
///
/// assert_eq!(head_len, raw.len());
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/pkg/vue/_payload.json");
/// assert_eq!(request.target(), "/pkg/vue/_payload.json?v=3");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    // 0 for HTTP/1.0, 1 for HTTP/1.1.
    minor_version: u8,
    headers: Headers,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from the front of `buf`.
    ///
    /// On success returns the request and the length of its head, i.e. the
    /// offset at which a body would start.
    ///
    /// # Errors
    ///
    /// [`RequestError::Incomplete`] until the blank line ending the head has
    /// been received; [`RequestError::Parse`] or
    /// [`RequestError::MissingField`] for input that is not HTTP.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);

        let httparse::Status::Complete(head_len) = head.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let method = head.method.ok_or(RequestError::MissingField { field: "method" })?;
        let target = head.path.ok_or(RequestError::MissingField { field: "target" })?;
        let minor_version = head.version.ok_or(RequestError::MissingField { field: "version" })?;

        let mut headers = Headers::with_capacity(head.headers.len());
        for field in head.headers.iter() {
            // Non UTF-8 values are dropped rather than failing the request.
            if let Ok(value) = std::str::from_utf8(field.value) {
                headers.append(field.name, value);
            }
        }

        let mut request = Self::new(Method::from(method), target);
        request.minor_version = minor_version;
        request.headers = headers;
        Ok((request, head_len))
    }

    /// Builds an HTTP/1.1 request for `target` (path plus optional `?query`)
    /// without going through the wire parser.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };
        Self {
            method,
            path,
            query,
            minor_version: 1,
            headers: Headers::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path component of the target, without the query.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The target as it appeared on the request line.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Whether the client expects the connection to stay open afterwards.
    /// HTTP/1.1 defaults to yes, HTTP/1.0 to no.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(value) => value.eq_ignore_ascii_case("keep-alive"),
            None => self.minor_version == 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}
