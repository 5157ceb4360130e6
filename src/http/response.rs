//! Responses and their HTTP/1.1 wire encoding.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// A response built by a handler or replayed from the payload cache.
///
/// # Examples
///
/// ```
/// use payload_gate::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json; charset=utf-8")
///     .body("[1]");
/// assert_eq!(response.body_text(), Some("[1]"));
///
/// let wire = response.encode(false);
/// let text = std::str::from_utf8(&wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.ends_with("Content-Length: 3\r\nConnection: close\r\n\r\n[1]"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a header field.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn body(self, body: impl Into<String>) -> Self {
        self.body_bytes(body.into())
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, or `None` if it is not UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Encodes the status line, headers and body.
    ///
    /// `Content-Length` and `Connection` are owned by the server and always
    /// written last, replacing any value a handler or cache entry carried.
    /// Non-empty bodies without a content type are sent as `text/plain`.
    pub fn encode(self, keep_alive: bool) -> BytesMut {
        let Self {
            status,
            mut headers,
            body,
        } = self;

        if !body.is_empty() && !headers.contains("content-type") {
            headers.append("Content-Type", "text/plain; charset=utf-8");
        }
        headers.set("Content-Length", body.len().to_string());
        headers.set("Connection", if keep_alive { "keep-alive" } else { "close" });

        let mut buf = BytesMut::with_capacity(64 + headers.len() * 48 + body.len());
        buf.put_slice(format!("HTTP/1.1 {status}\r\n").as_bytes());
        headers.write_to(&mut buf);
        buf.put_slice(b"\r\n");
        buf.put_slice(&body);
        buf
    }
}
