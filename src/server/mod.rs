//! TCP front end: accepts connections and feeds each request through a
//! [`Pipeline`].
//!
//! Connections are persistent unless the client asks otherwise. Pipelined
//! requests already sitting in the read buffer are answered in order before
//! the socket is read again.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::request::{Request, RequestError};
use crate::http::{Response, StatusCode};
use crate::middleware::Pipeline;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (head plus body) buffered before answering `413`.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

const READ_BUF_CAPACITY: usize = 4096;

/// A bound listener.
///
/// # Examples
///
/// ```rust,no_run
/// use payload_gate::{Response, Router, Server, StatusCode};
/// use payload_gate::middleware::Pipeline;
///
/// # async fn demo() -> Result<(), payload_gate::ServerError> {
/// let mut router = Router::new();
/// router.get("/health", |_ctx| async { Response::new(StatusCode::NoContent) });
///
/// Server::bind("127.0.0.1:3000").await?.serve(Pipeline::new(router)).await
/// # }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds to `addr`. Port `0` picks a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] when the address is unavailable.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the task is dropped, one Tokio task per
    /// connection. Accept failures are logged and skipped.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), ServerError> {
        let pipeline = Arc::new(pipeline);
        info!(address = %self.local_addr, "server listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };
            debug!(%peer, "connection accepted");

            let connection = Connection::new(stream, peer, Arc::clone(&pipeline));
            tokio::spawn(connection.run());
        }
    }
}

// Outcome of waiting for the next request on a connection.
enum Frame {
    Request(Request),
    // Answered without reaching the pipeline; the connection closes afterwards.
    Rejected(Response),
    Closed,
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    pipeline: Arc<Pipeline>,
    buf: BytesMut,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, pipeline: Arc<Pipeline>) -> Self {
        Self {
            stream,
            peer,
            pipeline,
            buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
        }
    }

    async fn run(mut self) {
        if let Err(e) = self.serve_requests().await {
            warn!(peer = %self.peer, error = %e, "connection closed with error");
        }
    }

    async fn serve_requests(&mut self) -> std::io::Result<()> {
        loop {
            match self.next_frame().await? {
                Frame::Closed => {
                    debug!(peer = %self.peer, "connection closed by peer");
                    return Ok(());
                }
                Frame::Rejected(response) => {
                    self.write(response, false).await?;
                    return Ok(());
                }
                Frame::Request(request) => {
                    let keep_alive = request.is_keep_alive();
                    let response = self.pipeline.handle(request).await;
                    self.write(response, keep_alive).await?;
                    if !keep_alive {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn next_frame(&mut self) -> std::io::Result<Frame> {
        loop {
            if !self.buf.is_empty() {
                if let Some(frame) = self.take_buffered() {
                    return Ok(frame);
                }
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Ok(Frame::Closed);
            }
        }
    }

    // A frame from what has been read so far, or `None` to keep reading.
    fn take_buffered(&mut self) -> Option<Frame> {
        match Request::parse(&self.buf) {
            Ok((request, head_len)) => {
                let total = head_len + request.content_length().unwrap_or(0);
                if total > MAX_REQUEST_SIZE {
                    return Some(self.reject(StatusCode::PayloadTooLarge, "request too large"));
                }
                if self.buf.len() < total {
                    return None;
                }
                // Bodies are never read by a page route; drop them with the head.
                self.buf.advance(total);
                Some(Frame::Request(request))
            }
            Err(RequestError::Incomplete) if self.buf.len() <= MAX_REQUEST_SIZE => None,
            Err(RequestError::Incomplete) => {
                Some(self.reject(StatusCode::PayloadTooLarge, "request head too large"))
            }
            Err(e) => Some(self.reject(StatusCode::BadRequest, &format!("bad request: {e}"))),
        }
    }

    fn reject(&self, status: StatusCode, reason: &str) -> Frame {
        warn!(peer = %self.peer, status = status.as_u16(), reason, "rejecting request");
        Frame::Rejected(Response::new(status).body(reason))
    }

    async fn write(&mut self, response: Response, keep_alive: bool) -> std::io::Result<()> {
        self.stream.write_all(&response.encode(keep_alive)).await?;
        self.stream.flush().await
    }
}
