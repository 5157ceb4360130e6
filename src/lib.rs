//! # payload-gate
//!
//! A data payload cache for server-rendered pages, built on a from-scratch
//! async HTTP/1.1 server.
//!
//! Every rendered page has a data-only companion, `<route>/_payload.json`,
//! carrying the data its HTML was rendered from. The full-page render stashes
//! that payload, the [`PayloadCacheGate`](payload::PayloadCacheGate) persists
//! it after responding, and later data-only requests are answered from the
//! store without rendering again, for as long as the entry belongs to the
//! running build and is within twice the edge TTL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use payload_gate::{Router, Server};
//! use payload_gate::background::TaskQueue;
//! use payload_gate::cache::MemoryStore;
//! use payload_gate::middleware::{LoggerMiddleware, Pipeline};
//! use payload_gate::payload::{PayloadCacheGate, PayloadSerializer};
//! use payload_gate::render::{RenderEndpoint, Renderer};
//! use payload_gate::router::RouteRuleTable;
//!
//! # async fn run(renderer: Arc<dyn Renderer>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut router = Router::new();
//! RenderEndpoint::new(renderer, PayloadSerializer::default()).mount(&mut router, "/*");
//!
//! let gate = PayloadCacheGate::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(RouteRuleTable::new().isr("/pkg/*")),
//!     Arc::new(TaskQueue::new()),
//!     "build-2024-06-01",
//! );
//! let pipeline = Pipeline::new(router)
//!     .wrap(Arc::new(LoggerMiddleware))
//!     .wrap(Arc::new(gate));
//!
//! Server::bind("127.0.0.1:3000").await?.serve(pipeline).await?;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod payload;
pub mod render;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
