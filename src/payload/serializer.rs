//! Render-side half of the payload cache.
//!
//! After a full-page render finishes, [`PayloadSerializer::on_rendered`]
//! encodes the page's data payload and stashes it in the request's payload
//! slot for the gate to persist. Anything short of a clean server render with
//! data leaves the slot empty; a failed encoding is logged and never reaches
//! the response.

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::StashedArtifact;
use super::codec::{self, CodecError, Reducers};
use crate::context::Context;

/// Data produced for a page alongside its markup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePayload {
    /// Data fetched during the render, keyed by fetch key.
    pub data: Map<String, Value>,
    /// Set when the page was prerendered, in milliseconds since the Unix epoch.
    pub prerendered_at: Option<u64>,
    /// Shared application state. Never part of the data payload.
    pub state: Map<String, Value>,
    /// Error captured inside the page during rendering.
    pub error: Option<Value>,
}

impl PagePayload {
    /// A payload holding only `data`.
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

/// How the render pipeline finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderState {
    /// `false` when server rendering was turned off and only a client shell was produced.
    pub server_rendered: bool,
    /// Pipeline-level render error.
    pub error: Option<String>,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            server_rendered: true,
            error: None,
        }
    }
}

/// Encodes page payloads with a caller-supplied reducer table.
#[derive(Debug, Clone, Default)]
pub struct PayloadSerializer {
    reducers: Reducers,
}

impl PayloadSerializer {
    pub fn new(reducers: Reducers) -> Self {
        Self { reducers }
    }

    /// The two fields of a page payload that make up its data-only form.
    pub fn select(payload: &PagePayload) -> Value {
        json!({
            "data": payload.data,
            "prerenderedAt": payload.prerendered_at,
        })
    }

    /// Encodes the data-only form of `payload`.
    pub fn encode(&self, payload: &PagePayload) -> Result<String, CodecError> {
        codec::stringify(&Self::select(payload), &self.reducers)
    }

    /// Builds the artifact for a finished render, or `None` when the render is
    /// not worth caching or the payload cannot be encoded.
    pub fn serialize(&self, state: &RenderState, payload: &PagePayload) -> Option<StashedArtifact> {
        if !state.server_rendered {
            debug!("server rendering disabled; nothing to stash");
            return None;
        }
        if state.error.is_some() || payload.error.is_some() {
            debug!("render ended in an error; nothing to stash");
            return None;
        }
        if payload.data.is_empty() {
            debug!("empty data payload; nothing to stash");
            return None;
        }

        match self.encode(payload) {
            Ok(body) => Some(StashedArtifact::json(body)),
            Err(e) => {
                warn!(error = %e, "failed to serialize page payload");
                None
            }
        }
    }

    /// Serializes the payload of a finished render into `ctx`'s payload slot.
    ///
    /// Returns `true` if an artifact was stashed.
    pub fn on_rendered(&self, ctx: &Context, state: &RenderState, payload: &PagePayload) -> bool {
        match self.serialize(state, payload) {
            Some(artifact) => {
                ctx.stash_payload(artifact);
                true
            }
            None => false,
        }
    }
}
