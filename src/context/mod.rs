//! Per-request context: path parameters and the payload hand-off slot.
//!
//! A [`Context`] is created once per request by the pipeline and moved through
//! every middleware down to the endpoint. Middleware that needs to see what
//! the endpoint left behind grabs a [`PayloadSlot`] handle before forwarding
//! the context; the handle points at the same per-request slot and dies with
//! the request.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::warn;

use crate::Request;
use crate::payload::StashedArtifact;

/// Path parameters extracted from the matched route
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the parameters map
    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    /// Remove a value from the parameters map
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }
}

/// Handle to the single per-request slot carrying a [`StashedArtifact`] from
/// the render step to the cache gate.
///
/// Clones share the slot. It holds at most one artifact; [`take`](Self::take)
/// empties it.
#[derive(Debug, Clone, Default)]
pub struct PayloadSlot {
    inner: Arc<Mutex<Option<StashedArtifact>>>,
}

impl PayloadSlot {
    /// Stores `artifact`, replacing anything stashed earlier in the same request.
    pub fn stash(&self, artifact: StashedArtifact) {
        let mut slot = self.lock("stash");
        if slot.is_some() {
            warn!("payload slot already filled for this request; replacing");
        }
        *slot = Some(artifact);
    }

    /// Removes and returns the stashed artifact, leaving the slot empty.
    pub fn take(&self) -> Option<StashedArtifact> {
        self.lock("take").take()
    }

    /// Returns `true` if an artifact is waiting in the slot.
    pub fn is_filled(&self) -> bool {
        self.lock("is_filled").is_some()
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, Option<StashedArtifact>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(op, result = "poisoned_recovered", "recovered payload slot lock");
                poisoned.into_inner()
            }
        }
    }
}

/// Per-request context handed to middleware and endpoints.
pub struct Context {
    request: Request,
    params: PathParams,
    payload: PayloadSlot,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self {
            request,
            params: PathParams::new(),
            payload: PayloadSlot::default(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Replaces the path parameters; called by the router once a route matched.
    pub fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    /// Returns a handle to this request's payload slot.
    pub fn payload_slot(&self) -> PayloadSlot {
        self.payload.clone()
    }

    /// Stashes a serialized payload for the cache gate.
    pub fn stash_payload(&self, artifact: StashedArtifact) {
        self.payload.stash(artifact);
    }
}
