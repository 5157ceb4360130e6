//! Two-stage data payload cache for server-rendered pages.
//!
//! A full-page render serializes its data payload and leaves it in the
//! request's payload slot ([`PayloadSerializer`]). The [`PayloadCacheGate`]
//! middleware persists that artifact after the response is produced, and later
//! answers the page's data-only companion request (`<route>/_payload.json`)
//! straight from the store while the entry is fresh and was written by the
//! running build.
//!
//! ## Modules
//!
//! - [`codec`]: self-describing payload encoding with named reducers.
//! - [`key`]: data-only request recognition and cache key derivation.
//! - [`serializer`]: render-side stash of the encoded payload.
//! - [`gate`]: pre-render lookup and post-render population.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{Response, StatusCode};

pub mod codec;
pub mod gate;
pub mod key;
pub mod serializer;

pub use codec::{CodecError, Reducers, Revivers};
pub use gate::{PayloadCacheGate, STALE_TTL_FACTOR};
pub use key::{cache_key, is_payload_request, normalize_route_path, payload_route_path};
pub use serializer::{PagePayload, PayloadSerializer, RenderState};

/// Suffix identifying a data-only request.
pub const PAYLOAD_SUFFIX: &str = "/_payload.json";

/// Content type of every encoded payload.
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// Header marking a response as coming out of the payload cache.
pub const PROVENANCE_HEADER: &str = "x-payload-cache";

/// Value of [`PROVENANCE_HEADER`].
pub const PROVENANCE_VALUE: &str = "HIT";

/// The fixed header set stored with every entry and replayed on a hit.
pub fn payload_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("content-type".to_string(), CONTENT_TYPE_JSON.to_string()),
        (PROVENANCE_HEADER.to_string(), PROVENANCE_VALUE.to_string()),
    ])
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or_default()
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Encoded payload handed from the render step to the gate within one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashedArtifact {
    pub body: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
}

impl StashedArtifact {
    /// A `200` artifact carrying `body` with the fixed payload headers.
    pub fn json(body: String) -> Self {
        Self {
            body,
            status_code: StatusCode::Ok.as_u16(),
            headers: payload_headers(),
        }
    }
}

/// A persisted payload, keyed by [`cache_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub body: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    /// Write time in milliseconds since the Unix epoch.
    pub cached_at: u64,
    pub build_id: String,
}

impl CacheEntry {
    /// Builds an entry from an artifact stashed during a full-page render.
    pub fn from_artifact(artifact: StashedArtifact, build_id: &str, cached_at: u64) -> Self {
        Self {
            body: artifact.body,
            status_code: artifact.status_code,
            headers: artifact.headers,
            cached_at,
            build_id: build_id.to_string(),
        }
    }

    /// Age of the entry at `now`; entries stamped in the future count as age zero.
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.cached_at)
    }

    /// Returns `true` if the entry was written by `build_id` and is no older than
    /// `max_age_millis` at `now`.
    pub fn is_servable(&self, build_id: &str, now: u64, max_age_millis: u64) -> bool {
        self.build_id == build_id && self.age_millis(now) <= max_age_millis
    }

    /// Rebuilds the response to replay. `None` when the stored status is not one
    /// this crate can emit.
    pub fn to_response(&self) -> Option<Response> {
        let status = StatusCode::from_u16(self.status_code)?;
        let response = self
            .headers
            .iter()
            .fold(Response::new(status), |response, (name, value)| {
                response.header(name.as_str(), value.as_str())
            });
        Some(response.body(self.body.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(build_id: &str, cached_at: u64) -> CacheEntry {
        CacheEntry::from_artifact(StashedArtifact::json("[{}]".to_string()), build_id, cached_at)
    }

    #[test]
    fn millis_saturates_instead_of_wrapping() {
        assert_eq!(millis(Duration::from_secs(120)), 120_000);
        assert_eq!(millis(Duration::MAX), u64::MAX);
        assert!(unix_millis() > 1_600_000_000_000);
    }

    #[test]
    fn artifact_carries_fixed_headers() {
        let artifact = StashedArtifact::json("[]".to_string());
        assert_eq!(artifact.status_code, 200);
        assert_eq!(
            artifact.headers.get("content-type").map(String::as_str),
            Some(CONTENT_TYPE_JSON)
        );
        assert_eq!(
            artifact.headers.get(PROVENANCE_HEADER).map(String::as_str),
            Some(PROVENANCE_VALUE)
        );
    }

    #[test]
    fn servable_checks_build_and_age() {
        let e = entry("b1", 10_000);
        assert!(e.is_servable("b1", 10_000, 0));
        assert!(e.is_servable("b1", 20_000, 10_000));
        assert!(!e.is_servable("b1", 20_001, 10_000));
        assert!(!e.is_servable("b2", 10_000, 10_000));
    }

    #[test]
    fn future_timestamps_have_zero_age() {
        let e = entry("b1", 5_000);
        assert_eq!(e.age_millis(1_000), 0);
    }

    #[test]
    fn entry_serializes_with_camel_case_fields() {
        let json = serde_json::to_value(entry("b1", 42)).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["cachedAt"], 42);
        assert_eq!(json["buildId"], "b1");
    }

    #[test]
    fn replayed_response_keeps_headers_and_body() {
        let response = entry("b1", 0).to_response().unwrap();
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.content_type(), Some(CONTENT_TYPE_JSON));
        assert_eq!(response.headers().get(PROVENANCE_HEADER), Some(PROVENANCE_VALUE));
        assert_eq!(response.body_text(), Some("[{}]"));
    }

    #[test]
    fn unknown_status_is_not_replayed() {
        let mut e = entry("b1", 0);
        e.status_code = 299;
        assert!(e.to_response().is_none());
    }
}
