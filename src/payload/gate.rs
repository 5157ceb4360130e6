//! Cache gate: the pipeline side of the payload cache.
//!
//! [`PayloadCacheGate`] is a [`Middleware`] with two halves around
//! [`Next::run`]:
//!
//! 1. **Lookup.** A data-only `GET` (`<route>/_payload.json[?query]`) is
//!    answered from the store when the entry for `build_id:route` exists, was
//!    written by the running build, and is no older than
//!    `ttl × STALE_TTL_FACTOR`. The render never runs in that case.
//! 2. **Population.** After a render, successful data-only responses are
//!    stored as-is; successful HTML renders of ISR routes store the artifact
//!    the serializer left in the payload slot. Writes go to the
//!    [`Scheduler`] and never hold up the response.
//!
//! Every store failure degrades to a miss.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::key::{cache_key, normalize_route_path, payload_route_path};
use super::{CacheEntry, StashedArtifact, millis, payload_headers, unix_millis};
use crate::background::Scheduler;
use crate::cache::PayloadStore;
use crate::config::CacheSettings;
use crate::context::{Context, PayloadSlot};
use crate::middleware::{Middleware, MiddlewareFuture, Next};
use crate::router::{RouteRuleTable, RouteRules};
use crate::{Method, Response};

/// Multiplier applied to the TTL for data-only entries.
///
/// Full-page HTML sits in an edge cache for `ttl`; a client can pick up that
/// HTML just before it expires and ask for the payload a moment later. Serving
/// payload entries for twice the edge TTL covers that gap. The factor is tied
/// to the edge TTL and has to be re-derived if the edge layer's policy changes.
pub const STALE_TTL_FACTOR: u32 = 2;

/// Default edge TTL in seconds.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Source of "now" in milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Payload cache middleware. See the [module docs](self).
#[derive(Clone)]
pub struct PayloadCacheGate {
    store: Arc<dyn PayloadStore>,
    rules: Arc<dyn RouteRules>,
    scheduler: Arc<dyn Scheduler>,
    build_id: Arc<str>,
    ttl: Duration,
    enabled: bool,
    clock: Clock,
}

impl PayloadCacheGate {
    /// Creates an enabled gate for deployment `build_id` with the default TTL.
    pub fn new(
        store: Arc<dyn PayloadStore>,
        rules: Arc<dyn RouteRules>,
        scheduler: Arc<dyn Scheduler>,
        build_id: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            store,
            rules,
            scheduler,
            build_id: build_id.into(),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            enabled: true,
            clock: Arc::new(unix_millis),
        }
    }

    /// Builds a gate from validated settings; ISR routes come from
    /// `settings.isr_routes`.
    pub fn from_settings(
        settings: &CacheSettings,
        store: Arc<dyn PayloadStore>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let rules = Arc::new(RouteRuleTable::from_patterns(&settings.isr_routes));
        Self::new(store, rules, scheduler, settings.build_id.as_str())
            .ttl(settings.ttl)
            .enabled(settings.enabled)
    }

    /// Sets the edge TTL the grace window is derived from.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Turns the gate into a pass-through when `false`.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Replaces the wall clock.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Longest age at which a payload entry is still served.
    pub fn stale_ttl(&self) -> Duration {
        self.ttl.saturating_mul(STALE_TTL_FACTOR)
    }

    async fn intercept(self, ctx: Context, next: Next) -> Response {
        if !self.enabled || ctx.request().method() != &Method::Get {
            return next.run(ctx).await;
        }

        let target = ctx.request().target();
        let payload_route = payload_route_path(&target);

        if let Some(route) = payload_route.as_deref() {
            if let Some(cached) = self.lookup(route).await {
                return cached;
            }
        }

        let slot = ctx.payload_slot();
        let response = next.run(ctx).await;
        self.populate(payload_route, &target, &slot, &response);
        response
    }

    async fn lookup(&self, route: &str) -> Option<Response> {
        let key = cache_key(&self.build_id, route);
        let entry = match self.store.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(cache = "payload", outcome = "miss", key = %key, "no payload entry");
                return None;
            }
            Err(e) => {
                warn!(cache = "payload", key = %key, error = %e, "payload lookup failed; rendering");
                return None;
            }
        };

        let max_age = millis(self.stale_ttl());
        if !entry.is_servable(&self.build_id, (self.clock)(), max_age) {
            debug!(
                cache = "payload",
                outcome = "stale",
                key = %key,
                entry_build = %entry.build_id,
                "payload entry not servable"
            );
            return None;
        }

        match entry.to_response() {
            Some(response) => {
                debug!(cache = "payload", outcome = "hit", key = %key, "serving cached payload");
                Some(response)
            }
            None => {
                warn!(
                    cache = "payload",
                    key = %key,
                    status = entry.status_code,
                    "cached payload has an unusable status; rendering"
                );
                None
            }
        }
    }

    fn populate(
        &self,
        payload_route: Option<String>,
        target: &str,
        slot: &PayloadSlot,
        response: &Response,
    ) {
        // The slot never outlives this call, whatever branch is taken.
        let stashed = slot.take();

        if response.status().is_error() {
            return;
        }

        let (route, artifact) = match payload_route {
            Some(route) => {
                let Some(body) = response.body_text().filter(|body| !body.is_empty()) else {
                    return;
                };
                let artifact = StashedArtifact {
                    body: body.to_string(),
                    status_code: response.status().as_u16(),
                    headers: payload_headers(),
                };
                (route, artifact)
            }
            None => {
                let route = normalize_route_path(target);
                if !is_html(response) || !self.rules.is_cacheable(&route) {
                    return;
                }
                let Some(artifact) = stashed else {
                    return;
                };
                (route, artifact)
            }
        };

        let key = cache_key(&self.build_id, &route);
        let entry = CacheEntry::from_artifact(artifact, &self.build_id, (self.clock)());
        self.persist(key, entry);
    }

    fn persist(&self, key: String, entry: CacheEntry) {
        let store = Arc::clone(&self.store);
        self.scheduler.defer(Box::pin(async move {
            match store.set(&key, &entry).await {
                Ok(()) => debug!(cache = "payload", key = %key, "payload entry stored"),
                Err(e) => warn!(cache = "payload", key = %key, error = %e, "failed to store payload entry"),
            }
        }));
    }
}

fn is_html(response: &Response) -> bool {
    response
        .content_type()
        .is_some_and(|content_type| content_type.contains("text/html"))
}

impl Middleware for PayloadCacheGate {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        let gate = self.clone();
        Box::pin(gate.intercept(ctx, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::TaskQueue;
    use crate::cache::{MemoryStore, StoreError, StoreFuture};
    use crate::middleware::Pipeline;
    use crate::payload::{CONTENT_TYPE_JSON, PROVENANCE_HEADER};
    use crate::{Request, Router, StatusCode};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    const T0: u64 = 1_700_000_000_000;

    struct Harness {
        store: Arc<MemoryStore>,
        tasks: Arc<TaskQueue>,
        renders: Arc<AtomicUsize>,
        now: Arc<AtomicU64>,
        pipeline: Pipeline,
    }

    impl Harness {
        async fn get(&self, target: &str) -> Response {
            let response = self.pipeline.handle(Request::new(Method::Get, target)).await;
            self.tasks.drain().await;
            response
        }

        fn renders(&self) -> usize {
            self.renders.load(Ordering::SeqCst)
        }

        fn advance(&self, secs: u64) {
            self.now.fetch_add(secs * 1000, Ordering::SeqCst);
        }
    }

    // `/pkg/*` renders HTML and stashes a payload; `.../_payload.json` renders JSON;
    // `/broken` fails.
    fn harness(build_id: &str) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let tasks = Arc::new(TaskQueue::new());
        let renders = Arc::new(AtomicUsize::new(0));
        let now = Arc::new(AtomicU64::new(T0));

        let mut router = Router::new();
        let counter = Arc::clone(&renders);
        router.get("/broken", move |_ctx: Context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Response::new(StatusCode::InternalServerError).body("boom")
            }
        });
        let counter = Arc::clone(&renders);
        router.get("/*", move |ctx: Context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if ctx.request().path().ends_with("/_payload.json") {
                    Response::new(StatusCode::Ok)
                        .header("Content-Type", CONTENT_TYPE_JSON)
                        .body("[\"rendered\"]")
                } else {
                    ctx.stash_payload(StashedArtifact::json("[\"stashed\"]".to_string()));
                    Response::new(StatusCode::Ok)
                        .header("Content-Type", "text/html; charset=utf-8")
                        .body("<html></html>")
                }
            }
        });

        let clock_now = Arc::clone(&now);
        let gate = PayloadCacheGate::new(
            store.clone(),
            Arc::new(RouteRuleTable::new().isr("/pkg/*")),
            tasks.clone(),
            build_id,
        )
        .clock(Arc::new(move || clock_now.load(Ordering::SeqCst)));

        Harness {
            store,
            tasks,
            renders,
            now,
            pipeline: Pipeline::new(router).wrap(Arc::new(gate)),
        }
    }

    fn entry(build_id: &str, cached_at: u64) -> CacheEntry {
        CacheEntry::from_artifact(StashedArtifact::json("[\"cached\"]".to_string()), build_id, cached_at)
    }

    #[tokio::test]
    async fn html_render_seeds_payload_entry() {
        let h = harness("B1");
        let res = h.get("/pkg/vue").await;
        assert_eq!(res.body_text(), Some("<html></html>"));

        let stored = h.store.get("B1:/pkg/vue").await.unwrap().unwrap();
        assert_eq!(stored.body, "[\"stashed\"]");
        assert_eq!(stored.cached_at, T0);
        assert_eq!(stored.build_id, "B1");
    }

    #[tokio::test]
    async fn trailing_slash_and_query_share_entry() {
        let h = harness("B1");
        h.get("/pkg/vue/?tab=readme").await;
        assert!(h.store.get("B1:/pkg/vue").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn non_isr_html_is_not_cached() {
        let h = harness("B1");
        h.get("/about").await;
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn hit_skips_render_and_replays_entry() {
        let h = harness("B1");
        h.get("/pkg/vue").await;
        assert_eq!(h.renders(), 1);

        h.advance(30);
        let res = h.get("/pkg/vue/_payload.json").await;
        assert_eq!(h.renders(), 1);
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_text(), Some("[\"stashed\"]"));
        assert_eq!(res.content_type(), Some(CONTENT_TYPE_JSON));
        assert_eq!(res.headers().get(PROVENANCE_HEADER), Some("HIT"));
    }

    #[tokio::test]
    async fn hit_does_not_refresh_entry() {
        let h = harness("B1");
        h.store.set("B1:/pkg/vue", &entry("B1", T0)).await.unwrap();
        h.advance(10);
        h.get("/pkg/vue/_payload.json").await;
        assert_eq!(h.store.get("B1:/pkg/vue").await.unwrap().unwrap().cached_at, T0);
    }

    #[tokio::test]
    async fn grace_window_serves_entries_past_ttl() {
        let h = harness("B1");
        h.store.set("B1:/pkg/vue", &entry("B1", T0)).await.unwrap();
        h.advance(61);
        let res = h.get("/pkg/vue/_payload.json").await;
        assert_eq!(res.body_text(), Some("[\"cached\"]"));
        assert_eq!(h.renders(), 0);
    }

    #[tokio::test]
    async fn entry_at_exactly_double_ttl_is_served() {
        let h = harness("B1");
        h.store.set("B1:/pkg/vue", &entry("B1", T0)).await.unwrap();
        h.advance(120);
        h.get("/pkg/vue/_payload.json").await;
        assert_eq!(h.renders(), 0);
    }

    #[tokio::test]
    async fn entry_past_grace_window_rerenders_and_rewrites() {
        let h = harness("B1");
        h.store.set("B1:/pkg/vue", &entry("B1", T0)).await.unwrap();
        h.advance(121);
        let res = h.get("/pkg/vue/_payload.json").await;
        assert_eq!(h.renders(), 1);
        assert_eq!(res.body_text(), Some("[\"rendered\"]"));

        let stored = h.store.get("B1:/pkg/vue").await.unwrap().unwrap();
        assert_eq!(stored.body, "[\"rendered\"]");
        assert_eq!(stored.cached_at, T0 + 121_000);
    }

    #[tokio::test]
    async fn other_build_entries_are_ignored() {
        let h = harness("B2");
        // Written under B2's key but stamped by B1.
        h.store.set("B2:/pkg/vue", &entry("B1", T0)).await.unwrap();
        let res = h.get("/pkg/vue/_payload.json").await;
        assert_eq!(h.renders(), 1);
        assert_eq!(res.body_text(), Some("[\"rendered\"]"));
    }

    #[tokio::test]
    async fn errors_are_never_cached() {
        let h = harness("B1");
        let res = h.get("/broken").await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn root_payload_uses_root_key() {
        let h = harness("B1");
        h.get("/_payload.json?cb=1").await;
        assert!(h.store.get("B1:/").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn non_get_requests_pass_through() {
        let h = harness("B1");
        h.store.set("B1:/pkg/vue", &entry("B1", T0)).await.unwrap();
        let res = h.pipeline.handle(Request::new(Method::Post, "/pkg/vue/_payload.json")).await;
        assert_eq!(res.status(), StatusCode::MethodNotAllowed);
        assert!(res.headers().get(PROVENANCE_HEADER).is_none());
    }

    #[tokio::test]
    async fn unusable_status_falls_back_to_render() {
        let h = harness("B1");
        let mut odd = entry("B1", T0);
        odd.status_code = 299;
        h.store.set("B1:/pkg/vue", &odd).await.unwrap();
        h.get("/pkg/vue/_payload.json").await;
        assert_eq!(h.renders(), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let h = harness("B1");
        h.store.insert_raw("B1:/pkg/vue", "garbage").await;
        let res = h.get("/pkg/vue/_payload.json").await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(h.renders(), 1);
    }

    // Store that fails every call.
    struct DownStore;

    impl PayloadStore for DownStore {
        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<CacheEntry>> {
            Box::pin(async { Err(StoreError::Backend("connection refused".to_string())) })
        }

        fn set<'a>(&'a self, _key: &'a str, _entry: &'a CacheEntry) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(StoreError::Backend("connection refused".to_string())) })
        }
    }

    #[tokio::test]
    async fn store_outage_degrades_to_rendering() {
        let tasks = Arc::new(TaskQueue::new());
        let mut router = Router::new();
        router.get("/*", |_ctx: Context| async {
            Response::new(StatusCode::Ok).body("[\"rendered\"]")
        });
        let gate = PayloadCacheGate::new(
            Arc::new(DownStore),
            Arc::new(RouteRuleTable::new()),
            tasks.clone(),
            "B1",
        );
        let pipeline = Pipeline::new(router).wrap(Arc::new(gate));

        let res = pipeline.handle(Request::new(Method::Get, "/x/_payload.json")).await;
        tasks.drain().await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_text(), Some("[\"rendered\"]"));
    }

    #[tokio::test]
    async fn disabled_gate_is_pass_through() {
        let store = Arc::new(MemoryStore::new());
        let tasks = Arc::new(TaskQueue::new());
        store.set("B1:/", &entry("B1", unix_millis())).await.unwrap();

        let mut router = Router::new();
        router.get("/*", |_ctx: Context| async { Response::new(StatusCode::NoContent) });
        let gate = PayloadCacheGate::new(store.clone(), Arc::new(RouteRuleTable::new()), tasks.clone(), "B1")
            .enabled(false);
        let pipeline = Pipeline::new(router).wrap(Arc::new(gate));

        let res = pipeline.handle(Request::new(Method::Get, "/_payload.json")).await;
        assert_eq!(res.status(), StatusCode::NoContent);
        assert_eq!(tasks.pending(), 0);
    }

    #[test]
    fn stale_ttl_doubles_ttl() {
        let gate = PayloadCacheGate::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RouteRuleTable::new()),
            Arc::new(TaskQueue::new()),
            "B1",
        )
        .ttl(Duration::from_secs(45));
        assert_eq!(gate.stale_ttl(), Duration::from_secs(90));
        assert_eq!(gate.build_id(), "B1");

        let forever = gate.ttl(Duration::MAX);
        assert_eq!(forever.stale_ttl(), Duration::MAX);
    }
}
