//! Package pages served through the payload cache.
//!
//! ```text
//! PAYLOAD_GATE__CACHE__BUILD_ID=dev \
//! PAYLOAD_GATE__CACHE__ISR_ROUTES=/pkg/* \
//! RUST_LOG=payload_gate=debug cargo run --example isr_server
//!
//! curl -i localhost:3000/pkg/vue                  # renders, seeds the cache
//! curl -i localhost:3000/pkg/vue/_payload.json    # x-payload-cache: HIT
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, json};
use tracing_subscriber::EnvFilter;

use payload_gate::background::TaskQueue;
use payload_gate::cache::MemoryStore;
use payload_gate::config;
use payload_gate::middleware::{LoggerMiddleware, Pipeline};
use payload_gate::payload::{PagePayload, PayloadCacheGate, PayloadSerializer};
use payload_gate::render::{RenderEndpoint, RenderFuture, RenderOutput, Renderer};
use payload_gate::{Router, Server, StatusCode};

const PACKAGES: &[(&str, &str, &str)] = &[
    ("vue", "3.5.13", "The progressive JavaScript framework"),
    ("react", "19.0.0", "A library for building user interfaces"),
    ("svelte", "5.16.0", "Cybernetically enhanced web apps"),
];

/// Renders `/pkg/<name>` from a static registry, with a short delay standing
/// in for upstream fetches.
struct Registry;

impl Renderer for Registry {
    fn render<'a>(&'a self, route: &'a str) -> RenderFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;

            if route == "/" {
                let links: String = PACKAGES
                    .iter()
                    .map(|(name, _, _)| format!("<li><a href=\"/pkg/{name}\">{name}</a></li>"))
                    .collect();
                return RenderOutput::page(format!("<ul>{links}</ul>"), PagePayload::default());
            }

            let Some(name) = route.strip_prefix("/pkg/") else {
                return RenderOutput::failed(StatusCode::NotFound, "<h1>Not Found</h1>");
            };
            let Some((name, version, description)) =
                PACKAGES.iter().find(|(candidate, _, _)| *candidate == name)
            else {
                return RenderOutput::failed(StatusCode::NotFound, "<h1>Unknown package</h1>");
            };

            let mut data = Map::new();
            data.insert(
                format!("pkg:{name}"),
                json!({ "name": name, "version": version, "description": description }),
            );
            RenderOutput::page(
                format!("<h1>{name}@{version}</h1><p>{description}</p>"),
                PagePayload::with_data(data),
            )
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = config::load(None)?;

    let mut router = Router::new();
    RenderEndpoint::new(Arc::new(Registry), PayloadSerializer::default()).mount(&mut router, "/*");

    let store = Arc::new(
        MemoryStore::with_namespace(settings.cache.namespace.as_str())
            .max_entries(settings.cache.max_entries),
    );
    let tasks = Arc::new(TaskQueue::new());
    let gate = PayloadCacheGate::from_settings(&settings.cache, store, tasks);

    let pipeline = Pipeline::new(router)
        .wrap(Arc::new(LoggerMiddleware))
        .wrap(Arc::new(gate));

    Server::bind(&settings.server.addr)
        .await?
        .serve(pipeline)
        .await?;

    Ok(())
}
