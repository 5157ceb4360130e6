//! Render endpoint: turns [`Renderer`] output into responses.
//!
//! The renderer is a black box that produces markup plus a [`PagePayload`]
//! for a route. [`RenderEndpoint`] mounts it on a [`Router`] and serves both
//! representations of every page:
//!
//! - `GET /route`: the HTML. A clean server render also hands its payload to
//!   the [`PayloadSerializer`], which stashes it for the cache gate.
//! - `GET /route/_payload.json`: the encoded data payload of the same render.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use crate::context::Context;
use crate::payload::{
    CONTENT_TYPE_JSON, PagePayload, PayloadSerializer, RenderState, normalize_route_path,
    payload_route_path,
};
use crate::{Response, Router, StatusCode};

const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";

/// Boxed future returned by [`Renderer::render`].
pub type RenderFuture<'a> = Pin<Box<dyn Future<Output = RenderOutput> + Send + 'a>>;

/// Everything a render produced.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub html: String,
    pub status: StatusCode,
    pub state: RenderState,
    pub payload: PagePayload,
}

impl RenderOutput {
    /// A successful server render.
    pub fn page(html: impl Into<String>, payload: PagePayload) -> Self {
        Self {
            html: html.into(),
            status: StatusCode::Ok,
            state: RenderState::default(),
            payload,
        }
    }

    /// A client-only shell: server rendering was turned off for the route.
    pub fn client_only(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            status: StatusCode::Ok,
            state: RenderState {
                server_rendered: false,
                error: None,
            },
            payload: PagePayload::default(),
        }
    }

    /// A render that failed in the pipeline.
    pub fn failed(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            html: message.clone(),
            status,
            state: RenderState {
                server_rendered: true,
                error: Some(message),
            },
            payload: PagePayload::default(),
        }
    }

    fn error_status(&self) -> StatusCode {
        if self.status.is_error() {
            self.status
        } else {
            StatusCode::InternalServerError
        }
    }
}

/// Server-side renderer for a route path.
pub trait Renderer: Send + Sync {
    /// Renders the page at `route` (canonical path, no query).
    fn render<'a>(&'a self, route: &'a str) -> RenderFuture<'a>;
}

/// Router endpoint serving rendered pages and their data payloads.
pub struct RenderEndpoint {
    renderer: Arc<dyn Renderer>,
    serializer: PayloadSerializer,
}

impl RenderEndpoint {
    pub fn new(renderer: Arc<dyn Renderer>, serializer: PayloadSerializer) -> Self {
        Self {
            renderer,
            serializer,
        }
    }

    /// Registers the endpoint for `GET` requests matching `pattern`.
    pub fn mount(self, router: &mut Router, pattern: &str) {
        let endpoint = Arc::new(self);
        router.get(pattern, move |ctx: Context| {
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.respond(ctx).await }
        });
    }

    /// Renders the page or payload addressed by `ctx`.
    pub async fn respond(&self, ctx: Context) -> Response {
        let target = ctx.request().target();
        match payload_route_path(&target) {
            Some(route) => self.respond_payload(&route).await,
            None => self.respond_page(&ctx, &normalize_route_path(&target)).await,
        }
    }

    async fn respond_page(&self, ctx: &Context, route: &str) -> Response {
        let output = self.renderer.render(route).await;

        if let Some(error) = &output.state.error {
            warn!(route, error = %error, "page render failed");
            return Response::new(output.error_status())
                .header("Content-Type", CONTENT_TYPE_HTML)
                .body(output.html);
        }

        self.serializer.on_rendered(ctx, &output.state, &output.payload);

        Response::new(output.status)
            .header("Content-Type", CONTENT_TYPE_HTML)
            .body(output.html)
    }

    async fn respond_payload(&self, route: &str) -> Response {
        let output = self.renderer.render(route).await;

        if output.state.error.is_some() || output.status.is_error() {
            return Response::new(output.error_status()).body(output.html);
        }
        if !output.state.server_rendered {
            return Response::new(StatusCode::NotFound).body("page has no server payload");
        }
        if output.payload.error.is_some() {
            return Response::new(StatusCode::InternalServerError).body("page rendered with an error");
        }
        if output.payload.data.is_empty() {
            return Response::new(StatusCode::NotFound).body("page has no data payload");
        }

        match self.serializer.encode(&output.payload) {
            Ok(body) => Response::new(output.status)
                .header("Content-Type", CONTENT_TYPE_JSON)
                .body(body),
            Err(e) => {
                warn!(route, error = %e, "failed to encode payload");
                Response::new(StatusCode::InternalServerError)
            }
        }
    }
}
