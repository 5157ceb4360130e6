//! Middleware: layers wrapped around the page router.
//!
//! A [`Pipeline`] owns an ordered stack of [`Middleware`] and the router they
//! guard. Each layer gets the request [`Context`] and a [`Next`] cursor. It
//! can answer on its own, or forward with [`Next::run`] and look at the
//! response on the way out. The payload cache gate is one such layer and
//! [`LoggerMiddleware`] is another.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;
use tracing::info;

use crate::{
    Request, Response,
    context::Context,
    payload::millis,
    router::{Handler, Router},
};

/// Boxed future returned by [`Middleware::handle`].
pub type MiddlewareFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A pipeline layer.
///
/// # Examples
///
/// ```rust,no_run
/// use payload_gate::{Response, StatusCode, context::Context};
/// use payload_gate::middleware::{Middleware, MiddlewareFuture, Next};
///
/// // Refuses payload requests for drafts, forwards everything else.
/// struct HideDrafts;
///
/// impl Middleware for HideDrafts {
///     fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
///         Box::pin(async move {
///             if ctx.request().path().starts_with("/drafts/") {
///                 return Response::new(StatusCode::NotFound);
///             }
///             next.run(ctx).await
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture;
}

/// Type-erased layer as stored in a [`Pipeline`].
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> MiddlewareFuture + Send + Sync + 'static>;

/// Erases a [`Middleware`] into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// The rest of the pipeline as seen from one layer.
///
/// Consumed by [`run`](Self::run), so a layer forwards at most once.
pub struct Next {
    layers: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
    position: usize,
}

impl Next {
    pub fn new(layers: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            layers,
            endpoint,
            position: 0,
        }
    }

    /// Calls the next layer, or the endpoint once every layer has run.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.layers.get(self.position).cloned() {
            Some(layer) => {
                self.position += 1;
                layer(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }
}

/// Middleware stack in front of a [`Router`].
///
/// Layers run in the order they were added on the way in and in reverse on
/// the way out; the first one added is outermost. Cloning is cheap and shares
/// the stack.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use payload_gate::{Method, Request, Response, Router, StatusCode};
/// use payload_gate::middleware::{LoggerMiddleware, Pipeline};
///
/// # async fn demo() {
/// let mut router = Router::new();
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
///
/// let pipeline = Pipeline::new(router).wrap(Arc::new(LoggerMiddleware));
/// let response = pipeline.handle(Request::new(Method::Get, "/ping")).await;
/// assert_eq!(response.status(), StatusCode::Ok);
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    layers: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        let router = Arc::new(router);
        let endpoint: Handler = Arc::new(move |ctx: Context| -> MiddlewareFuture {
            let router = Arc::clone(&router);
            Box::pin(async move { router.route(ctx).await })
        });
        Self {
            layers: Arc::from(Vec::new()),
            endpoint,
        }
    }

    /// Adds `middleware` inside every layer added before it.
    #[must_use]
    pub fn wrap<M>(self, middleware: Arc<M>) -> Self
    where
        M: Middleware + 'static,
    {
        let mut layers = self.layers.to_vec();
        layers.push(from_middleware(middleware));
        Self {
            layers: Arc::from(layers),
            endpoint: self.endpoint,
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs `request` through every layer and the router.
    pub async fn handle(&self, request: Request) -> Response {
        let next = Next::new(Arc::clone(&self.layers), Arc::clone(&self.endpoint));
        next.run(Context::new(request)).await
    }
}

/// Logs one line per request once the response is known.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let target = ctx.request().target();

            let response = next.run(ctx).await;

            info!(
                method = %method,
                target = %target,
                status = response.status().as_u16(),
                elapsed_ms = millis(start.elapsed()),
                "request served"
            );
            response
        })
    }
}
