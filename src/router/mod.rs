//! Page routing: maps request paths to the endpoint that renders them.
//!
//! Every route is a page, so routes are registered for reads only and answer
//! both `GET` and `HEAD`. Any other method gets `405 Method Not Allowed`.
//!
//! Patterns are split on `/` and compared segment by segment:
//!
//! | Pattern       | Matches                         | Params         |
//! |---------------|---------------------------------|----------------|
//! | `/about`      | `/about`, `/about/`             |                |
//! | `/pkg/:name`  | `/pkg/vue`                      | `name → "vue"` |
//! | `/pkg/*`      | `/pkg`, `/pkg/vue`, `/pkg/a/b`  |                |
//!
//! The first registered route that matches wins.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::{Response, StatusCode};

pub mod rules;

pub use rules::{RouteRuleTable, RouteRules};

/// Boxed async endpoint, shared between connections.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Anything callable as `async fn(Context) -> Response`.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Capture(String),
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pattern {
    segments: Vec<Segment>,
    // Set by a trailing `/*`: any further segments are accepted.
    open: bool,
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

impl Pattern {
    pub(crate) fn parse(pattern: &str) -> Self {
        let (fixed, open) = match pattern.strip_suffix("/*") {
            Some(prefix) => (prefix, true),
            None => (pattern, false),
        };
        let segments = path_segments(fixed)
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => Segment::Capture(name.to_owned()),
                None => Segment::Literal(segment.to_owned()),
            })
            .collect();
        Self { segments, open }
    }

    /// Captured params when `path` matches.
    pub(crate) fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut parts = path_segments(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Capture(name) => params.insert(name.clone(), part.to_owned()),
            }
        }

        (self.open || parts.next().is_none()).then_some(params)
    }
}

struct Route {
    pattern: Pattern,
    handler: Handler,
}

/// Ordered table of page routes.
///
/// # Examples
///
/// ```rust,no_run
/// use payload_gate::{Method, Request, Response, Router, StatusCode, context::Context};
///
/// # async fn demo() {
/// let mut router = Router::new();
/// router.get("/pkg/:name", |ctx: Context| async move {
///     let name = ctx.params().get("name").unwrap_or_default().to_owned();
///     Response::new(StatusCode::Ok).body(name)
/// });
///
/// let response = router.route(Context::new(Request::new(Method::Get, "/pkg/vue"))).await;
/// assert_eq!(response.body_text(), Some("vue"));
/// # }
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for reads of paths matching `pattern`.
    pub fn get(&mut self, pattern: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            pattern: Pattern::parse(pattern),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Runs the first route matching the request path, with its captures
    /// written into `ctx`.
    pub async fn route(&self, mut ctx: Context) -> Response {
        if !ctx.request().method().is_read() {
            return Response::new(StatusCode::MethodNotAllowed).header("Allow", "GET, HEAD");
        }

        let path = ctx.request().path();
        let matched = self
            .routes
            .iter()
            .find_map(|route| route.pattern.matches(path).map(|params| (route, params)));

        match matched {
            Some((route, params)) => {
                ctx.set_params(params);
                (route.handler)(ctx).await
            }
            None => Response::new(StatusCode::NotFound),
        }
    }
}
