//! Response cache middleware.
//!
//! Runs the downstream handler as the render action of a [`CachedRender`], so
//! public GET routes are cached, minified and served from either tier without
//! the handlers knowing about it. Responses that are not plain `200 OK` HTML,
//! or whose body is too large to buffer, pass through untouched and are never
//! cached.
//!
//! [`CachedRender`]: super::CachedRender

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header, response::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use super::{
    RenderCache,
    config::CacheOptions,
    lock::mutex_lock,
    render::{RenderAction, RequestContext, ServedPage},
};

const SOURCE: &str = "cache::middleware";
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Response head of the downstream run, kept so a fresh page keeps its headers.
type SharedParts = Arc<Mutex<Option<Parts>>>;

/// Shared cache state for the middleware.
#[derive(Clone)]
pub struct CacheState {
    pub cache: RenderCache,
    pub options: CacheOptions<PageRequest>,
    /// Requests carrying this header are treated as privileged.
    pub privileged_header: Option<HeaderName>,
}

/// Request context extracted from an inbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    path: String,
    query: String,
    privileged: bool,
}

impl PageRequest {
    pub fn new(path: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: query.into(),
            privileged: false,
        }
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn from_request(request: &Request<Body>, privileged_header: Option<&HeaderName>) -> Self {
        let uri = request.uri();
        let privileged =
            privileged_header.is_some_and(|name| request.headers().contains_key(name));
        Self::new(uri.path(), uri.query().unwrap_or("")).privileged(privileged)
    }
}

impl RequestContext for PageRequest {
    fn path(&self) -> &str {
        &self.path
    }

    fn query(&self) -> &str {
        &self.query
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }
}

impl IntoResponse for ServedPage {
    fn into_response(self) -> Response {
        let content_type = self
            .content_type
            .as_deref()
            .and_then(|value| HeaderValue::from_str(value).ok())
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (X_CACHE, HeaderValue::from_static(self.source.as_str())),
            ],
            self.body,
        )
            .into_response()
    }
}

/// Rebuild a freshly produced page on top of the downstream response head.
fn with_downstream_parts(page: ServedPage, mut parts: Parts) -> Response {
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .entry(header::CONTENT_TYPE)
        .or_insert(HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static(page.source.as_str()));
    Response::from_parts(parts, Body::from(page.body))
}

/// The rest of the middleware stack, run at most once.
struct Downstream {
    pending: Mutex<Option<(Request<Body>, Next)>>,
    parts: SharedParts,
}

impl Downstream {
    fn new(request: Request<Body>, next: Next, parts: SharedParts) -> Self {
        Self {
            pending: Mutex::new(Some((request, next))),
            parts,
        }
    }
}

#[async_trait]
impl RenderAction<PageRequest> for Downstream {
    /// A response that must be returned as-is.
    type Error = Response;

    async fn render(&self, _: &PageRequest) -> Result<String, Response> {
        let taken = mutex_lock(&self.pending, SOURCE, "downstream.take").take();
        let Some((request, next)) = taken else {
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        };

        let response = next.run(request).await;
        if !should_store_response(&response) {
            debug!(status = %response.status(), "response not cacheable");
            return Err(response);
        }
        if !fits_in_buffer(&response) {
            debug!(
                upper_bound = ?response.body().size_hint().upper(),
                "response body too large or unbounded, serving uncached"
            );
            return Err(response);
        }

        let (parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        };

        match String::from_utf8(bytes.to_vec()) {
            Ok(markup) => {
                *mutex_lock(&self.parts, SOURCE, "downstream.parts") = Some(parts);
                Ok(markup)
            }
            Err(error) => Err(Response::from_parts(parts, Body::from(error.into_bytes()))),
        }
    }
}

/// Middleware for response caching of public pages.
///
/// Only GET requests are considered. Requests matching the skip check go
/// straight to the handler.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let context = PageRequest::from_request(&request, state.privileged_header.as_ref());
    if state.options.should_skip(&context) {
        debug!(cache = "middleware", outcome = "bypass", "skip check matched");
        return next.run(request).await;
    }

    let parts = SharedParts::default();
    let wrapped = state.cache.wrap(
        state.options.clone(),
        Downstream::new(request, next, parts.clone()),
    );

    match wrapped.call(&context).await {
        Ok(page) => {
            let downstream = mutex_lock(&parts, SOURCE, "downstream.parts").take();
            match downstream {
                Some(parts) => with_downstream_parts(page, parts),
                None => page.into_response(),
            }
        }
        Err(response) => response,
    }
}

pub fn should_store_response(response: &Response) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_none_or(|value| value.starts_with("text/html"))
}

fn fits_in_buffer(response: &Response) -> bool {
    response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= MAX_BODY_BYTES as u64)
}
