use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::post,
};
use tracing::{error, info};

use crate::{
    application::pages::PageService,
    cache::{CacheState, response_cache_layer},
};

use super::middleware::log_responses;

const SOURCE: &str = "infra::http::public";
const NOT_FOUND_PAGE: &str = "<!DOCTYPE html><html><head><title>Not found</title></head>\
<body><h1>Not found</h1></body></html>";

#[derive(Clone)]
pub struct HttpState {
    pub pages: Arc<PageService>,
    pub cache: CacheState,
}

pub fn build_router(state: HttpState) -> Router {
    // Every page goes through the cache layer; 404s and errors pass through it uncached.
    let cached_routes = Router::new()
        .fallback(serve_page)
        .layer(middleware::from_fn_with_state(
            state.cache.clone(),
            response_cache_layer,
        ));

    let control_routes = Router::new().route("/_cache/reset", post(reset_cache));

    control_routes
        .merge(cached_routes)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
}

async fn serve_page(State(state): State<HttpState>, uri: Uri) -> Response {
    match state.pages.load(uri.path()).await {
        Ok(Some(markup)) => Html(markup).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response(),
        Err(err) => {
            error!(source = SOURCE, path = %uri.path(), error = %err, "failed to load page");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn reset_cache(State(state): State<HttpState>) -> StatusCode {
    state.cache.cache.reset().await;
    info!(source = SOURCE, "page cache reset");
    StatusCode::NO_CONTENT
}
