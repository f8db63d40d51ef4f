//! axum integration.
//!
//! [`router`] serves only the verified redirect endpoint. [`layer_into`] puts
//! the same handling in front of an existing application router so that
//! redirect requests never reach the application's own routes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tracing::{debug, error};

use crate::error::ConfigurationError;
use crate::EmbedRedirects;

/// Router that answers verified redirect requests and 404s everything else.
pub fn router(redirects: Arc<EmbedRedirects>) -> Router {
    Router::new()
        .fallback(redirect_handler)
        .with_state(redirects)
}

/// Wrap `app` so verified redirect requests are handled before routing.
///
/// Requests that are not redirect requests fall through to `app` untouched.
pub fn layer_into(app: Router, redirects: Arc<EmbedRedirects>) -> Router {
    app.layer(middleware::from_fn_with_state(redirects, redirect_middleware))
}

async fn redirect_handler(State(redirects): State<Arc<EmbedRedirects>>, uri: Uri) -> Response {
    handle_redirect(&redirects, &uri).unwrap_or_else(|| StatusCode::NOT_FOUND.into_response())
}

async fn redirect_middleware(
    State(redirects): State<Arc<EmbedRedirects>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(response) = handle_redirect(&redirects, request.uri()) {
        return response;
    }
    next.run(request).await
}

/// Run both validation stages for one request.
///
/// Returns `None` when the request is not a redirect request at all.
fn handle_redirect(redirects: &EmbedRedirects, uri: &Uri) -> Option<Response> {
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    match run_stages(redirects, target) {
        Ok(response) => response,
        Err(e) => {
            error!(target: "http", error = %e, "signing salt unavailable");
            Some(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

fn run_stages(
    redirects: &EmbedRedirects,
    target: &str,
) -> Result<Option<Response>, ConfigurationError> {
    let validator = redirects.validator();
    let mut ctx = redirects.request_context(target);

    validator.parse_request(&mut ctx)?;
    if ctx.is_not_found() {
        return Ok(Some(StatusCode::NOT_FOUND.into_response()));
    }
    if !ctx.main_query_suppressed() {
        return Ok(None);
    }

    match validator.send_headers(&mut ctx)? {
        Some(redirect) => Ok(Some(redirect.into_response())),
        None => {
            debug!(target: "http", "redirect abandoned at header time");
            Ok(Some(StatusCode::NOT_FOUND.into_response()))
        }
    }
}
