//! Local HTTP proxy that routes every request through the worker host.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use reqwest::Url;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{Error, Result};
use crate::host::{ResponseSource, WorkerHost};
use crate::request::{Request, Response, is_hop_by_hop};
use crate::worker::Worker;

/// Path answered by the proxy itself rather than forwarded.
pub const HEALTH_PATH: &str = "/__offline-shim/health";

/// Header added to proxied responses naming where the response came from.
pub const SOURCE_HEADER: &str = "x-offline-shim-source";

struct AppState<W: Worker> {
    host: Arc<WorkerHost<W>>,
    origin: Url,
}

impl<W: Worker> Clone for AppState<W> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            origin: self.origin.clone(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    state: String,
}

async fn health<W: Worker + 'static>(State(state): State<AppState<W>>) -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        state: state.host.state().to_string(),
    })
}

fn into_http(response: Response, source: ResponseSource) -> axum::response::Response {
    let mut builder = axum::response::Response::builder().status(response.status.as_u16());
    for (name, value) in &response.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name, value);
        }
    }
    let source = match source {
        ResponseSource::Worker => "worker",
        ResponseSource::Network => "network",
    };
    builder
        .header(SOURCE_HEADER, source)
        .body(Body::from(response.body))
        .unwrap_or_else(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
}

/// Maps an incoming request target onto the origin. Only the path and query
/// are taken from `uri`, so the result never leaves the origin.
fn target_url(origin: &Url, uri: &Uri) -> Url {
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

async fn forward<W: Worker + 'static>(
    State(state): State<AppState<W>>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let request = Request::new(method, target_url(&state.origin, &uri))
        .with_headers(headers)
        .with_body(body);

    match state.host.fetch(request).await {
        Ok((response, source)) => into_http(response, source),
        Err(e) => {
            log::warn!("Proxy fetch failed for {target}: {e}");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Builds the proxy router for `host`, resolving paths against `origin`.
pub fn router<W: Worker + 'static>(host: Arc<WorkerHost<W>>, origin: Url) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(HEALTH_PATH, get(health::<W>))
        .fallback(forward::<W>)
        .layer(cors)
        .with_state(AppState { host, origin })
}

/// Serves the proxy on `host:port` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn serve<W, F>(
    worker_host: Arc<WorkerHost<W>>,
    origin: Url,
    host: &str,
    port: u16,
    shutdown: F,
) -> Result<()>
where
    W: Worker + 'static,
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Config(format!("invalid proxy address {host}:{port}: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Proxy listening on {addr}, origin {origin}");
    axum::serve(listener, router(worker_host, origin))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
