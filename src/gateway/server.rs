//! # Gateway Server
//!
//! Composes the verifier, rate limiter, route table, and forwarder into a
//! single request pipeline behind one axum application, and owns the serve
//! loop with graceful drain.
//!
//! All shared state lives in [`GatewayState`]; there are no ambient
//! globals, so tests can run parallel gateway instances. The pipeline for
//! a request is: admission (503 while draining), body cap (413), one
//! identity resolution, rate limit (429), route match (404), authorization
//! (401/403/402), then forward (502 on unreachable upstream). `GET /health`
//! is served outside the pipeline and bypasses the limiter and the gate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router as AxumRouter};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::gate::{authorize, resolve_identity};
use crate::auth::verifier::TokenVerifier;
use crate::core::config::{CorsConfig, GatewayConfig};
use crate::core::error::{error_response, GatewayError, GatewayResult};
use crate::core::types::{Environment, RequestDescriptor};
use crate::gateway::lifecycle::GatewayLifecycle;
use crate::middleware::rate_limit::{client_key, RateLimiter};
use crate::proxy::forwarder::{build_upstream_headers, Forwarder, HEADER_REQUEST_ID};
use crate::routing::table::RouteTable;

/// Everything the pipeline needs, shared across handler tasks.
#[derive(Clone)]
pub struct GatewayState {
    pub verifier: Arc<TokenVerifier>,
    pub routes: Arc<RouteTable>,
    pub limiter: Arc<RateLimiter>,
    pub forwarder: Arc<Forwarder>,
    pub lifecycle: Arc<GatewayLifecycle>,
    pub environment: Environment,
    pub max_body_size: usize,
}

impl GatewayState {
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        Ok(Self {
            verifier: Arc::new(TokenVerifier::new(&config.auth.jwt_secret)),
            routes: Arc::new(RouteTable::new(config.routes.clone())),
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            forwarder: Arc::new(Forwarder::new(&config.proxy)?),
            lifecycle: Arc::new(GatewayLifecycle::new()),
            environment: config.server.environment,
            max_body_size: config.server.max_body_size,
        })
    }
}

/// Build the application and its state from configuration.
pub fn build_gateway(config: &GatewayConfig) -> GatewayResult<(AxumRouter, GatewayState)> {
    let state = GatewayState::from_config(config)?;
    let app = pipeline_app(state.clone(), &config.cors);
    Ok((app, state))
}

fn pipeline_app(state: GatewayState, cors: &CorsConfig) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health))
        .fallback(handle_request)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors))
                .layer(CatchPanicLayer::custom(panic_response))
                .into_inner(),
        )
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if config.allowed_origins.iter().any(|origin| origin == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "opaque panic payload".to_string()
    };
    error!(%detail, "handler panicked");
    GatewayError::internal("handler panicked").into_response()
}

async fn health(State(state): State<GatewayState>) -> Response {
    let status = if state.lifecycle.is_draining() {
        "draining"
    } else {
        "ok"
    };

    let mut response = Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "status": status,
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response();

    // Served outside the pipeline, so the correlation id is stamped here.
    if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        response.headers_mut().insert(HEADER_REQUEST_ID, value);
    }

    response
}

/// Top-level pipeline handler for every non-health request.
async fn handle_request(State(state): State<GatewayState>, request: Request) -> Response {
    let started = Instant::now();

    // The real serve loop provides connect info; under in-process test
    // drivers it may be absent.
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 0)));

    let descriptor = RequestDescriptor::new(request.method().clone(), request.uri(), client_addr);

    let mut response = match process(&state, &descriptor, request).await {
        Ok(response) => response,
        Err(err) => error_response(&err, &descriptor, state.environment),
    };

    if let Ok(value) = HeaderValue::from_str(&descriptor.request_id) {
        response.headers_mut().insert(HEADER_REQUEST_ID, value);
    }

    info!(
        method = %descriptor.method,
        path = %descriptor.path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        request_id = %descriptor.request_id,
        client = %descriptor.client_addr,
        "request completed"
    );

    response
}

async fn process(
    state: &GatewayState,
    descriptor: &RequestDescriptor,
    request: Request,
) -> GatewayResult<Response> {
    // Admission first: while draining, nothing else runs.
    let _guard = state
        .lifecycle
        .start_request()
        .ok_or_else(|| GatewayError::unavailable("gateway is draining"))?;

    let (parts, body) = request.into_parts();

    if let Some(length) = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
    {
        if length > state.max_body_size {
            return Err(GatewayError::payload_too_large(state.max_body_size));
        }
    }

    let body = to_bytes(body, state.max_body_size)
        .await
        .map_err(|_| GatewayError::payload_too_large(state.max_body_size))?;

    // Identity is resolved exactly once; the limiter keys off it and the
    // gate consumes the same outcome.
    let identity = resolve_identity(&parts.headers, &state.verifier, Utc::now());

    let key = client_key(&identity, descriptor);
    let decision = state.limiter.allow(&key, Instant::now()).await;
    if !decision.allowed {
        let retry_after = decision.retry_after.unwrap_or_else(|| state.limiter.window());
        return Err(GatewayError::too_many_requests(
            decision.limit,
            state.limiter.window(),
            retry_after,
        ));
    }

    let Some(route) = state.routes.match_path(&descriptor.path) else {
        return Err(GatewayError::not_found(&descriptor.path));
    };

    let claims = authorize(&identity, route.policy, descriptor)?;

    let headers = build_upstream_headers(
        &parts.headers,
        claims.as_ref(),
        route.policy,
        &descriptor.request_id,
    );
    let url = state.forwarder.target_url(
        &route.policy.service,
        &route.rewritten_path,
        descriptor.query.as_deref(),
    )?;

    let mut response = state
        .forwarder
        .forward(&route.policy.service, &descriptor.method, &url, headers, body)
        .await?;

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));

    Ok(response)
}

/// Run the server until it drains.
///
/// Accepts requests until the lifecycle enters `Draining` (see the signal
/// watcher in `main`), then stops accepting and waits up to `grace` for
/// in-flight requests before stopping.
pub async fn serve(
    app: AxumRouter,
    state: GatewayState,
    listener: TcpListener,
    grace: Duration,
) -> GatewayResult<()> {
    let addr = listener
        .local_addr()
        .map_err(|err| GatewayError::internal(format!("listener address unavailable: {}", err)))?;
    info!(%addr, routes = state.routes.len(), "listener bound");

    state.lifecycle.mark_listening();

    let mut drain_rx = state.lifecycle.subscribe();
    let shutdown = async move {
        if !*drain_rx.borrow() {
            let _ = drain_rx.changed().await;
        }
    };

    let server = async {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    };

    let drained = async {
        let mut rx = state.lifecycle.subscribe();
        if !*rx.borrow() {
            let _ = rx.changed().await;
        }
        state.lifecycle.wait_for_drain(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| GatewayError::internal(format!("server error: {}", err)))?;
        }
        _ = drained => {}
    }

    state.lifecycle.mark_stopped();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};

    fn test_state() -> GatewayState {
        let mut config = GatewayConfig::default();
        config.server.max_body_size = 64;
        GatewayState::from_config(&config).unwrap()
    }

    fn request(method: Method, uri: &str, body: &'static str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    fn descriptor_for(request: &Request) -> RequestDescriptor {
        RequestDescriptor::new(
            request.method().clone(),
            request.uri(),
            "127.0.0.1:4000".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn requests_are_rejected_before_listening_and_while_draining() {
        let state = test_state();

        let req = request(Method::GET, "/api/auth/login", "");
        let err = process(&state, &descriptor_for(&req), req).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        state.lifecycle.mark_listening();
        state.lifecycle.begin_drain();

        let req = request(Method::GET, "/api/auth/login", "");
        let err = process(&state, &descriptor_for(&req), req).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code(), "unavailable");
    }

    #[tokio::test]
    async fn unmatched_paths_yield_not_found_naming_the_path() {
        let state = test_state();
        state.lifecycle.mark_listening();

        let req = request(Method::GET, "/api/unknown/thing", "");
        let err = process(&state, &descriptor_for(&req), req).await.unwrap_err();

        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("/api/unknown/thing"));
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected_before_any_forwarding() {
        let state = test_state();
        state.lifecycle.mark_listening();

        let req = request(
            Method::POST,
            "/api/auth/register",
            "this body is comfortably longer than the configured sixty-four byte cap",
        );
        let err = process(&state, &descriptor_for(&req), req).await.unwrap_err();

        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.error_code(), "payload_too_large");
    }

    #[tokio::test]
    async fn health_reports_ok_then_draining() {
        let state = test_state();
        state.lifecycle.mark_listening();

        let body = health_body(&state).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], env!("CARGO_PKG_NAME"));
        assert!(body["timestamp"].is_string());
        assert!(body["version"].is_string());

        state.lifecycle.begin_drain();
        let body = health_body(&state).await;
        assert_eq!(body["status"], "draining");
    }

    async fn health_body(state: &GatewayState) -> serde_json::Value {
        let response = health(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(HEADER_REQUEST_ID));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
