//! # Gateway Errors
//!
//! One taxonomy for everything the pipeline can refuse: failed
//! authentication and authorization, exhausted rate budgets, unmatched
//! routes, unreachable upstreams, and the gateway's own faults. Every
//! variant knows its HTTP status and a stable machine-readable code, and a
//! single top-level renderer produces the JSON body shape callers see.
//!
//! Authentication and authorization failures terminate the pipeline at the
//! gate and never reach the proxy; proxy failures are translated to
//! `BadGateway` at the proxy boundary; anything uncaught becomes `Internal`
//! at the top of the stack. Nothing is refused silently: every denial is
//! logged where it is decided.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::core::types::{Environment, Plan, RequestDescriptor};

/// Result alias used throughout the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Everything the gateway can fail a request (or its own startup) with.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Invalid or incomplete configuration, detected at startup
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Missing, malformed, expired or otherwise unverifiable credential
    #[error("{reason}")]
    Unauthorized { reason: String },

    /// Verified identity lacks a role the route demands
    #[error("{reason}")]
    Forbidden { reason: String },

    /// Verified identity's plan tier is below what the route demands.
    /// Distinct from `Forbidden` so clients can send the user to billing
    /// instead of treating the denial as a permissions bug.
    #[error("this feature requires the {required} plan or higher")]
    PlanUpgradeRequired { required: String },

    /// Client exhausted its request budget for the current window
    #[error("rate limit exceeded: {limit} requests per {window}")]
    TooManyRequests {
        limit: u32,
        window: String,
        retry_after: Duration,
    },

    /// No configured route prefix matches the request path
    #[error("no route configured for path {path}")]
    NotFound { path: String },

    /// Inbound body larger than the configured cap
    #[error("request body exceeds the maximum of {max_bytes} bytes")]
    PayloadTooLarge { max_bytes: usize },

    /// Upstream unreachable, timed out, or refused the connection
    #[error("upstream service unreachable: {service}: {reason}")]
    BadGateway { service: String, reason: String },

    /// Gateway is draining and no longer accepts pipeline requests
    #[error("{reason}")]
    Unavailable { reason: String },

    /// Uncaught fault anywhere in the pipeline
    #[error("internal server error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unauthorized<S: Into<String>>(reason: S) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn plan_upgrade_required(required: Plan) -> Self {
        Self::PlanUpgradeRequired {
            required: required.to_string(),
        }
    }

    pub fn too_many_requests(limit: u32, window: Duration, retry_after: Duration) -> Self {
        Self::TooManyRequests {
            limit,
            window: humantime::format_duration(window).to_string(),
            retry_after,
        }
    }

    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn payload_too_large(max_bytes: usize) -> Self {
        Self::PayloadTooLarge { max_bytes }
    }

    pub fn bad_gateway<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::BadGateway {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::PlanUpgradeRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable snake_case code used as the JSON `error` field.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::PlanUpgradeRequired { .. } => "plan_upgrade_required",
            Self::TooManyRequests { .. } => "too_many_requests",
            Self::NotFound { .. } => "not_found",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::BadGateway { .. } => "bad_gateway",
            Self::Unavailable { .. } => "unavailable",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Message safe to return to callers in any deployment mode.
    ///
    /// Upstream addresses and internal fault text must not leak in
    /// production, so `BadGateway`, `Internal` and `Configuration` collapse
    /// to generic phrases here and keep their specifics in [`Self::detail`].
    pub fn public_message(&self) -> String {
        match self {
            Self::BadGateway { .. } => "upstream service unreachable".to_string(),
            Self::Internal { .. } | Self::Configuration { .. } => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Extra context exposed only in development error bodies.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::BadGateway { service, reason } => Some(format!("{}: {}", service, reason)),
            Self::Internal { message } | Self::Configuration { message } => Some(message.clone()),
            _ => None,
        }
    }

    /// Time the client should wait before retrying, for 429 responses.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TooManyRequests { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

/// Render the canonical error body for a request the pipeline refused.
///
/// Shape: `{error, message, timestamp, path, method}`, plus `detail` when
/// the deployment mode is development and the error carries any. 429s get
/// a `Retry-After` header, rounded up to whole seconds.
pub fn error_response(
    error: &GatewayError,
    descriptor: &RequestDescriptor,
    environment: Environment,
) -> Response {
    let mut body = json!({
        "error": error.error_code(),
        "message": error.public_message(),
        "timestamp": Utc::now().to_rfc3339(),
        "path": descriptor.path,
        "method": descriptor.method.as_str(),
    });

    if environment.is_development() {
        if let Some(detail) = error.detail() {
            body["detail"] = json!(detail);
        }
    }

    let mut response = (error.status_code(), Json(body)).into_response();
    if let Some(retry_after) = error.retry_after() {
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// Fallback rendering for errors that escape without request context.
/// The pipeline itself always goes through [`error_response`].
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.error_code(),
            "message": self.public_message(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        let mut response = (self.status_code(), Json(body)).into_response();
        if let Some(retry_after) = self.retry_after() {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
