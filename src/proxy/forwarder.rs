//! # Upstream Forwarder
//!
//! Relays matched requests to their upstream service over a single shared
//! HTTP client with connection pooling and TCP keep-alive. The gateway is
//! the trust boundary: the only channel by which downstream services learn
//! the caller's identity is the `x-user-*` headers injected here, so any
//! inbound copies of those headers are stripped before injection.
//!
//! Forwarding never retries. An unreachable or timed-out upstream becomes
//! a 502 for the caller; backend responses, including backend 5xx, are
//! relayed verbatim minus hop-by-hop headers.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, error};
use url::Url;

use crate::core::config::ProxyConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Claims, RoutePolicy};

/// Correlation id header, sent upstream and echoed back to the caller.
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// Authenticated subject id, injected whenever claims are present.
pub const HEADER_USER_ID: &str = "x-user-id";
/// Authenticated email, injected whenever claims are present.
pub const HEADER_USER_EMAIL: &str = "x-user-email";
/// Caller role, injected only for routes that opt in.
pub const HEADER_USER_ROLE: &str = "x-user-role";
/// Caller plan, injected only for routes that opt in.
pub const HEADER_USER_PLAN: &str = "x-user-plan";

/// Headers that describe a single hop and must not be relayed (RFC 7230
/// section 6.1), in either direction.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers only the gateway may set on upstream requests.
fn is_trust_header(name: &str) -> bool {
    matches!(
        name,
        HEADER_REQUEST_ID | HEADER_USER_ID | HEADER_USER_EMAIL | HEADER_USER_ROLE | HEADER_USER_PLAN
    )
}

/// Compute the header set for the upstream request.
///
/// Plain and synchronous: `(inbound, identity, policy, request id) ->
/// outbound`. The inbound headers are copied minus `host`, hop-by-hop
/// headers, and any caller-supplied trust headers; the gateway then
/// injects its own request id and, when claims are present, the identity
/// headers the route policy calls for.
pub fn build_upstream_headers(
    inbound: &HeaderMap,
    claims: Option<&Claims>,
    policy: &RoutePolicy,
    request_id: &str,
) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len() + 5);

    for (name, value) in inbound {
        if name == header::HOST || is_hop_by_hop(name.as_str()) || is_trust_header(name.as_str()) {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    if let Ok(value) = HeaderValue::from_str(request_id) {
        outbound.insert(HEADER_REQUEST_ID, value);
    }

    if let Some(claims) = claims {
        if let Ok(value) = HeaderValue::from_str(&claims.sub) {
            outbound.insert(HEADER_USER_ID, value);
        }
        if let Ok(value) = HeaderValue::from_str(&claims.email) {
            outbound.insert(HEADER_USER_EMAIL, value);
        }
        if policy.forward_role {
            if let Ok(value) = HeaderValue::from_str(&claims.role.to_string()) {
                outbound.insert(HEADER_USER_ROLE, value);
            }
        }
        if policy.forward_plan {
            if let Ok(value) = HeaderValue::from_str(&claims.plan.to_string()) {
                outbound.insert(HEADER_USER_PLAN, value);
            }
        }
    }

    outbound
}

/// Shared upstream HTTP client plus the service base-URL map.
#[derive(Debug)]
pub struct Forwarder {
    client: Client,
    services: HashMap<String, String>,
}

impl Forwarder {
    /// Build the shared client and resolve service base URLs.
    pub fn new(config: &ProxyConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(config.upstream_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| {
                GatewayError::internal(format!("failed to build upstream client: {}", err))
            })?;

        let mut services = HashMap::with_capacity(config.services.len());
        for (name, base) in &config.services {
            Url::parse(base).map_err(|err| {
                GatewayError::config(format!("invalid url for service '{}': {}", name, err))
            })?;
            services.insert(name.clone(), base.trim_end_matches('/').to_string());
        }

        Ok(Self { client, services })
    }

    /// Assemble the absolute upstream URL for a rewritten path.
    pub fn target_url(
        &self,
        service: &str,
        rewritten_path: &str,
        query: Option<&str>,
    ) -> GatewayResult<String> {
        let base = self.services.get(service).ok_or_else(|| {
            GatewayError::internal(format!("no upstream configured for service '{}'", service))
        })?;

        let mut url = format!("{}{}", base, rewritten_path);
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }

        Ok(url)
    }

    /// Send the request upstream and relay the response.
    ///
    /// The response comes back with its original status and headers minus
    /// hop-by-hop entries, body bytes untouched. Connection and timeout
    /// failures map to [`GatewayError::BadGateway`].
    pub async fn forward(
        &self,
        service: &str,
        method: &Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> GatewayResult<Response> {
        let upstream_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|_| GatewayError::internal(format!("unsupported method {}", method)))?;

        // reqwest still speaks the previous http crate generation, so names
        // and values cross the boundary as bytes.
        let mut upstream_headers = reqwest::header::HeaderMap::with_capacity(headers.len());
        for (name, value) in &headers {
            let Ok(name) = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
            else {
                continue;
            };
            let Ok(value) = reqwest::header::HeaderValue::from_bytes(value.as_bytes()) else {
                continue;
            };
            upstream_headers.append(name, value);
        }

        debug!(%method, url, service, "forwarding to upstream");

        let upstream = self
            .client
            .request(upstream_method, url)
            .headers(upstream_headers)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                error!(service, url, %err, "upstream request failed");
                let reason = if err.is_timeout() {
                    "request timed out".to_string()
                } else if err.is_connect() {
                    format!("connection failed: {}", err)
                } else {
                    err.to_string()
                };
                GatewayError::bad_gateway(service, reason)
            })?;

        let status = upstream.status().as_u16();
        let mut relayed = HeaderMap::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) else {
                continue;
            };
            relayed.append(name, value);
        }

        let body = upstream.bytes().await.map_err(|err| {
            error!(service, url, %err, "failed reading upstream response");
            GatewayError::bad_gateway(service, format!("error reading response body: {}", err))
        })?;

        let mut response = Response::builder()
            .status(status)
            .body(Body::from(body))
            .map_err(|err| {
                GatewayError::internal(format!("failed to assemble relay response: {}", err))
            })?;
        *response.headers_mut() = relayed;

        Ok(response)
    }
}
