//! # Scribe Gateway
//!
//! An API gateway that fronts a small fleet of internal publishing
//! services: it verifies bearer tokens, enforces role and plan gates,
//! rate limits callers, and proxies matched routes to their upstreams
//! with identity headers attached.
//!
//! The crate is organized around one request pipeline:
//!
//! - [`core`] holds configuration, the error taxonomy, and shared types
//! - [`auth`] verifies tokens and applies per-route authorization
//! - [`middleware`] implements fixed-window rate limiting
//! - [`routing`] resolves paths against prefix routes
//! - [`proxy`] forwards requests upstream and relays responses
//! - [`gateway`] wires the pieces into an axum server with lifecycle
//!   management and graceful drain

pub mod auth;
pub mod core;
pub mod gateway;
pub mod middleware;
pub mod proxy;
pub mod routing;

pub use crate::core::config::GatewayConfig;
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::core::types::{AuthMode, Claims, Plan, RequestDescriptor, Role, RoutePolicy};
pub use crate::gateway::server::{build_gateway, serve, GatewayState};
