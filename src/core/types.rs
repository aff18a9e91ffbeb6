//! # Core Types
//!
//! Shared data model for the gateway: the identity claims carried by a
//! verified token, the route policies that gate access to upstream services,
//! and the per-request descriptor used for logging and error bodies.
//!
//! Everything here is either immutable after construction (claims, policies)
//! or owned by a single request (descriptor), so these types can be shared
//! freely across concurrently-handled requests.

use axum::http::{Method, Uri};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Role attached to an authenticated subject.
///
/// Serialized in lowercase both in token payloads and in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Subscription plan tier.
///
/// The variant order defines the tier order used by plan gating:
/// `Free < Professional < Enterprise`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Professional,
    Enterprise,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Free => write!(f, "free"),
            Plan::Professional => write!(f, "professional"),
            Plan::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "professional" => Ok(Plan::Professional),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(format!("unknown plan '{}'", other)),
        }
    }
}

/// Decoded identity asserted by a verified token.
///
/// Constructed exclusively by the token verifier, attached to the request
/// context for the lifetime of one request, and discarded afterwards.
/// Unknown payload fields are ignored during decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identifier of the authenticated user
    pub sub: String,

    /// Email address registered for the subject
    pub email: String,

    /// Role granted to the subject
    pub role: Role,

    /// Subscription plan the subject is billed on
    pub plan: Plan,

    /// Issued-at, seconds since the Unix epoch
    pub iat: i64,

    /// Expiry, seconds since the Unix epoch; must be strictly in the future
    /// at verification time
    pub exp: i64,
}

impl Claims {
    /// True when the expiry is not strictly in the future relative to `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Authentication requirement of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No credential is consulted; requests proceed without identity.
    Public,
    /// A valid credential attaches identity, any failure proceeds anonymous.
    Optional,
    /// A valid credential is mandatory.
    #[default]
    Required,
}

/// Static rule mapping a path prefix to an upstream service and its access
/// requirements. Built from configuration at startup and immutable for the
/// process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Path prefix this policy applies to, e.g. `/api/content`.
    /// Matched on segment boundaries only.
    pub prefix: String,

    /// Name of the upstream service, resolved to an address through the
    /// configured service map.
    pub service: String,

    /// Authentication requirement for the route
    #[serde(default)]
    pub auth: AuthMode,

    /// Roles admitted by the route; empty admits every role
    #[serde(default)]
    pub allowed_roles: Vec<Role>,

    /// Plans admitted by the route; empty admits every plan. A claim
    /// satisfies a non-empty list when its tier is at least the tier of
    /// one listed plan.
    #[serde(default)]
    pub allowed_plans: Vec<Plan>,

    /// Forward the subject's role to the upstream as a trust header
    #[serde(default)]
    pub forward_role: bool,

    /// Forward the subject's plan to the upstream as a trust header
    #[serde(default)]
    pub forward_plan: bool,
}

impl RoutePolicy {
    /// Create a policy for `prefix` targeting the named service, requiring
    /// authentication and admitting every role and plan.
    pub fn new(prefix: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            service: service.into(),
            auth: AuthMode::Required,
            allowed_roles: Vec::new(),
            allowed_plans: Vec::new(),
            forward_role: false,
            forward_plan: false,
        }
    }

    pub fn auth(mut self, mode: AuthMode) -> Self {
        self.auth = mode;
        self
    }

    pub fn roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.allowed_roles = roles.into_iter().collect();
        self
    }

    pub fn plans(mut self, plans: impl IntoIterator<Item = Plan>) -> Self {
        self.allowed_plans = plans.into_iter().collect();
        self
    }

    pub fn forward_role(mut self) -> Self {
        self.forward_role = true;
        self
    }

    pub fn forward_plan(mut self) -> Self {
        self.forward_plan = true;
        self
    }

    /// True when the role gate admits `role`.
    pub fn role_allowed(&self, role: Role) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.contains(&role)
    }

    /// True when the plan gate admits `plan`. A non-empty list is satisfied
    /// by any claim whose tier is at least the tier of some listed plan, so
    /// a policy listing `professional` admits `enterprise` as well.
    pub fn plan_satisfied(&self, plan: Plan) -> bool {
        self.allowed_plans.is_empty() || self.allowed_plans.iter().any(|p| plan >= *p)
    }

    /// Lowest tier that satisfies the plan gate, if the gate is active.
    pub fn min_plan(&self) -> Option<Plan> {
        self.allowed_plans.iter().copied().min()
    }
}

/// Deployment mode of the running process.
///
/// Controls how much detail error responses expose: `Development` includes
/// a `detail` field on infrastructure errors, `Production` never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Cheap, cloneable description of an inbound request.
///
/// Carries everything logging and error bodies need without holding the
/// request itself, so it can outlive body consumption and be captured by
/// the top-level error renderer.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Gateway-assigned correlation id, echoed to the caller and forwarded
    /// to the upstream as `x-request-id`
    pub request_id: String,

    /// HTTP method of the inbound request
    pub method: Method,

    /// Request path, before any rewrite
    pub path: String,

    /// Raw query string, without the leading `?`
    pub query: Option<String>,

    /// Network address the request arrived from
    pub client_addr: SocketAddr,

    /// Wall-clock time the gateway accepted the request
    pub received_at: DateTime<Utc>,
}

impl RequestDescriptor {
    pub fn new(method: Method, uri: &Uri, client_addr: SocketAddr) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            client_addr,
            received_at: Utc::now(),
        }
    }
}
