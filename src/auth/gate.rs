//! # Authorization Gate
//!
//! Policy decisions for a matched route. The gate consumes the identity
//! resolved once per request (see [`resolve_identity`]) together with the
//! route's policy and either admits the request, with or without claims,
//! or denies it with a specific, user-visible reason.
//!
//! Denials are logged at `warn` with the request descriptor fields so an
//! operator can trace every rejected call; optional-auth swallows are
//! logged at `debug` and never fail the request.

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::auth::verifier::{TokenVerifier, VerifyError};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{AuthMode, Claims, Plan, RequestDescriptor, RoutePolicy};

/// The caller's identity, established exactly once per request.
///
/// Resolution happens before rate limiting so that the limiter can key on
/// the authenticated subject, and the result is then reused by the gate.
/// The token is never verified twice.
#[derive(Debug, Clone)]
pub enum ResolvedIdentity {
    /// No bearer credential was presented.
    Anonymous,
    /// A bearer token was presented and verified.
    Verified(Claims),
    /// A bearer token was presented but rejected.
    Failed(VerifyError),
}

impl ResolvedIdentity {
    /// Claims, if verification succeeded.
    pub fn claims(&self) -> Option<&Claims> {
        match self {
            ResolvedIdentity::Verified(claims) => Some(claims),
            _ => None,
        }
    }

    /// The authenticated subject id, if any.
    pub fn subject(&self) -> Option<&str> {
        self.claims().map(|claims| claims.sub.as_str())
    }
}

/// Extract the bearer credential and verify it.
///
/// A missing `Authorization` header, or one that is not of the form
/// `Bearer <token>`, resolves to [`ResolvedIdentity::Anonymous`]; whether
/// that is acceptable is the gate's decision, not this function's.
pub fn resolve_identity(
    headers: &HeaderMap,
    verifier: &TokenVerifier,
    now: DateTime<Utc>,
) -> ResolvedIdentity {
    let Some(token) = bearer_token(headers) else {
        return ResolvedIdentity::Anonymous;
    };

    match verifier.verify(token, now) {
        Ok(claims) => ResolvedIdentity::Verified(claims),
        Err(err) => ResolvedIdentity::Failed(err),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Decide whether `identity` may pass `policy`.
///
/// Returns the claims to forward downstream (`None` for anonymous passage).
/// The mapping of failures is deliberate and user-visible:
///
/// - no credential on a protected route: 401, "no valid authorization token
///   provided"
/// - expired token: 401, "token expired"
/// - invalid or malformed token: 401, "invalid token"
/// - role not in the route's allow-list: 403, "insufficient permissions"
/// - plan tier below the route's gate: 402 with the required plan named
///
/// Optional-auth routes attach claims when verification succeeded and
/// otherwise continue anonymously; they never deny.
pub fn authorize(
    identity: &ResolvedIdentity,
    policy: &RoutePolicy,
    descriptor: &RequestDescriptor,
) -> GatewayResult<Option<Claims>> {
    match policy.auth {
        AuthMode::Public => Ok(None),
        AuthMode::Optional => match identity {
            ResolvedIdentity::Verified(claims) => Ok(Some(claims.clone())),
            ResolvedIdentity::Anonymous => Ok(None),
            ResolvedIdentity::Failed(reason) => {
                debug!(
                    request_id = %descriptor.request_id,
                    path = %descriptor.path,
                    %reason,
                    "optional auth failed, continuing anonymously"
                );
                Ok(None)
            }
        },
        AuthMode::Required => {
            let claims = match identity {
                ResolvedIdentity::Verified(claims) => claims,
                ResolvedIdentity::Anonymous => {
                    return Err(deny(
                        descriptor,
                        GatewayError::unauthorized("no valid authorization token provided"),
                    ));
                }
                ResolvedIdentity::Failed(VerifyError::Expired) => {
                    return Err(deny(descriptor, GatewayError::unauthorized("token expired")));
                }
                ResolvedIdentity::Failed(_) => {
                    return Err(deny(descriptor, GatewayError::unauthorized("invalid token")));
                }
            };

            if !policy.role_allowed(claims.role) {
                return Err(deny(
                    descriptor,
                    GatewayError::forbidden("insufficient permissions"),
                ));
            }

            if !policy.plan_satisfied(claims.plan) {
                let required = policy.min_plan().unwrap_or(Plan::Free);
                return Err(deny(
                    descriptor,
                    GatewayError::plan_upgrade_required(required),
                ));
            }

            Ok(Some(claims.clone()))
        }
    }
}

fn deny(descriptor: &RequestDescriptor, error: GatewayError) -> GatewayError {
    warn!(
        request_id = %descriptor.request_id,
        method = %descriptor.method,
        path = %descriptor.path,
        client = %descriptor.client_addr,
        %error,
        "request denied"
    );
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use axum::http::{HeaderValue, Method, Uri};
    use chrono::Duration;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "gate-test-secret";

    fn claims(role: Role, plan: Plan) -> Claims {
        let now = Utc::now();
        Claims {
            sub: "user-42".to_string(),
            email: "member@example.com".to_string(),
            role,
            plan,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        }
    }

    fn descriptor() -> RequestDescriptor {
        let uri: Uri = "/api/content/posts".parse().unwrap();
        RequestDescriptor::new(Method::GET, &uri, "203.0.113.9:4711".parse().unwrap())
    }

    fn mint(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn public_route_admits_anonymous_callers() {
        let policy = RoutePolicy::new("/api/auth", "auth").auth(AuthMode::Public);
        let admitted = authorize(&ResolvedIdentity::Anonymous, &policy, &descriptor()).unwrap();
        assert!(admitted.is_none());
    }

    #[test]
    fn protected_route_rejects_missing_credentials() {
        let policy = RoutePolicy::new("/api/content", "content");
        let err = authorize(&ResolvedIdentity::Anonymous, &policy, &descriptor()).unwrap_err();

        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "no valid authorization token provided");
    }

    #[test]
    fn expired_and_invalid_tokens_get_distinct_messages() {
        let policy = RoutePolicy::new("/api/content", "content");
        let desc = descriptor();

        let expired = authorize(
            &ResolvedIdentity::Failed(VerifyError::Expired),
            &policy,
            &desc,
        )
        .unwrap_err();
        assert_eq!(expired.to_string(), "token expired");

        let forged = authorize(
            &ResolvedIdentity::Failed(VerifyError::InvalidSignature),
            &policy,
            &desc,
        )
        .unwrap_err();
        assert_eq!(forged.to_string(), "invalid token");

        let mangled = authorize(
            &ResolvedIdentity::Failed(VerifyError::Malformed),
            &policy,
            &desc,
        )
        .unwrap_err();
        assert_eq!(mangled.to_string(), "invalid token");

        for err in [&expired, &forged, &mangled] {
            assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn verified_caller_passes_and_claims_flow_through() {
        let policy = RoutePolicy::new("/api/content", "content");
        let identity = ResolvedIdentity::Verified(claims(Role::User, Plan::Free));

        let admitted = authorize(&identity, &policy, &descriptor()).unwrap();
        assert_eq!(admitted.unwrap().sub, "user-42");
    }

    #[test]
    fn role_gate_is_exact_membership() {
        let policy = RoutePolicy::new("/api/analytics", "analytics").roles([Role::Admin]);
        let desc = descriptor();

        let user = ResolvedIdentity::Verified(claims(Role::User, Plan::Enterprise));
        let err = authorize(&user, &policy, &desc).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "insufficient permissions");

        let admin = ResolvedIdentity::Verified(claims(Role::Admin, Plan::Free));
        assert!(authorize(&admin, &policy, &desc).unwrap().is_some());
    }

    #[test]
    fn plan_gate_admits_equal_or_higher_tiers() {
        let policy = RoutePolicy::new("/api/ai", "ai").plans([Plan::Professional]);
        let desc = descriptor();

        let free = ResolvedIdentity::Verified(claims(Role::User, Plan::Free));
        let err = authorize(&free, &policy, &desc).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.error_code(), "plan_upgrade_required");
        assert_eq!(
            err.to_string(),
            "this feature requires the professional plan or higher"
        );

        for plan in [Plan::Professional, Plan::Enterprise] {
            let identity = ResolvedIdentity::Verified(claims(Role::User, plan));
            assert!(authorize(&identity, &policy, &desc).unwrap().is_some());
        }
    }

    #[test]
    fn optional_route_attaches_claims_but_never_denies() {
        let policy = RoutePolicy::new("/api/content", "content").auth(AuthMode::Optional);
        let desc = descriptor();

        let verified = ResolvedIdentity::Verified(claims(Role::User, Plan::Free));
        assert!(authorize(&verified, &policy, &desc).unwrap().is_some());

        assert!(authorize(&ResolvedIdentity::Anonymous, &policy, &desc)
            .unwrap()
            .is_none());

        for failure in [
            VerifyError::Expired,
            VerifyError::InvalidSignature,
            VerifyError::Malformed,
        ] {
            let identity = ResolvedIdentity::Failed(failure);
            assert!(authorize(&identity, &policy, &desc).unwrap().is_none());
        }
    }

    #[test]
    fn identity_resolution_distinguishes_absent_and_broken_credentials() {
        let verifier = TokenVerifier::new(SECRET);
        let now = Utc::now();

        let empty = HeaderMap::new();
        assert!(matches!(
            resolve_identity(&empty, &verifier, now),
            ResolvedIdentity::Anonymous
        ));

        let mut basic = HeaderMap::new();
        basic.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwdw=="),
        );
        assert!(matches!(
            resolve_identity(&basic, &verifier, now),
            ResolvedIdentity::Anonymous
        ));

        let mut garbage = HeaderMap::new();
        garbage.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer not-a-token"),
        );
        assert!(matches!(
            resolve_identity(&garbage, &verifier, now),
            ResolvedIdentity::Failed(VerifyError::Malformed)
        ));

        let token = mint(&claims(Role::User, Plan::Professional));
        let mut valid = HeaderMap::new();
        valid.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        let resolved = resolve_identity(&valid, &verifier, now);
        assert_eq!(resolved.subject(), Some("user-42"));
    }
}
