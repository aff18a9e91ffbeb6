//! # Configuration
//!
//! Layered configuration for the gateway: built-in defaults, an optional
//! YAML file, then `GATEWAY_*` environment overrides, validated once at
//! startup. The loaded value is immutable for the process lifetime, so
//! route policies and backend addresses are read without locking everywhere
//! else.
//!
//! The file path comes from `GATEWAY_CONFIG_PATH` (default
//! `config/gateway.yaml`); an absent file is not an error, the defaults
//! describe a complete local development setup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{AuthMode, Environment, RoutePolicy};

/// Default location of the YAML file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and deployment settings
    pub server: ServerConfig,

    /// Token verification settings
    pub auth: AuthConfig,

    /// Fixed-window rate limiting settings
    pub rate_limit: RateLimitConfig,

    /// Upstream forwarding settings and the service address map
    pub proxy: ProxyConfig,

    /// Cross-origin policy
    pub cors: CorsConfig,

    /// Route table; dispatch is decided by longest prefix, not order
    pub routes: Vec<RoutePolicy>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            cors: CorsConfig::default(),
            routes: default_routes(),
        }
    }
}

impl GatewayConfig {
    /// Startup entry point: file (path from `GATEWAY_CONFIG_PATH`), then
    /// environment overrides, then validation.
    pub async fn load() -> GatewayResult<Self> {
        let path =
            env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::read_file(Path::new(&path)).await?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the file at `path` without consulting the
    /// environment. [`Self::load`] is the startup path; this one exists for
    /// tools and tests that need deterministic inputs.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let config = Self::read_file(path.as_ref()).await?;
        config.validate()?;
        Ok(config)
    }

    async fn read_file(path: &Path) -> GatewayResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_yaml::from_str(&content).map_err(|e| {
                GatewayError::config(format!("failed to parse {}: {}", path.display(), e))
            }),
            // Absent file means built-in defaults, not a startup failure
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(GatewayError::config(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Apply `GATEWAY_*` environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        if let Ok(port) = env::var("GATEWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("invalid GATEWAY_PORT: {}", e)))?;
        }

        if let Ok(addr) = env::var("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(mode) = env::var("GATEWAY_ENVIRONMENT") {
            self.server.environment = mode.parse().map_err(|e| {
                GatewayError::config(format!("invalid GATEWAY_ENVIRONMENT: {}", e))
            })?;
        }

        if let Ok(size) = env::var("GATEWAY_MAX_BODY_SIZE") {
            self.server.max_body_size = size.parse().map_err(|e| {
                GatewayError::config(format!("invalid GATEWAY_MAX_BODY_SIZE: {}", e))
            })?;
        }

        if let Ok(grace) = env::var("GATEWAY_SHUTDOWN_GRACE") {
            self.server.shutdown_grace = humantime::parse_duration(&grace).map_err(|e| {
                GatewayError::config(format!("invalid GATEWAY_SHUTDOWN_GRACE: {}", e))
            })?;
        }

        if let Ok(secret) = env::var("GATEWAY_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Ok(window) = env::var("GATEWAY_RATE_LIMIT_WINDOW") {
            self.rate_limit.window = humantime::parse_duration(&window).map_err(|e| {
                GatewayError::config(format!("invalid GATEWAY_RATE_LIMIT_WINDOW: {}", e))
            })?;
        }

        if let Ok(max) = env::var("GATEWAY_RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = max.parse().map_err(|e| {
                GatewayError::config(format!("invalid GATEWAY_RATE_LIMIT_MAX: {}", e))
            })?;
        }

        if let Ok(timeout) = env::var("GATEWAY_UPSTREAM_TIMEOUT") {
            self.proxy.upstream_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("invalid GATEWAY_UPSTREAM_TIMEOUT: {}", e))
            })?;
        }

        if let Ok(origins) = env::var("GATEWAY_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }

        for (var, service) in SERVICE_URL_ENV_VARS {
            if let Ok(addr) = env::var(var) {
                self.proxy.services.insert(service.to_string(), addr);
            }
        }

        Ok(())
    }

    /// Validate the assembled configuration, collecting every violation
    /// into one error so operators fix them in a single pass.
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        }

        if self.server.max_body_size == 0 {
            errors.push("server.max_body_size must be greater than 0".to_string());
        }

        if self.auth.jwt_secret.is_empty() && !self.server.environment.is_development() {
            errors.push("auth.jwt_secret cannot be empty outside development".to_string());
        }

        if self.rate_limit.max_requests == 0 {
            errors.push("rate_limit.max_requests must be greater than 0".to_string());
        }

        if self.rate_limit.window.is_zero() {
            errors.push("rate_limit.window must be greater than 0".to_string());
        }

        if self.proxy.upstream_timeout.is_zero() {
            errors.push("proxy.upstream_timeout must be greater than 0".to_string());
        }

        if self.routes.is_empty() {
            errors.push("route table cannot be empty".to_string());
        }

        let mut seen_prefixes = HashSet::new();
        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                errors.push(format!(
                    "route prefix '{}' must start with '/'",
                    route.prefix
                ));
            }

            if route.prefix.len() > 1 && route.prefix.ends_with('/') {
                errors.push(format!(
                    "route prefix '{}' must not end with '/'",
                    route.prefix
                ));
            }

            if !seen_prefixes.insert(route.prefix.as_str()) {
                errors.push(format!("route prefix '{}' is declared twice", route.prefix));
            }

            match self.proxy.services.get(&route.service) {
                None => errors.push(format!(
                    "route '{}' references unknown service '{}'",
                    route.prefix, route.service
                )),
                Some(addr) => match Url::parse(addr) {
                    Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
                    Ok(url) => errors.push(format!(
                        "service '{}' address '{}' has unsupported scheme '{}'",
                        route.service,
                        addr,
                        url.scheme()
                    )),
                    Err(e) => errors.push(format!(
                        "service '{}' address '{}' is not a valid URL: {}",
                        route.service, addr, e
                    )),
                },
            }
        }

        for origin in &self.cors.allowed_origins {
            if origin != "*" && Url::parse(origin).is_err() {
                errors.push(format!("cors origin '{}' is not a valid URL", origin));
            }
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Address string the listener binds, `bind_address:port`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}

/// Listener and deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port
    pub port: u16,

    /// Listen address
    pub bind_address: String,

    /// Deployment mode; controls error-body detail and default log format
    pub environment: Environment,

    /// Maximum accepted request body size in bytes
    pub max_body_size: usize,

    /// How long draining waits for in-flight requests before giving up
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            environment: Environment::Development,
            max_body_size: 10 * 1024 * 1024,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Token verification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret the token issuer signs with. May stay empty in
    /// development (every protected route then denies), never in production.
    pub jwt_secret: String,
}

/// Fixed-window rate limiting settings, applied per client identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests per client per window
    pub max_requests: u32,

    /// Fixed window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Upstream forwarding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Deadline for one upstream request; expiry maps to 502
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Service name to base address map consumed by the route table
    pub services: HashMap<String, String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(30),
            services: default_services(),
        }
    }
}

/// Cross-origin policy. `*` anywhere in the list means permissive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Environment variable to service-map key, one per product backend.
const SERVICE_URL_ENV_VARS: [(&str, &str); 6] = [
    ("GATEWAY_AUTH_SERVICE_URL", "auth"),
    ("GATEWAY_USER_SERVICE_URL", "users"),
    ("GATEWAY_CONTENT_SERVICE_URL", "content"),
    ("GATEWAY_AI_SERVICE_URL", "ai"),
    ("GATEWAY_ANALYTICS_SERVICE_URL", "analytics"),
    ("GATEWAY_NOTIFICATION_SERVICE_URL", "notifications"),
];

fn default_services() -> HashMap<String, String> {
    [
        ("auth", "http://localhost:5001"),
        ("users", "http://localhost:5002"),
        ("content", "http://localhost:5003"),
        ("ai", "http://localhost:5004"),
        ("analytics", "http://localhost:5005"),
        ("notifications", "http://localhost:5006"),
    ]
    .into_iter()
    .map(|(name, addr)| (name.to_string(), addr.to_string()))
    .collect()
}

/// The product's ingress surface: auth endpoints are public, everything
/// else requires a verified token; role/plan forwarding follows what each
/// backend consumes.
fn default_routes() -> Vec<RoutePolicy> {
    vec![
        RoutePolicy::new("/api/auth", "auth").auth(AuthMode::Public),
        RoutePolicy::new("/api/content", "content")
            .forward_role()
            .forward_plan(),
        RoutePolicy::new("/api/ai", "ai").forward_plan(),
        RoutePolicy::new("/api/users", "users").forward_role(),
        RoutePolicy::new("/api/analytics", "analytics").forward_role(),
        RoutePolicy::new("/api/notifications", "notifications"),
    ]
}
