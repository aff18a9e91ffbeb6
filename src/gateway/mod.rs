pub mod lifecycle;
pub mod server;

pub use lifecycle::{GatewayLifecycle, LifecycleState, RequestGuard};
pub use server::{build_gateway, serve, GatewayState};
