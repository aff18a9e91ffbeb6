pub mod forwarder;

pub use forwarder::{build_upstream_headers, Forwarder};
