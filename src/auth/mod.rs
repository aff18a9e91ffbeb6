pub mod gate;
pub mod verifier;

pub use gate::{authorize, resolve_identity, ResolvedIdentity};
pub use verifier::{TokenVerifier, VerifyError};
