//! Authorization & rate-limit decisions
//!
//! Resolves a bearer credential to an identity, charges both quota windows
//! and answers Allow, Deny or RateLimited. Every failure of the stores fails
//! closed.

pub mod hashing;
pub mod engine;

pub use hashing::CredentialHasher;
pub use engine::{parse_bearer, AuthEngine, Decision, Identity};

/// Header carrying the owning account on Allow
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the credential id on Allow; the metering pipeline attributes usage by it
pub const API_KEY_ID_HEADER: &str = "x-api-key-id";
/// Decision class for observability
pub const CHECK_RESULT_HEADER: &str = "x-ext-authz-check-result";
