//! Database module for PostgreSQL connectivity
//!
//! Provides connection pool management and the credential, usage and billing
//! repositories. Each repository implements a store trait so the decision
//! and metering paths can run against test doubles.

pub mod pool;
pub mod models;
pub mod credentials;
pub mod usage;

pub use pool::{DbPool, DbError};
pub use models::{ActiveCredential, BillingPeriodTotal, BillingRecord, Credential, UsageEvent};
pub use credentials::{CredentialRepository, CredentialStore, NewCredential, ProvisionedCredential};
pub use usage::{UsageRepository, UsageStore};
