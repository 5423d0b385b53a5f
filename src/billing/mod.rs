//! Billing aggregation and payment provider reporting

pub mod aggregator;
pub mod http_client;
pub mod provider;

pub use aggregator::{billable_counts, billing_period, BillingAggregator, PersistSummary};
pub use http_client::RateLimitedClient;
pub use provider::{LogOnlyProvider, MeterEventsClient, PaymentProvider, ProviderError};
