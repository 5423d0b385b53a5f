//! OpenAPI 3.0 specification definition

use utoipa::OpenApi;

use crate::api::handlers::{
    billing::BillingSummaryResponse,
    health::HealthResponse,
    keys::{CreateKeyRequest, CreateKeyResponse, ListKeysResponse},
    ErrorResponse,
};
use crate::db::models::{BillingPeriodTotal, Credential};
use crate::metering::{IngestSummary, PipelineStatsSnapshot};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Keymeter API",
        version = "1.0.0",
        description = "API key authorization, rate limiting and usage metering for a proxy gateway"
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "authz", description = "External authorization check called by the proxy"),
        (name = "metering", description = "Access-log stream from the proxy"),
        (name = "keys", description = "API key management"),
        (name = "billing", description = "Billing totals")
    ),
    paths(
        crate::api::handlers::health::health_check,
        crate::api::handlers::authz::check,
        crate::api::handlers::ingest::access_logs,
        crate::api::handlers::keys::create_key,
        crate::api::handlers::keys::list_keys,
        crate::api::handlers::keys::revoke_key,
        crate::api::handlers::billing::get_billing,
    ),
    components(
        schemas(
            HealthResponse,
            PipelineStatsSnapshot,
            IngestSummary,
            ErrorResponse,
            CreateKeyRequest,
            CreateKeyResponse,
            ListKeysResponse,
            Credential,
            BillingSummaryResponse,
            BillingPeriodTotal,
        )
    )
)]
pub struct ApiDoc;
