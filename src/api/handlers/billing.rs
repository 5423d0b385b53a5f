//! Billing read-side
//!
//! Several flush cycles can write records for the same credential and
//! period; they are summed here rather than merged in the store.

use actix_web::{http::StatusCode, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{error_response, ErrorResponse};
use crate::db::{BillingPeriodTotal, UsageRepository};

const DEFAULT_PERIODS: i64 = 24;
const MAX_PERIODS: i64 = 24 * 31;

#[derive(Debug, Deserialize, IntoParams)]
pub struct BillingQuery {
    /// Number of most recent periods (default 24)
    pub periods: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BillingSummaryResponse {
    pub api_key_id: Uuid,
    pub periods: Vec<BillingPeriodTotal>,
    pub total_usage: i64,
    pub total_amount_cents: i64,
}

/// GET /api/billing/{credential_id} - Per-period billing totals
#[utoipa::path(
    get,
    path = "/api/billing/{credential_id}",
    tag = "billing",
    params(
        ("credential_id" = Uuid, Path, description = "Key id"),
        BillingQuery
    ),
    responses(
        (status = 200, description = "Billing totals, newest period first", body = BillingSummaryResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    )
)]
pub async fn get_billing(
    repo: web::Data<UsageRepository>,
    path: web::Path<Uuid>,
    query: web::Query<BillingQuery>,
) -> HttpResponse {
    let api_key_id = path.into_inner();
    let periods = query.periods.unwrap_or(DEFAULT_PERIODS).clamp(1, MAX_PERIODS);

    match repo.billing_totals(api_key_id, periods).await {
        Ok(periods) => HttpResponse::Ok().json(summarize(api_key_id, periods)),
        Err(e) => {
            warn!(error = %e, key_id = %api_key_id, "Failed to load billing totals");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Failed to load billing totals")
        }
    }
}

fn summarize(api_key_id: Uuid, periods: Vec<BillingPeriodTotal>) -> BillingSummaryResponse {
    BillingSummaryResponse {
        api_key_id,
        total_usage: periods.iter().map(|p| p.usage_count).sum(),
        total_amount_cents: periods.iter().map(|p| p.amount_cents).sum(),
        periods,
    }
}
