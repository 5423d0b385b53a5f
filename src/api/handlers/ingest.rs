//! Access-log stream endpoint

use actix_web::{web, HttpResponse};
use tracing::info;

use crate::metering::{decode_ndjson, IngestSummary};
use crate::AppState;

/// POST /v1/access-logs - Consume one long-lived access-log stream
///
/// The body is newline-delimited JSON, one batch per line. The response is
/// only written once the proxy closes the stream or the service shuts down.
#[utoipa::path(
    post,
    path = "/v1/access-logs",
    tag = "metering",
    request_body(content = String, content_type = "application/x-ndjson",
        description = "One {\"log_entries\": [...]} batch per line"),
    responses(
        (status = 200, description = "Stream consumed", body = IngestSummary)
    )
)]
pub async fn access_logs(payload: web::Payload, state: web::Data<AppState>) -> HttpResponse {
    info!("Access-log stream opened");
    let frames = Box::pin(decode_ndjson(payload));
    let summary = state
        .ingestor
        .consume(frames, state.ingest_shutdown.child_token())
        .await;
    HttpResponse::Ok().json(summary)
}
