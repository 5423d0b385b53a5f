//! Request handlers

pub mod authz;
pub mod billing;
pub mod health;
pub mod ingest;
pub mod keys;

use actix_web::{http::StatusCode, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

/// JSON error body shared by the management endpoints
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

pub(crate) fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error,
        message: message.into(),
    })
}
