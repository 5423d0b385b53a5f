//! Credential management handlers
//!
//! Provisioning, listing and revocation of API keys. The plaintext key is
//! only ever returned by the create call.

use actix_web::{http::StatusCode, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{error_response, ErrorResponse};
use crate::db::{Credential, CredentialRepository, NewCredential};

/// Request to create a new API key
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateKeyRequest {
    pub user_id: String,
    pub name: String,
    /// Defaults to 1000
    #[serde(default)]
    pub rate_limit_per_minute: Option<i32>,
    /// Defaults to 100000
    #[serde(default)]
    pub rate_limit_per_day: Option<i32>,
}

impl CreateKeyRequest {
    fn validate(&self) -> Result<(), &'static str> {
        if self.user_id.trim().is_empty() {
            return Err("user_id must not be empty");
        }
        if self.name.trim().is_empty() {
            return Err("name must not be empty");
        }
        let positive = |limit: Option<i32>| limit.map_or(true, |l| l > 0);
        if !positive(self.rate_limit_per_minute) || !positive(self.rate_limit_per_day) {
            return Err("rate limits must be positive");
        }
        Ok(())
    }
}

/// Response after creating a new API key
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateKeyResponse {
    pub key: Credential,
    /// Only shown once!
    pub plain_key: String,
    pub message: &'static str,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListKeysResponse {
    pub keys: Vec<Credential>,
    pub count: usize,
}

/// POST /api/keys - Provision a new API key
#[utoipa::path(
    post,
    path = "/api/keys",
    tag = "keys",
    request_body = CreateKeyRequest,
    responses(
        (status = 201, description = "Key created", body = CreateKeyResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    )
)]
pub async fn create_key(
    repo: web::Data<CredentialRepository>,
    body: web::Json<CreateKeyRequest>,
) -> HttpResponse {
    if let Err(message) = body.validate() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request", message);
    }

    let body = body.into_inner();
    let request = NewCredential {
        user_id: body.user_id,
        name: body.name,
        rate_limit_per_minute: body.rate_limit_per_minute,
        rate_limit_per_day: body.rate_limit_per_day,
    };

    match repo.create(request).await {
        Ok(provisioned) => {
            info!(
                key_id = %provisioned.credential.id,
                user_id = %provisioned.credential.user_id,
                "API key created"
            );
            HttpResponse::Created().json(CreateKeyResponse {
                key: provisioned.credential,
                plain_key: provisioned.plain_key,
                message: "Save the plain_key value - it won't be shown again!",
            })
        }
        Err(e) => {
            warn!(error = %e, "Failed to create API key");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Failed to create API key")
        }
    }
}

/// GET /api/keys/{user_id} - Active keys of one account
#[utoipa::path(
    get,
    path = "/api/keys/{user_id}",
    tag = "keys",
    params(("user_id" = String, Path, description = "Owning account")),
    responses(
        (status = 200, description = "Active keys", body = ListKeysResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    )
)]
pub async fn list_keys(
    repo: web::Data<CredentialRepository>,
    path: web::Path<String>,
) -> HttpResponse {
    let user_id = path.into_inner();
    match repo.list_active_by_user(&user_id).await {
        Ok(keys) => {
            let count = keys.len();
            HttpResponse::Ok().json(ListKeysResponse { keys, count })
        }
        Err(e) => {
            warn!(error = %e, user_id = %user_id, "Failed to list API keys");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Failed to list API keys")
        }
    }
}

/// DELETE /api/keys/{id} - Revoke a key
///
/// Takes effect on the next authorization check for that key.
#[utoipa::path(
    delete,
    path = "/api/keys/{id}",
    tag = "keys",
    params(("id" = Uuid, Path, description = "Key id")),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 404, description = "No active key with that id", body = ErrorResponse),
        (status = 500, description = "Database error", body = ErrorResponse)
    )
)]
pub async fn revoke_key(
    repo: web::Data<CredentialRepository>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let id = path.into_inner();
    match repo.revoke(id).await {
        Ok(true) => {
            info!(key_id = %id, "API key revoked");
            HttpResponse::NoContent().finish()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "not_found", format!("No active API key {}", id)),
        Err(e) => {
            warn!(error = %e, key_id = %id, "Failed to revoke API key");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Failed to revoke API key")
        }
    }
}
