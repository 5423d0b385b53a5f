//! External authorization check
//!
//! The proxy forwards the original request's headers to `/auth` (any method,
//! any tail path). Only the status and the response headers matter to it.

use actix_web::{http::header, web, HttpRequest, HttpResponse};

use crate::auth::{Decision, API_KEY_ID_HEADER, CHECK_RESULT_HEADER, USER_ID_HEADER};
use crate::AppState;

/// ANY /auth - Authorize one proxied request
#[utoipa::path(
    get,
    path = "/auth",
    tag = "authz",
    params(
        ("Authorization" = String, Header, description = "Bearer <api key>")
    ),
    responses(
        (status = 200, description = "Allowed; identity in x-user-id and x-api-key-id"),
        (status = 403, description = "Missing, unknown or revoked key, or store unavailable"),
        (status = 429, description = "Per-minute or per-day quota exceeded")
    )
)]
pub async fn check(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let decision = state.auth.decide(authorization).await;

    let mut response = match &decision {
        Decision::Allow(identity) => {
            let mut builder = HttpResponse::Ok();
            builder
                .insert_header((USER_ID_HEADER, identity.user_id.as_str()))
                .insert_header((API_KEY_ID_HEADER, identity.api_key_id.to_string()));
            builder
        }
        Decision::Deny => HttpResponse::Forbidden(),
        Decision::RateLimited => HttpResponse::TooManyRequests(),
    };

    response
        .insert_header((CHECK_RESULT_HEADER, decision.check_result()))
        .finish()
}
