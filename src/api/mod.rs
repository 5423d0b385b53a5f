//! API module - HTTP routes and handlers

pub mod handlers;
pub mod openapi;

use actix_web::web;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;

/// Configure all API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(configure_authz)
        .configure(configure_metering)
        .configure(configure_management)
        .route("/health", web::get().to(handlers::health::health_check))
        // Swagger UI and OpenAPI spec
        .service(
            SwaggerUi::new("/swagger-ui/{_:.*}")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
        );
}

/// External authorization check, any method and any tail path
pub fn configure_authz(cfg: &mut web::ServiceConfig) {
    cfg.route("/auth", web::route().to(handlers::authz::check))
        .route("/auth/{tail:.*}", web::route().to(handlers::authz::check));
}

/// Access-log stream from the proxy
pub fn configure_metering(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/access-logs", web::post().to(handlers::ingest::access_logs));
}

/// Credential management and billing read-side
pub fn configure_management(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/keys")
                    .route("", web::post().to(handlers::keys::create_key))
                    .route("/{user_id}", web::get().to(handlers::keys::list_keys))
                    .route("/{id}", web::delete().to(handlers::keys::revoke_key))
            )
            .route("/billing/{credential_id}", web::get().to(handlers::billing::get_billing))
    );
}
