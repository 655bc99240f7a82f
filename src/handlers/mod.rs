// HTTP request handlers for the passkey service
pub mod passkey;

use actix_web::{HttpResponse, Result};
use serde::Serialize;

pub use passkey::{configure, status_for, PasskeyState};

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: &'static str,
}

/// Health check endpoint
///
/// # Errors
///
/// Returns an error if health status cannot be determined
pub async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION,
    }))
}
