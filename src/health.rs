//! # Build Info Endpoint
//!
//! Lets load balancers and the orchestration host check the bridge without
//! opening a WebSocket. The answer is fixed for the life of the process; the
//! reported identity comes from `server.service_name` / `server.service_version`
//! because the host's service discovery matches on it.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;

/// The service protocol the host expects: handshake first, then requests.
pub const PROTOCOL: &str = "ServiceWithStartup";

#[derive(Debug, Serialize)]
struct BuildInfo<'a> {
    status: &'static str,
    service: &'a str,
    version: &'a str,
    protocol: &'static str,
}

pub async fn build_info(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(BuildInfo {
        status: "ok",
        service: &state.config.server.service_name,
        version: &state.config.server.service_version,
        protocol: PROTOCOL,
    })
}
