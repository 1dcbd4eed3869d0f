//! Operations handlers
//!
//! Sweep control, cache maintenance and live call counters for operators.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;
use talktime_core::AppError;
use tracing::{info, instrument};

use crate::dto::{
    validate, ApiResponse, CallActivityResponse, EffectUsersResponse, HealthResponse, HistoryQuery,
};
use crate::state::AppState;

/// GET /api/v1/health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// Run an expiry sweep now
///
/// POST /api/v1/operations/sweep
#[instrument(skip(state))]
pub async fn run_sweep(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let report = state.sweeper.sweep().await?;
    info!(
        "Manual sweep moved {} of {} entitlements",
        report.moved_to_history, report.processed
    );
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// GET /api/v1/operations/sweep/preview
#[instrument(skip(state))]
pub async fn preview_sweep(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let preview = state.sweeper.preview().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(preview)))
}

/// GET /api/v1/operations/sweep/statistics
#[instrument(skip(state))]
pub async fn sweep_statistics(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stats = state.sweeper.statistics().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

/// Migrated entitlements, optionally for one user
///
/// GET /api/v1/operations/sweep/history?user_id=
#[instrument(skip(state))]
pub async fn sweep_history(
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    validate(&*query)?;

    let history = match query.user_id {
        Some(user_id) => state.sweeper.history_for_user(user_id).await?,
        None => state.sweeper.all_history().await?,
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success(history)))
}

/// POST /api/v1/operations/cache/clear
#[instrument(skip(state))]
pub async fn clear_cache(state: web::Data<AppState>) -> HttpResponse {
    state.resolver.clear_cache();
    HttpResponse::Ok().json(ApiResponse::with_message(
        json!({ "cached": state.resolver.is_cached() }),
        "Entitlement cache cleared",
    ))
}

/// GET /api/v1/operations/entitlements/statistics
#[instrument(skip(state))]
pub async fn entitlement_statistics(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stats = state.resolver.access_statistics().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

/// Holders of an active grant for one effect
///
/// GET /api/v1/operations/effects/{code}/users
#[instrument(skip(state))]
pub async fn effect_users(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let effect_code = path.into_inner();
    let user_ids = state.resolver.users_for_effect(&effect_code).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(EffectUsersResponse {
        effect_code,
        user_ids,
    })))
}

/// GET /api/v1/operations/calls
pub async fn call_activity(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(CallActivityResponse {
        active_sessions: state.engine.active_session_count(),
        active_bridges: state.engine.active_bridge_count(),
        bridges: state.engine.active_bridges(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/operations")
            .route("/sweep", web::post().to(run_sweep))
            .route("/sweep/preview", web::get().to(preview_sweep))
            .route("/sweep/statistics", web::get().to(sweep_statistics))
            .route("/sweep/history", web::get().to(sweep_history))
            .route("/cache/clear", web::post().to(clear_cache))
            .route(
                "/entitlements/statistics",
                web::get().to(entitlement_statistics),
            )
            .route("/effects/{code}/users", web::get().to(effect_users))
            .route("/calls", web::get().to(call_activity)),
    );
}
