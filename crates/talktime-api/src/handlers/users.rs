//! Per-user handlers

use actix_web::{web, HttpResponse};
use serde_json::json;
use talktime_core::AppError;
use tracing::{info, instrument};

use crate::dto::{validate, ApiResponse, RecentCallsQuery, SetDefaultEffectRequest, UserEffectsResponse};
use crate::state::AppState;

/// Active effects and the default
///
/// GET /api/v1/users/{username}/effects
#[instrument(skip(state))]
pub async fn user_effects(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let username = path.into_inner();

    let effects = state.resolver.active_effects_for(&username).await?;
    let default_effect = state.resolver.default_effect_for(&username).await?;
    let effective_effect = state.resolver.effect_for_call(&username).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(UserEffectsResponse {
        username,
        effects,
        default_effect,
        effective_effect,
    })))
}

/// PUT /api/v1/users/{username}/default-effect
#[instrument(skip(state, req))]
pub async fn set_default_effect(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<SetDefaultEffectRequest>,
) -> Result<HttpResponse, AppError> {
    validate(&*req)?;
    let username = path.into_inner();

    let entitlement = state.resolver.set_default(&username, &req.effect_code).await?;
    info!("Default effect of {} set to {}", username, req.effect_code);

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        entitlement,
        "Default effect updated",
    )))
}

/// DELETE /api/v1/users/{username}/default-effect
#[instrument(skip(state))]
pub async fn clear_default_effect(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let username = path.into_inner();
    let cleared = state.resolver.clear_default(&username).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "cleared": cleared }))))
}

/// GET /api/v1/users/{user_id}/balance
#[instrument(skip(state))]
pub async fn user_balance(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let balance = state.ledger.balance_for(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(balance)))
}

/// Most recent call history rows
///
/// GET /api/v1/users/{user_id}/calls?limit=
#[instrument(skip(state))]
pub async fn user_calls(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<RecentCallsQuery>,
) -> Result<HttpResponse, AppError> {
    validate(&*query)?;
    let calls = state
        .recorder
        .recent_for_user(path.into_inner(), query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(calls)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            .route("/{username}/effects", web::get().to(user_effects))
            .route("/{username}/default-effect", web::put().to(set_default_effect))
            .route(
                "/{username}/default-effect",
                web::delete().to(clear_default_effect),
            )
            .route("/{user_id}/balance", web::get().to(user_balance))
            .route("/{user_id}/calls", web::get().to(user_calls)),
    );
}
