//! Lifecycle hook handlers
//!
//! Called by the administration surface; each maps 1:1 onto a
//! [`LifecycleHooks`](talktime_services::LifecycleHooks) entry point.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use talktime_core::AppError;
use tracing::instrument;

use crate::dto::{
    validate, ApiResponse, PackagePurchasedRequest, UserRegisteredRequest,
    VoicePurchaseApprovedRequest,
};
use crate::state::AppState;

/// POST /api/v1/hooks/package-purchased
#[instrument(skip(state, req))]
pub async fn package_purchased(
    state: web::Data<AppState>,
    req: web::Json<PackagePurchasedRequest>,
) -> Result<HttpResponse, AppError> {
    validate(&*req)?;
    let balance = state
        .hooks
        .on_package_purchased(req.user_id, req.seconds)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(balance)))
}

/// POST /api/v1/hooks/voice-purchase-approved
#[instrument(skip(state, req))]
pub async fn voice_purchase_approved(
    state: web::Data<AppState>,
    req: web::Json<VoicePurchaseApprovedRequest>,
) -> Result<HttpResponse, AppError> {
    validate(&*req)?;
    let expiry = req.resolve_expiry(Utc::now());
    let entitlement = state
        .hooks
        .on_voice_purchase_approved(req.user_id, req.effect_id, expiry)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(entitlement)))
}

/// POST /api/v1/hooks/user-registered
#[instrument(skip(state, req))]
pub async fn user_registered(
    state: web::Data<AppState>,
    req: web::Json<UserRegisteredRequest>,
) -> Result<HttpResponse, AppError> {
    validate(&*req)?;
    let outcome = state.hooks.on_new_user_registered(req.user_id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(outcome)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/hooks")
            .route("/package-purchased", web::post().to(package_purchased))
            .route(
                "/voice-purchase-approved",
                web::post().to(voice_purchase_approved),
            )
            .route("/user-registered", web::post().to(user_registered)),
    );
}
