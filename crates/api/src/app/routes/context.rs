use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use crate::app::dto::{ContextResponse, SetContextRequest};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::context::ProfileContext;

pub fn router() -> Router {
    Router::new().route("/", get(get_context).put(set_context).delete(clear_context))
}

pub async fn get_context(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
) -> ApiResult {
    let profile_id = profile.profile_id();
    let memberships = services.resolver.memberships(profile_id).await?;
    let active_context = services.resolver.active_context(profile_id).await?;
    Ok(Json(ContextResponse {
        memberships,
        active_context,
    })
    .into_response())
}

pub async fn set_context(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    body: Result<Json<SetContextRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let (company_id, role) = body.parse()?;
    let context = services
        .resolver
        .set_active_context(profile.profile_id(), company_id, role, Utc::now())
        .await?;
    Ok(Json(context).into_response())
}

pub async fn clear_context(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
) -> ApiResult {
    services.resolver.clear_active_context(profile.profile_id()).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
