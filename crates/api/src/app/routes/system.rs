use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::dto::WhoAmIResponse;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::context::ProfileContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
) -> ApiResult {
    let active_context = services.resolver.active_context(profile.profile_id()).await?;
    Ok(Json(WhoAmIResponse {
        profile_id: profile.profile_id(),
        active_context,
    })
    .into_response())
}
