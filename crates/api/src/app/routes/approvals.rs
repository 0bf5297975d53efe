use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crewbook_core::ApprovalRequestId;

use crate::app::dto::{self, CreateApprovalRequest, DecisionRequest, ListApprovalsParams};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::context::ProfileContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_approvals).post(create_approval))
        .route("/:id", get(get_approval))
        .route("/:id/decisions", get(list_decisions))
        .route("/:id/approve", post(approve))
        .route("/:id/reject", post(reject))
        .route("/:id/cancel", post(cancel))
        .route("/:id/apply", post(apply))
}

pub async fn list_approvals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    params: Result<Query<ListApprovalsParams>, QueryRejection>,
) -> ApiResult {
    let Query(params) = params?;
    let query = params.parse()?;
    let page = services.approvals.list(profile.profile_id(), query).await?;
    Ok(Json(page).into_response())
}

pub async fn create_approval(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    body: Result<Json<CreateApprovalRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let active_company = match body.company_id {
        Some(_) => None,
        None => services
            .resolver
            .active_context(profile.profile_id())
            .await?
            .map(|c| c.company_id),
    };
    let input = body.parse(active_company)?;
    let request = services.approvals.create(profile.profile_id(), input).await?;
    Ok((StatusCode::CREATED, Json(request)).into_response())
}

pub async fn get_approval(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: ApprovalRequestId = dto::parse_id(&id)?;
    let request = services.approvals.get(profile.profile_id(), id).await?;
    Ok(Json(request).into_response())
}

pub async fn list_decisions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: ApprovalRequestId = dto::parse_id(&id)?;
    let items = services.approvals.decisions(profile.profile_id(), id).await?;
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn approve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id: ApprovalRequestId = dto::parse_id(&id)?;
    let body: DecisionRequest = dto::parse_optional_body(&body)?;
    let request = services
        .approvals
        .approve(profile.profile_id(), id, body.comment)
        .await?;
    Ok(Json(request).into_response())
}

pub async fn reject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id: ApprovalRequestId = dto::parse_id(&id)?;
    let body: DecisionRequest = dto::parse_optional_body(&body)?;
    let request = services
        .approvals
        .reject(profile.profile_id(), id, body.comment)
        .await?;
    Ok(Json(request).into_response())
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: ApprovalRequestId = dto::parse_id(&id)?;
    let request = services.approvals.cancel(profile.profile_id(), id).await?;
    Ok(Json(request).into_response())
}

/// Runs the effect of an approved request whose effect never started.
pub async fn apply(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id: ApprovalRequestId = dto::parse_id(&id)?;
    let request = services.approvals.apply(profile.profile_id(), id).await?;
    Ok(Json(request).into_response())
}
