use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;

use crewbook_core::{CompanyId, ProfileId};

use crate::app::dto::{self, AddEmployeeRequest, CreateCompanyRequest};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::context::ProfileContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_companies).post(create_company))
        .route("/:id/members", get(list_members))
        .route("/:id/employees", post(add_employee))
        .route("/:id/employees/:profile_id", delete(remove_employee))
}

pub async fn list_companies(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
) -> ApiResult {
    let items = services.directory.companies(profile.profile_id()).await?;
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn create_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    body: Result<Json<CreateCompanyRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let company = services
        .directory
        .create_company(profile.profile_id(), &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(company)).into_response())
}

pub async fn list_members(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let company_id: CompanyId = dto::parse_id(&id)?;
    let items = services.directory.members(profile.profile_id(), company_id).await?;
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn add_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path(id): Path<String>,
    body: Result<Json<AddEmployeeRequest>, JsonRejection>,
) -> ApiResult {
    let company_id: CompanyId = dto::parse_id(&id)?;
    let Json(body) = body?;
    let employee: ProfileId = body.profile_id.parse()?;
    let membership = services
        .directory
        .add_employee(profile.profile_id(), company_id, employee)
        .await?;
    Ok((StatusCode::CREATED, Json(membership)).into_response())
}

pub async fn remove_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(profile): Extension<ProfileContext>,
    Path((id, employee)): Path<(String, String)>,
) -> ApiResult {
    let company_id: CompanyId = dto::parse_id(&id)?;
    let employee: ProfileId = dto::parse_id(&employee)?;
    services
        .directory
        .remove_employee(profile.profile_id(), company_id, employee)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
