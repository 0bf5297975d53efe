use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crewbook_approvals::{ApprovalKind, ApprovalStatus, NewApprovalRequest};
use crewbook_auth::{ActiveContext, Membership, Role};
use crewbook_core::{CompanyId, DomainError, DomainResult, FieldError, Pagination, ProfileId, ValidationReport};
use crewbook_infra::ApprovalQuery;

use crate::app::errors::ApiError;

// -------------------------
// Request DTOs
// -------------------------
//
// Identifiers and enums arrive as strings so a bad value is reported as a
// field-level validation error instead of a JSON rejection.

#[derive(Debug, Deserialize)]
pub struct SetContextRequest {
    pub company_id: String,
    pub role: String,
}

impl SetContextRequest {
    pub fn parse(&self) -> DomainResult<(CompanyId, Role)> {
        let mut report = ValidationReport::new();
        let company_id = report.take("company_id", self.company_id.parse::<CompanyId>());
        let role = report.take("role", self.role.parse::<Role>());
        report.finish()?;
        company_id
            .zip(role)
            .ok_or_else(|| DomainError::internal("context fields missing after validation"))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddEmployeeRequest {
    pub profile_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateApprovalRequest {
    /// Defaults to the caller's active context company.
    pub company_id: Option<String>,
    pub kind: String,
    pub target_ref: String,
    pub reason: Option<String>,
}

impl CreateApprovalRequest {
    /// `active_company` fills in a missing `company_id`.
    pub fn parse(self, active_company: Option<CompanyId>) -> DomainResult<NewApprovalRequest> {
        let mut report = ValidationReport::new();
        let company_id = match self.company_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => report.take("company_id", raw.parse::<CompanyId>()),
            None => {
                if active_company.is_none() {
                    report.push(FieldError::new(
                        "company_id",
                        "required when no active context is set",
                    ));
                }
                active_company
            }
        };
        let kind = report.take("kind", self.kind.parse::<ApprovalKind>());
        report.finish()?;

        let (Some(company_id), Some(kind)) = (company_id, kind) else {
            return Err(DomainError::internal("approval fields missing after validation"));
        };
        Ok(NewApprovalRequest {
            company_id,
            kind,
            target_ref: self.target_ref,
            reason: self.reason,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionRequest {
    pub comment: Option<String>,
}

/// Query string of `GET /approvals`.
#[derive(Debug, Default, Deserialize)]
pub struct ListApprovalsParams {
    pub company_id: Option<String>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub requested_by: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListApprovalsParams {
    pub fn parse(&self) -> DomainResult<ApprovalQuery> {
        let mut report = ValidationReport::new();

        let company_id = parse_optional(&mut report, "company_id", self.company_id.as_deref(), str::parse::<CompanyId>);
        let status = parse_optional(&mut report, "status", self.status.as_deref(), str::parse::<ApprovalStatus>);
        let kind = parse_optional(&mut report, "kind", self.kind.as_deref(), str::parse::<ApprovalKind>);
        let requested_by =
            parse_optional(&mut report, "requested_by", self.requested_by.as_deref(), str::parse::<ProfileId>);
        let created_after = parse_optional(&mut report, "created_after", self.created_after.as_deref(), parse_timestamp);
        let created_before =
            parse_optional(&mut report, "created_before", self.created_before.as_deref(), parse_timestamp);
        let limit = parse_optional(&mut report, "limit", self.limit.as_deref(), |s| parse_count(s, "limit"));
        let offset = parse_optional(&mut report, "offset", self.offset.as_deref(), |s| parse_count(s, "offset"));

        report.finish()?;
        Ok(ApprovalQuery {
            company_id,
            status,
            kind,
            requested_by,
            created_after,
            created_before,
            pagination: Pagination::new(limit, offset),
        })
    }
}

fn parse_optional<T>(
    report: &mut ValidationReport,
    field: &str,
    raw: Option<&str>,
    parse: impl FnOnce(&str) -> DomainResult<T>,
) -> Option<T> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match parse(raw) {
        Ok(v) => Some(v),
        // Report under the query parameter's name, not the parser's.
        Err(DomainError::Validation(errs)) => {
            let message = errs
                .into_iter()
                .next()
                .map(|e| e.message)
                .unwrap_or_else(|| "is invalid".to_string());
            report.push(FieldError::new(field, message));
            None
        }
        Err(e) => {
            report.push(FieldError::new(field, e.to_string()));
            None
        }
    }
}

fn parse_timestamp(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DomainError::validation("timestamp", "must be an RFC 3339 timestamp"))
}

fn parse_count(s: &str, field: &str) -> DomainResult<u32> {
    s.parse::<u32>()
        .map_err(|_| DomainError::validation(field, "must be a non-negative integer"))
}

/// Path segment identifiers: a malformed id is a bad request, not a 404.
pub fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = DomainError>,
{
    raw.parse::<T>()
        .map_err(|_| ApiError::bad_request("invalid_id", format!("'{raw}' is not a valid identifier")))
}

/// Decode an optional JSON body; an empty body means `T::default()`.
pub fn parse_optional_body<T>(body: &[u8]) -> Result<T, ApiError>
where
    T: Default + serde::de::DeserializeOwned,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request("invalid_json", e.to_string()))
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub profile_id: ProfileId,
    pub active_context: Option<ActiveContext>,
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub memberships: Vec<Membership>,
    pub active_context: Option<ActiveContext>,
}
