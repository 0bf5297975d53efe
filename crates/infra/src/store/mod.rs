//! Persistence seams for companies, memberships, active contexts and approvals.
//!
//! Every trait has an in-memory implementation (tests/dev) and a Postgres
//! implementation. Both enforce the same conditional-update semantics: a
//! status change only happens when the row is still in the expected status,
//! and a zero-row update is reported as [`StoreError::Conflict`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crewbook_approvals::{ApprovalDecision, ApprovalFilter, ApprovalRequest, EffectOutcome};
use crewbook_auth::{ActiveContext, Company, Membership, Role};
use crewbook_core::{ApprovalRequestId, CompanyId, DomainError, Page, Pagination, ProfileId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// Unique violation or a conditional update that matched zero rows.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => DomainError::NotFound(what),
            StoreError::Conflict(msg) => DomainError::Conflict(msg),
            StoreError::Backend(msg) => DomainError::Internal(msg),
        }
    }
}

#[async_trait::async_trait]
pub trait CompanyStore: Send + Sync {
    /// Insert the company and its first owner membership atomically.
    async fn create_with_owner(&self, company: Company, owner: Membership) -> StoreResult<()>;

    async fn get(&self, id: CompanyId) -> StoreResult<Option<Company>>;

    /// Companies among `ids`, ordered by name.
    async fn list_by_ids(&self, ids: &[CompanyId]) -> StoreResult<Vec<Company>>;
}

#[async_trait::async_trait]
pub trait MembershipStore: Send + Sync {
    async fn memberships_for(&self, profile_id: ProfileId) -> StoreResult<Vec<Membership>>;

    async fn members_of(&self, company_id: CompanyId) -> StoreResult<Vec<Membership>>;

    /// `Conflict` when `(profile, company, role)` already exists.
    async fn insert(&self, membership: Membership) -> StoreResult<()>;

    /// Delete one membership, clearing any active context that pointed at it.
    /// Returns whether a row was removed.
    async fn remove(&self, profile_id: ProfileId, company_id: CompanyId, role: Role) -> StoreResult<bool>;

    /// Delete an owner membership only while another owner remains.
    async fn remove_owner_if_not_last(&self, profile_id: ProfileId, company_id: CompanyId) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait ActiveContextStore: Send + Sync {
    async fn get(&self, profile_id: ProfileId) -> StoreResult<Option<ActiveContext>>;

    /// Overwrite the profile's single context record.
    async fn upsert(&self, context: ActiveContext) -> StoreResult<()>;

    async fn clear(&self, profile_id: ProfileId) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait ApprovalStore: Send + Sync {
    /// `Conflict` when an effect-bearing request with the same
    /// `(company, kind, target_ref)` is already pending.
    async fn insert(&self, request: ApprovalRequest) -> StoreResult<()>;

    async fn get(&self, id: ApprovalRequestId) -> StoreResult<Option<ApprovalRequest>>;

    /// Newest first.
    async fn list(&self, filter: &ApprovalFilter, pagination: Pagination) -> StoreResult<Page<ApprovalRequest>>;

    /// Record a vote and move the request out of `pending` when it decides it.
    ///
    /// One atomic operation guarded on `status = 'pending'`. `required` is the
    /// number of distinct approvals that approves the request. A second vote
    /// by the same approver is a `Conflict`.
    async fn record_decision(&self, decision: ApprovalDecision, required: u32) -> StoreResult<ApprovalRequest>;

    /// `pending -> cancelled`.
    async fn cancel(&self, id: ApprovalRequestId, at: DateTime<Utc>) -> StoreResult<ApprovalRequest>;

    /// Claim the single effect attempt of an approved request.
    async fn claim_effect(&self, id: ApprovalRequestId, at: DateTime<Utc>) -> StoreResult<ApprovalRequest>;

    /// `approved -> applied | failed` for a claimed request.
    async fn resolve_effect(
        &self,
        id: ApprovalRequestId,
        outcome: &EffectOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<ApprovalRequest>;

    /// Votes in the order they were cast.
    async fn decisions(&self, id: ApprovalRequestId) -> StoreResult<Vec<ApprovalDecision>>;
}
