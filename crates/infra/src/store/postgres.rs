//! Postgres-backed stores.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` unique violation | `Conflict` | duplicate membership, second vote by one approver, second pending request for the same target |
//! | `23503` foreign key violation | `NotFound` | membership for a missing company, context without a backing membership |
//! | any other / pool / network | `Backend` | surfaced as an internal error |
//!
//! ## Concurrency
//!
//! Status changes are conditional updates (`... WHERE status = $source`),
//! with the source status taken from `ApprovalStatus::source_of`.
//! When one request body needs several statements (vote + status change,
//! last-owner check + delete) they share a transaction whose first statement
//! takes the row lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crewbook_approvals::{
    status_after_vote, ApprovalDecision, ApprovalFilter, ApprovalRequest, ApprovalStatus, Decision,
    EffectOutcome,
};
use crewbook_auth::{ActiveContext, Company, Membership, Role};
use crewbook_core::{ApprovalRequestId, CompanyId, DecisionId, Page, Pagination, ProfileId};

use super::{
    ActiveContextStore, ApprovalStore, CompanyStore, MembershipStore, StoreError, StoreResult,
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const REQUEST_COLUMNS: &str = "id, company_id, kind, target_ref, reason, requested_by, status, \
     created_at, decided_at, decided_by, effect_attempted_at, resolved_at, failure_reason";

/// Postgres implementation of every store trait, sharing one pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema. Every statement is idempotent.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    /// `NotFound` if the request is absent, otherwise `Conflict` naming its status.
    async fn explain_miss(&self, id: ApprovalRequestId, expected: ApprovalStatus) -> StoreError {
        match ApprovalStore::get(self, id).await {
            Ok(Some(request)) => StoreError::Conflict(format!(
                "approval request {} is {}, expected {}",
                id, request.status, expected
            )),
            Ok(None) => StoreError::NotFound(format!("approval request {id}")),
            Err(e) => e,
        }
    }
}

#[async_trait::async_trait]
impl CompanyStore for PostgresStore {
    #[instrument(skip_all, fields(company_id = %company.id), err)]
    async fn create_with_owner(&self, company: Company, owner: Membership) -> StoreResult<()> {
        let mut tx = self.begin().await?;

        sqlx::query("INSERT INTO companies (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(company.id.as_uuid())
            .bind(&company.name)
            .bind(company.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_company", e))?;

        insert_membership(&mut tx, &owner).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn get(&self, id: CompanyId) -> StoreResult<Option<Company>> {
        let row = sqlx::query("SELECT id, name, created_at FROM companies WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_company", e))?;
        row.as_ref().map(company_from_row).transpose()
    }

    async fn list_by_ids(&self, ids: &[CompanyId]) -> StoreResult<Vec<Company>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            "SELECT id, name, created_at FROM companies WHERE id = ANY($1) ORDER BY name ASC, id ASC",
        )
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_companies", e))?;
        rows.iter().map(company_from_row).collect()
    }
}

#[async_trait::async_trait]
impl MembershipStore for PostgresStore {
    async fn memberships_for(&self, profile_id: ProfileId) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT profile_id, company_id, role, created_at FROM memberships \
             WHERE profile_id = $1 ORDER BY created_at ASC",
        )
        .bind(profile_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("memberships_for", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn members_of(&self, company_id: CompanyId) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT profile_id, company_id, role, created_at FROM memberships \
             WHERE company_id = $1 ORDER BY role DESC, created_at ASC",
        )
        .bind(company_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("members_of", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn insert(&self, membership: Membership) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        insert_membership(&mut tx, &membership).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn remove(&self, profile_id: ProfileId, company_id: CompanyId, role: Role) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM memberships WHERE profile_id = $1 AND company_id = $2 AND role = $3",
        )
        .bind(profile_id.as_uuid())
        .bind(company_id.as_uuid())
        .bind(role.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("remove_membership", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(profile_id = %profile_id, company_id = %company_id), err)]
    async fn remove_owner_if_not_last(&self, profile_id: ProfileId, company_id: CompanyId) -> StoreResult<bool> {
        let mut tx = self.begin().await?;

        // Company row lock serializes owner removals.
        sqlx::query("SELECT id FROM companies WHERE id = $1 FOR UPDATE")
            .bind(company_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_company", e))?;

        let result = sqlx::query(
            r#"
            DELETE FROM memberships
            WHERE profile_id = $1 AND company_id = $2 AND role = 'owner'
              AND (SELECT COUNT(*) FROM memberships WHERE company_id = $2 AND role = 'owner') > 1
            "#,
        )
        .bind(profile_id.as_uuid())
        .bind(company_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("remove_owner", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl ActiveContextStore for PostgresStore {
    async fn get(&self, profile_id: ProfileId) -> StoreResult<Option<ActiveContext>> {
        let row = sqlx::query(
            "SELECT profile_id, company_id, role, updated_at FROM active_contexts WHERE profile_id = $1",
        )
        .bind(profile_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_active_context", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ActiveContext {
            profile_id: ProfileId::from_uuid(try_get(&row, "profile_id")?),
            company_id: CompanyId::from_uuid(try_get(&row, "company_id")?),
            role: parse_column(&row, "role")?,
            updated_at: try_get(&row, "updated_at")?,
        }))
    }

    async fn upsert(&self, context: ActiveContext) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO active_contexts (profile_id, company_id, role, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (profile_id) DO UPDATE
            SET company_id = EXCLUDED.company_id,
                role = EXCLUDED.role,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(context.profile_id.as_uuid())
        .bind(context.company_id.as_uuid())
        .bind(context.role.as_str())
        .bind(context.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_active_context", e))?;
        Ok(())
    }

    async fn clear(&self, profile_id: ProfileId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM active_contexts WHERE profile_id = $1")
            .bind(profile_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_active_context", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl ApprovalStore for PostgresStore {
    #[instrument(skip_all, fields(approval_id = %request.id, kind = %request.kind), err)]
    async fn insert(&self, request: ApprovalRequest) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_requests (
                id, company_id, kind, target_ref, reason, requested_by, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.company_id.as_uuid())
        .bind(request.kind.as_str())
        .bind(&request.target_ref)
        .bind(request.reason.as_deref())
        .bind(request.requested_by.as_uuid())
        .bind(request.status.as_str())
        .bind(request.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_approval", e))?;
        Ok(())
    }

    async fn get(&self, id: ApprovalRequestId) -> StoreResult<Option<ApprovalRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_requests WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_approval", e))?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn list(&self, filter: &ApprovalFilter, pagination: Pagination) -> StoreResult<Page<ApprovalRequest>> {
        let status_param: Option<&str> = filter.status.map(|s| s.as_str());
        let kind_param: Option<&str> = filter.kind.map(|k| k.as_str());
        let requested_by_param: Option<Uuid> = filter.requested_by.map(|p| *p.as_uuid());

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM approval_requests
            WHERE company_id = $1
                AND ($2::text IS NULL OR status = $2)
                AND ($3::text IS NULL OR kind = $3)
                AND ($4::uuid IS NULL OR requested_by = $4)
                AND ($5::timestamptz IS NULL OR created_at > $5)
                AND ($6::timestamptz IS NULL OR created_at < $6)
            "#,
        )
        .bind(filter.company_id.as_uuid())
        .bind(status_param)
        .bind(kind_param)
        .bind(requested_by_param)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_approvals", e))?;
        let total: i64 = try_get(&count_row, "total")?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM approval_requests
            WHERE company_id = $1
                AND ($2::text IS NULL OR status = $2)
                AND ($3::text IS NULL OR kind = $3)
                AND ($4::uuid IS NULL OR requested_by = $4)
                AND ($5::timestamptz IS NULL OR created_at > $5)
                AND ($6::timestamptz IS NULL OR created_at < $6)
            ORDER BY created_at DESC, id DESC
            LIMIT $7 OFFSET $8
            "#
        ))
        .bind(filter.company_id.as_uuid())
        .bind(status_param)
        .bind(kind_param)
        .bind(requested_by_param)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_approvals", e))?;

        let items = rows.iter().map(request_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok(Page::new(items, u64::try_from(total).unwrap_or(0), pagination))
    }

    #[instrument(
        skip_all,
        fields(approval_id = %decision.request_id, approver_id = %decision.approver_id, decision = %decision.decision),
        err
    )]
    async fn record_decision(&self, decision: ApprovalDecision, required: u32) -> StoreResult<ApprovalRequest> {
        let mut tx = self.begin().await?;

        // Conditional no-op update: takes the row lock only while still pending.
        let locked = sqlx::query(
            "UPDATE approval_requests SET status = status WHERE id = $1 AND status = 'pending' RETURNING id",
        )
        .bind(decision.request_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_pending_approval", e))?;
        if locked.is_none() {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(self.explain_miss(decision.request_id, ApprovalStatus::Pending).await);
        }

        sqlx::query(
            r#"
            INSERT INTO approval_decisions (id, request_id, approver_id, decision, comment, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(decision.id.as_uuid())
        .bind(decision.request_id.as_uuid())
        .bind(decision.approver_id.as_uuid())
        .bind(decision.decision.as_str())
        .bind(decision.comment.as_deref())
        .bind(decision.decided_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_decision", e))?;

        let count_row = sqlx::query(
            "SELECT COUNT(*) AS approvals FROM approval_decisions WHERE request_id = $1 AND decision = 'approve'",
        )
        .bind(decision.request_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("count_approvals", e))?;
        let approvals: i64 = try_get(&count_row, "approvals")?;

        let next = status_after_vote(
            decision.decision,
            u32::try_from(approvals).unwrap_or(u32::MAX),
            required,
        );

        let row = if next == ApprovalStatus::Pending {
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_requests WHERE id = $1"))
                .bind(decision.request_id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("get_approval", e))?
        } else {
            sqlx::query(&format!(
                r#"
                UPDATE approval_requests
                SET status = $2,
                    decided_at = $3,
                    decided_by = $4,
                    resolved_at = CASE WHEN $2 = 'rejected' OR kind = 'sign_off' THEN $3 ELSE resolved_at END
                WHERE id = $1 AND status = $5
                RETURNING {REQUEST_COLUMNS}
                "#
            ))
            .bind(decision.request_id.as_uuid())
            .bind(next.as_str())
            .bind(decision.decided_at)
            .bind(decision.approver_id.as_uuid())
            .bind(source_status(next)?)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("decide_approval", e))?
        };
        let updated = request_from_row(&row)?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(updated)
    }

    async fn cancel(&self, id: ApprovalRequestId, at: DateTime<Utc>) -> StoreResult<ApprovalRequest> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE approval_requests
            SET status = $3, resolved_at = $2
            WHERE id = $1 AND status = $4
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(at)
        .bind(ApprovalStatus::Cancelled.as_str())
        .bind(source_status(ApprovalStatus::Cancelled)?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cancel_approval", e))?;

        match row {
            Some(row) => request_from_row(&row),
            None => Err(self.explain_miss(id, ApprovalStatus::Pending).await),
        }
    }

    async fn claim_effect(&self, id: ApprovalRequestId, at: DateTime<Utc>) -> StoreResult<ApprovalRequest> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE approval_requests
            SET effect_attempted_at = $2
            WHERE id = $1
              AND status = 'approved'
              AND kind <> 'sign_off'
              AND effect_attempted_at IS NULL
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_effect", e))?;

        match row {
            Some(row) => request_from_row(&row),
            None => match ApprovalStore::get(self, id).await? {
                Some(request) => Err(StoreError::Conflict(format!(
                    "approval request {} has no unclaimed effect (status {})",
                    id, request.status
                ))),
                None => Err(StoreError::NotFound(format!("approval request {id}"))),
            },
        }
    }

    async fn resolve_effect(
        &self,
        id: ApprovalRequestId,
        outcome: &EffectOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<ApprovalRequest> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE approval_requests
            SET status = $2, failure_reason = $3, resolved_at = $4
            WHERE id = $1 AND status = $5 AND effect_attempted_at IS NOT NULL
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(outcome.status().as_str())
        .bind(outcome.failure_reason())
        .bind(at)
        .bind(source_status(outcome.status())?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("resolve_effect", e))?;

        match row {
            Some(row) => request_from_row(&row),
            None => Err(self.explain_miss(id, ApprovalStatus::Approved).await),
        }
    }

    async fn decisions(&self, id: ApprovalRequestId) -> StoreResult<Vec<ApprovalDecision>> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_id, approver_id, decision, comment, decided_at
            FROM approval_decisions
            WHERE request_id = $1
            ORDER BY decided_at ASC, id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_decisions", e))?;

        rows.iter()
            .map(|row| {
                Ok(ApprovalDecision {
                    id: DecisionId::from_uuid(try_get(row, "id")?),
                    request_id: ApprovalRequestId::from_uuid(try_get(row, "request_id")?),
                    approver_id: ProfileId::from_uuid(try_get(row, "approver_id")?),
                    decision: parse_column::<Decision>(row, "decision")?,
                    comment: try_get(row, "comment")?,
                    decided_at: try_get(row, "decided_at")?,
                })
            })
            .collect()
    }
}

async fn insert_membership(tx: &mut Transaction<'static, Postgres>, membership: &Membership) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO memberships (profile_id, company_id, role, created_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(membership.profile_id.as_uuid())
    .bind(membership.company_id.as_uuid())
    .bind(membership.role.as_str())
    .bind(membership.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_membership", e))?;
    Ok(())
}

// Row mapping

fn try_get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("failed to read column {column}: {e}")))
}

/// Read a TEXT column holding one of the closed enumerations.
fn parse_column<T>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = try_get(row, column)?;
    raw.parse()
        .map_err(|e| StoreError::Backend(format!("unexpected value '{raw}' in column {column}: {e}")))
}

fn company_from_row(row: &PgRow) -> StoreResult<Company> {
    Ok(Company {
        id: CompanyId::from_uuid(try_get(row, "id")?),
        name: try_get(row, "name")?,
        created_at: try_get(row, "created_at")?,
    })
}

fn membership_from_row(row: &PgRow) -> StoreResult<Membership> {
    Ok(Membership {
        profile_id: ProfileId::from_uuid(try_get(row, "profile_id")?),
        company_id: CompanyId::from_uuid(try_get(row, "company_id")?),
        role: parse_column(row, "role")?,
        created_at: try_get(row, "created_at")?,
    })
}

/// Guard for a conditional status update, read from the status state machine.
fn source_status(next: ApprovalStatus) -> StoreResult<&'static str> {
    ApprovalStatus::source_of(next)
        .map(|s| s.as_str())
        .ok_or_else(|| StoreError::Conflict(format!("no transition leads to {next}")))
}

fn request_from_row(row: &PgRow) -> StoreResult<ApprovalRequest> {
    let decided_by: Option<Uuid> = try_get(row, "decided_by")?;
    Ok(ApprovalRequest {
        id: ApprovalRequestId::from_uuid(try_get(row, "id")?),
        company_id: CompanyId::from_uuid(try_get(row, "company_id")?),
        kind: parse_column(row, "kind")?,
        target_ref: try_get(row, "target_ref")?,
        reason: try_get(row, "reason")?,
        requested_by: ProfileId::from_uuid(try_get(row, "requested_by")?),
        status: parse_column(row, "status")?,
        created_at: try_get(row, "created_at")?,
        decided_at: try_get(row, "decided_at")?,
        decided_by: decided_by.map(ProfileId::from_uuid),
        effect_attempted_at: try_get(row, "effect_attempted_at")?,
        resolved_at: try_get(row, "resolved_at")?,
        failure_reason: try_get(row, "failure_reason")?,
    })
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(format!("referenced row ({operation})")),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row ({operation})")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
