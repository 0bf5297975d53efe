use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crewbook_approvals::{
    status_after_vote, ApprovalDecision, ApprovalFilter, ApprovalRequest, ApprovalStatus, Decision,
    EffectOutcome,
};
use crewbook_auth::{ActiveContext, Company, Membership, Role};
use crewbook_core::{ApprovalRequestId, CompanyId, Page, Pagination, ProfileId};

use super::{
    ActiveContextStore, ApprovalStore, CompanyStore, MembershipStore, StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct Tenancy {
    companies: HashMap<CompanyId, Company>,
    memberships: Vec<Membership>,
    contexts: HashMap<ProfileId, ActiveContext>,
}

#[derive(Debug, Default)]
struct Approvals {
    requests: HashMap<ApprovalRequestId, ApprovalRequest>,
    decisions: Vec<ApprovalDecision>,
}

/// In-memory store for tests/dev.
///
/// Each lock covers everything one atomic operation touches, so a single
/// write guard gives the same all-or-nothing behavior as a transaction.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tenancy: RwLock<Tenancy>,
    approvals: RwLock<Approvals>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
}

fn request_mut(
    approvals: &mut Approvals,
    id: ApprovalRequestId,
) -> StoreResult<&mut ApprovalRequest> {
    approvals
        .requests
        .get_mut(&id)
        .ok_or_else(|| StoreError::NotFound(format!("approval request {id}")))
}

/// Move `request` to `next` through the checked state machine.
fn advance(request: &mut ApprovalRequest, next: ApprovalStatus) -> StoreResult<()> {
    request.status = request
        .status
        .transition(next)
        .map_err(|e| StoreError::Conflict(e.to_string()))?;
    Ok(())
}

fn not_in_status(request: &ApprovalRequest, expected: ApprovalStatus) -> StoreError {
    StoreError::Conflict(format!(
        "approval request {} is {}, expected {}",
        request.id, request.status, expected
    ))
}

#[async_trait::async_trait]
impl CompanyStore for InMemoryStore {
    async fn create_with_owner(&self, company: Company, owner: Membership) -> StoreResult<()> {
        let mut t = write(&self.tenancy)?;
        if t.companies.contains_key(&company.id) {
            return Err(StoreError::Conflict(format!("company {} already exists", company.id)));
        }
        t.companies.insert(company.id, company);
        t.memberships.push(owner);
        Ok(())
    }

    async fn get(&self, id: CompanyId) -> StoreResult<Option<Company>> {
        Ok(read(&self.tenancy)?.companies.get(&id).cloned())
    }

    async fn list_by_ids(&self, ids: &[CompanyId]) -> StoreResult<Vec<Company>> {
        let t = read(&self.tenancy)?;
        let mut companies: Vec<Company> = ids
            .iter()
            .filter_map(|id| t.companies.get(id).cloned())
            .collect();
        companies.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        companies.dedup_by_key(|c| c.id);
        Ok(companies)
    }
}

#[async_trait::async_trait]
impl MembershipStore for InMemoryStore {
    async fn memberships_for(&self, profile_id: ProfileId) -> StoreResult<Vec<Membership>> {
        let t = read(&self.tenancy)?;
        Ok(t.memberships
            .iter()
            .filter(|m| m.profile_id == profile_id)
            .cloned()
            .collect())
    }

    async fn members_of(&self, company_id: CompanyId) -> StoreResult<Vec<Membership>> {
        let t = read(&self.tenancy)?;
        let mut members: Vec<Membership> = t
            .memberships
            .iter()
            .filter(|m| m.company_id == company_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| (m.role, m.created_at));
        Ok(members)
    }

    async fn insert(&self, membership: Membership) -> StoreResult<()> {
        let mut t = write(&self.tenancy)?;
        if !t.companies.contains_key(&membership.company_id) {
            return Err(StoreError::NotFound(format!("company {}", membership.company_id)));
        }
        if t
            .memberships
            .iter()
            .any(|m| m.is(membership.profile_id, membership.company_id, membership.role))
        {
            return Err(StoreError::Conflict(format!(
                "profile {} is already {} of company {}",
                membership.profile_id, membership.role, membership.company_id
            )));
        }
        t.memberships.push(membership);
        Ok(())
    }

    async fn remove(&self, profile_id: ProfileId, company_id: CompanyId, role: Role) -> StoreResult<bool> {
        let mut t = write(&self.tenancy)?;
        Ok(remove_membership(&mut t, profile_id, company_id, role))
    }

    async fn remove_owner_if_not_last(&self, profile_id: ProfileId, company_id: CompanyId) -> StoreResult<bool> {
        let mut t = write(&self.tenancy)?;
        let owners = t
            .memberships
            .iter()
            .filter(|m| m.company_id == company_id && m.role == Role::Owner)
            .count();
        if owners <= 1 {
            return Ok(false);
        }
        Ok(remove_membership(&mut t, profile_id, company_id, Role::Owner))
    }
}

fn remove_membership(t: &mut Tenancy, profile_id: ProfileId, company_id: CompanyId, role: Role) -> bool {
    let before = t.memberships.len();
    t.memberships.retain(|m| !m.is(profile_id, company_id, role));
    let removed = t.memberships.len() != before;
    if removed
        && t
            .contexts
            .get(&profile_id)
            .is_some_and(|c| c.company_id == company_id && c.role == role)
    {
        t.contexts.remove(&profile_id);
    }
    removed
}

#[async_trait::async_trait]
impl ActiveContextStore for InMemoryStore {
    async fn get(&self, profile_id: ProfileId) -> StoreResult<Option<ActiveContext>> {
        Ok(read(&self.tenancy)?.contexts.get(&profile_id).cloned())
    }

    async fn upsert(&self, context: ActiveContext) -> StoreResult<()> {
        let mut t = write(&self.tenancy)?;
        if !context.is_backed_by(&t.memberships) {
            return Err(StoreError::NotFound(format!(
                "membership ({}, {}, {})",
                context.profile_id, context.company_id, context.role
            )));
        }
        t.contexts.insert(context.profile_id, context);
        Ok(())
    }

    async fn clear(&self, profile_id: ProfileId) -> StoreResult<bool> {
        Ok(write(&self.tenancy)?.contexts.remove(&profile_id).is_some())
    }
}

#[async_trait::async_trait]
impl ApprovalStore for InMemoryStore {
    async fn insert(&self, request: ApprovalRequest) -> StoreResult<()> {
        let mut a = write(&self.approvals)?;
        if a.requests.contains_key(&request.id) {
            return Err(StoreError::Conflict(format!("approval request {} already exists", request.id)));
        }
        let duplicate = request.kind.has_effect()
            && a.requests.values().any(|r| {
                r.is_pending()
                    && r.company_id == request.company_id
                    && r.kind == request.kind
                    && r.target_ref == request.target_ref
            });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "a pending {} request for {} already exists",
                request.kind, request.target_ref
            )));
        }
        a.requests.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: ApprovalRequestId) -> StoreResult<Option<ApprovalRequest>> {
        Ok(read(&self.approvals)?.requests.get(&id).cloned())
    }

    async fn list(&self, filter: &ApprovalFilter, pagination: Pagination) -> StoreResult<Page<ApprovalRequest>> {
        let a = read(&self.approvals)?;
        let mut matching: Vec<ApprovalRequest> = a
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|x, y| y.created_at.cmp(&x.created_at).then(y.id.cmp(&x.id)));
        Ok(Page::slice(matching, pagination))
    }

    async fn record_decision(&self, decision: ApprovalDecision, required: u32) -> StoreResult<ApprovalRequest> {
        let mut guard = write(&self.approvals)?;
        let a = &mut *guard;

        let request = request_mut(a, decision.request_id)?;
        if !request.is_pending() {
            return Err(not_in_status(request, ApprovalStatus::Pending));
        }
        if a
            .decisions
            .iter()
            .any(|d| d.request_id == decision.request_id && d.approver_id == decision.approver_id)
        {
            return Err(StoreError::Conflict(format!(
                "profile {} already decided approval request {}",
                decision.approver_id, decision.request_id
            )));
        }

        let prior_approvals = a
            .decisions
            .iter()
            .filter(|d| d.request_id == decision.request_id && d.decision == Decision::Approve)
            .count();
        let approvals = u32::try_from(prior_approvals).unwrap_or(u32::MAX)
            + u32::from(decision.decision == Decision::Approve);
        let next = status_after_vote(decision.decision, approvals, required);

        let request = request_mut(a, decision.request_id)?;
        if next != ApprovalStatus::Pending {
            advance(request, next)?;
            request.decided_at = Some(decision.decided_at);
            request.decided_by = Some(decision.approver_id);
            if request.is_final() {
                request.resolved_at = Some(decision.decided_at);
            }
        }
        let updated = request.clone();
        a.decisions.push(decision);
        Ok(updated)
    }

    async fn cancel(&self, id: ApprovalRequestId, at: DateTime<Utc>) -> StoreResult<ApprovalRequest> {
        let mut a = write(&self.approvals)?;
        let request = request_mut(&mut a, id)?;
        if !request.is_pending() {
            return Err(not_in_status(request, ApprovalStatus::Pending));
        }
        advance(request, ApprovalStatus::Cancelled)?;
        request.resolved_at = Some(at);
        Ok(request.clone())
    }

    async fn claim_effect(&self, id: ApprovalRequestId, at: DateTime<Utc>) -> StoreResult<ApprovalRequest> {
        let mut a = write(&self.approvals)?;
        let request = request_mut(&mut a, id)?;
        if !request.awaits_effect() {
            return Err(StoreError::Conflict(format!(
                "approval request {} has no unclaimed effect (status {})",
                id, request.status
            )));
        }
        request.effect_attempted_at = Some(at);
        Ok(request.clone())
    }

    async fn resolve_effect(
        &self,
        id: ApprovalRequestId,
        outcome: &EffectOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<ApprovalRequest> {
        let mut a = write(&self.approvals)?;
        let request = request_mut(&mut a, id)?;
        if request.status != ApprovalStatus::Approved || request.effect_attempted_at.is_none() {
            return Err(not_in_status(request, ApprovalStatus::Approved));
        }
        advance(request, outcome.status())?;
        request.failure_reason = outcome.failure_reason().map(str::to_string);
        request.resolved_at = Some(at);
        Ok(request.clone())
    }

    async fn decisions(&self, id: ApprovalRequestId) -> StoreResult<Vec<ApprovalDecision>> {
        let a = read(&self.approvals)?;
        let mut decisions: Vec<ApprovalDecision> = a
            .decisions
            .iter()
            .filter(|d| d.request_id == id)
            .cloned()
            .collect();
        decisions.sort_by_key(|d| d.decided_at);
        Ok(decisions)
    }
}
