use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crewbook_core::{DomainError, DomainResult};

/// Approval request status lifecycle.
///
/// ```text
/// pending ─┬─> approved ─┬─> applied
///          │             └─> failed
///          ├─> rejected
///          └─> cancelled
/// ```
///
/// Transitions only move forward and never skip `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Applied,
    Failed,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 6] = [
        ApprovalStatus::Pending,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
        ApprovalStatus::Cancelled,
        ApprovalStatus::Applied,
        ApprovalStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Cancelled => "cancelled",
            ApprovalStatus::Applied => "applied",
            ApprovalStatus::Failed => "failed",
        }
    }

    /// No transition leaves a terminal status.
    ///
    /// `approved` is not terminal here; for kinds without an effect it is
    /// final in practice (see [`crate::ApprovalRequest::is_final`]).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Rejected
                | ApprovalStatus::Cancelled
                | ApprovalStatus::Applied
                | ApprovalStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        use ApprovalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Applied)
                | (Approved, Failed)
        )
    }

    /// The only status `next` can be entered from, if any.
    pub fn source_of(next: ApprovalStatus) -> Option<ApprovalStatus> {
        Self::ALL.into_iter().find(|s| s.can_transition_to(next))
    }

    /// Validate a transition, returning the new status.
    pub fn transition(&self, next: ApprovalStatus) -> DomainResult<ApprovalStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::conflict(format!(
                "cannot move approval request from {self} to {next}"
            )))
        }
    }
}

impl core::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApprovalStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| {
                DomainError::validation(
                    "status",
                    "must be one of: pending, approved, rejected, cancelled, applied, failed",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = ApprovalStatus> {
        prop::sample::select(ApprovalStatus::ALL.to_vec())
    }

    #[test]
    fn pending_fans_out_to_three_decisions() {
        let p = ApprovalStatus::Pending;
        assert!(p.can_transition_to(ApprovalStatus::Approved));
        assert!(p.can_transition_to(ApprovalStatus::Rejected));
        assert!(p.can_transition_to(ApprovalStatus::Cancelled));
        assert!(!p.can_transition_to(ApprovalStatus::Applied));
        assert!(!p.can_transition_to(ApprovalStatus::Failed));
    }

    #[test]
    fn approved_only_resolves_its_effect() {
        let a = ApprovalStatus::Approved;
        assert!(a.can_transition_to(ApprovalStatus::Applied));
        assert!(a.can_transition_to(ApprovalStatus::Failed));
        assert!(!a.can_transition_to(ApprovalStatus::Cancelled));
        assert!(!a.can_transition_to(ApprovalStatus::Rejected));
    }

    #[test]
    fn illegal_transition_is_conflict() {
        let err = ApprovalStatus::Rejected
            .transition(ApprovalStatus::Approved)
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn parse_rejects_unknown_status() {
        assert_eq!("approved".parse::<ApprovalStatus>().unwrap(), ApprovalStatus::Approved);
        assert!("done".parse::<ApprovalStatus>().is_err());
    }

    proptest! {
        /// Property: terminal statuses have no outgoing transitions.
        #[test]
        fn terminal_states_are_sinks(from in any_status(), to in any_status()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        /// Property: no transition ever returns to `pending` or stays in place.
        #[test]
        fn transitions_move_forward(from in any_status(), to in any_status()) {
            if from.can_transition_to(to) {
                prop_assert_ne!(to, ApprovalStatus::Pending);
                prop_assert_ne!(from, to);
            }
        }

        /// Property: every legal transition starts from the one source status.
        #[test]
        fn each_status_has_a_single_source(from in any_status(), to in any_status()) {
            if from.can_transition_to(to) {
                prop_assert_eq!(ApprovalStatus::source_of(to), Some(from));
            }
        }

        /// Property: any walk from `pending` reaches at most one terminal
        /// status and stops there.
        #[test]
        fn walks_reach_at_most_one_terminal(steps in prop::collection::vec(any_status(), 0..12)) {
            let mut current = ApprovalStatus::Pending;
            let mut terminals = Vec::new();
            for next in steps {
                if let Ok(s) = current.transition(next) {
                    current = s;
                    if s.is_terminal() {
                        terminals.push(s);
                    }
                }
            }
            prop_assert!(terminals.len() <= 1);
        }
    }
}
