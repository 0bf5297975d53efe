//! `crewbook-approvals` — approval requests and their status state machine.
//!
//! Pure domain: no IO. Stores and services live in `crewbook-infra`.

pub mod filter;
pub mod kind;
pub mod policy;
pub mod request;
pub mod status;

pub use filter::ApprovalFilter;
pub use kind::{ApprovalKind, ApprovalTarget};
pub use policy::{status_after_vote, ApprovalPolicy, EffectOutcome};
pub use request::{ApprovalDecision, ApprovalRequest, Decision, NewApprovalRequest};
pub use status::ApprovalStatus;
