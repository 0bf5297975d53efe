//! `crewbook-core` — shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the error model every layer maps into, and
//! pagination for list queries.

pub mod error;
pub mod id;
pub mod pagination;

pub use error::{DomainError, DomainResult, FieldError, ValidationReport};
pub use id::{ApprovalRequestId, CompanyId, DecisionId, ProfileId};
pub use pagination::{Page, Pagination};
