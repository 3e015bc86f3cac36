//! `tessera-core`: identifiers and error types shared by every service.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, DepartmentId, EmployeeId, ResignationRequestId};
