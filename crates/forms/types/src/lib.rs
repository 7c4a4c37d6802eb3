//! Domain types for the registry forms subsystem
//!
//! This crate defines the shared vocabulary of the form catalog, the
//! assignment directory, the submission store, and the workflow engine:
//!
//! - Field schemas: typed, orderable fields with per-kind option payloads
//! - Form definitions with activation windows and target-entity kinds
//! - Assignments: capability grants to offices or specific users
//! - Versioned submissions and their responses
//! - The error taxonomy every component reports through
//!
//! Types here carry no behaviour beyond their own invariant checks and
//! stamped mutators. Cross-component rules (permission gating, required-field
//! validation, version bumps) live in the engine.

#![deny(unsafe_code)]

mod assignment;
mod context;
mod error;
mod field;
mod form;
mod query;
mod submission;

pub use assignment::{
    Assignment, AssignmentId, AssignmentPurpose, Capabilities, GrantTarget, OfficeTarget,
};
pub use context::{OfficeCode, OfficeKind, OperationContext, UserId};
pub use error::{FormsError, FormsResult};
pub use field::{FieldDefinition, FieldId, FieldKind, FieldOptions, FieldPatch, NewField};
pub use form::{EntityKind, Form, FormId, FormPatch, NewForm};
pub use query::{FormQuery, Page, SubmissionQuery};
pub use submission::{
    EntityRef, FamilyId, MemberId, Response, ResponseValue, StoredFile, Submission, SubmissionId,
    SubmissionStatus,
};
