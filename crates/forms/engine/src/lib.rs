//! Workflow engine for the registry forms subsystem
//!
//! This crate ties the form catalog, assignment directory, and submission
//! store together behind a single [`WorkflowEngine`]. The engine is the only
//! place where permissions, lifecycle transitions, and cross-component
//! consistency are decided; the component crates stay free of policy.
//!
//! External concerns (audit logging, file storage, and the citizen
//! registry) enter through the traits in [`collaborators`], so the core
//! runs entirely in memory under test.

#![deny(unsafe_code)]

pub mod collaborators;
pub mod engine;
pub mod report;

pub use collaborators::{
    AuditEvent, AuditSink, FamilyRegistry, FileStore, MapFamilyRegistry, MemoryAuditSink,
    MemoryFileStore, NullAuditSink, ALLOWED_UPLOAD_TYPES, MAX_UPLOAD_BYTES,
};
pub use engine::WorkflowEngine;
pub use report::{
    BulkOutcome, BulkReport, DuplicateOptions, EntityTarget, ReviewAction, SaveReceipt,
    SubmissionDraft, SubmitRefusal,
};

pub use forms_catalog::FormCatalog;
pub use forms_directory::{AssignmentDirectory, NewAssignment};
pub use forms_store::SubmissionStore;
pub use forms_types as types;
