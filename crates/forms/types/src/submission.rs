//! Versioned submissions and their responses
//!
//! Each (form, entity) pair owns one append-only chain of submission rows.
//! Version numbers start at 1 and are gapless; exactly one row per chain
//! carries `is_latest`. Rows here expose stamped mutators only; whether a
//! transition is legal is decided by the engine before calling them.

use crate::{FieldId, FormId, OfficeCode, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a submission row (one version).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmissionId(pub u64);

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a family record in the citizen registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FamilyId(pub u64);

impl std::fmt::Display for FamilyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an individual member record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub u64);

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The registry entity a submission is recorded against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    Family(FamilyId),
    /// A member submission also carries its owning family for reporting.
    Member { member: MemberId, family: FamilyId },
}

impl EntityRef {
    pub fn kind(&self) -> crate::EntityKind {
        match self {
            EntityRef::Family(_) => crate::EntityKind::Family,
            EntityRef::Member { .. } => crate::EntityKind::Member,
        }
    }

    pub fn family_id(&self) -> FamilyId {
        match self {
            EntityRef::Family(id) => *id,
            EntityRef::Member { family, .. } => *family,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Family(id) => write!(f, "family {}", id),
            EntityRef::Member { member, .. } => write!(f, "member {}", member),
        }
    }
}

/// Lifecycle state of a submission row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Being filled by the submitting officer.
    #[default]
    Draft,
    /// Handed over for review; no longer editable in place.
    Submitted,
    /// A reviewer has picked it up.
    PendingReview,
    /// Accepted. Terminal.
    Approved,
    /// Returned. Terminal; a later edit appends a new draft version.
    Rejected,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Whether a reviewer may act on a row in this state.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::Submitted | Self::PendingReview)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Draft => write!(f, "draft"),
            SubmissionStatus::Submitted => write!(f, "submitted"),
            SubmissionStatus::PendingReview => write!(f, "pending-review"),
            SubmissionStatus::Approved => write!(f, "approved"),
            SubmissionStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// One version row of a submission chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub form_id: FormId,
    pub entity: EntityRef,
    /// Office the submitting officer acted for.
    pub office_code: OfficeCode,
    pub submitted_by: UserId,
    pub status: SubmissionStatus,
    /// Field count of the form's schema at the time of the last save.
    pub total_fields: u32,
    /// Count of non-empty responses recorded against this row.
    pub completed_fields: u32,
    /// Stamped on the draft → submitted transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    /// 1-based, gapless within the chain.
    pub version: u32,
    /// Exactly one row per chain carries this flag.
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    /// Stamp the draft → submitted transition.
    pub fn mark_submitted(&mut self) {
        self.status = SubmissionStatus::Submitted;
        self.submitted_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Stamp the submitted → pending-review transition.
    pub fn mark_under_review(&mut self, reviewer: UserId) {
        self.status = SubmissionStatus::PendingReview;
        self.reviewed_by = Some(reviewer);
        self.updated_at = Utc::now();
    }

    /// Stamp a terminal review decision.
    pub fn mark_reviewed(&mut self, status: SubmissionStatus, reviewer: UserId, notes: Option<String>) {
        self.status = status;
        self.reviewed_by = Some(reviewer);
        self.reviewed_at = Some(Utc::now());
        self.review_notes = notes;
        self.updated_at = Utc::now();
    }
}

/// Reference returned by the file-storage collaborator. The core keeps only
/// this reference, never raw bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub path: String,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
}

/// Value recorded against one field of a submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseValue {
    Text(String),
    File(StoredFile),
}

impl ResponseValue {
    /// Empty values do not count toward the required-field gate.
    pub fn is_empty(&self) -> bool {
        match self {
            ResponseValue::Text(text) => text.trim().is_empty(),
            ResponseValue::File(_) => false,
        }
    }
}

/// One answer, keyed (submission, field). Upserts replace the value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub submission_id: SubmissionId,
    pub field_id: FieldId,
    pub value: ResponseValue,
    pub updated_at: DateTime<Utc>,
}
