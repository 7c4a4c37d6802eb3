//! Caller-facing inputs and outcome reports for engine operations

use forms_types::{
    FamilyId, FieldId, FormId, FormsError, MemberId, SubmissionId, SubmissionStatus,
};
use serde::{Deserialize, Serialize};

/// The entity a caller addresses. A member target carries no family id;
/// the engine resolves the owning family through the registry collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTarget {
    Family(FamilyId),
    Member(MemberId),
}

/// Input to [`WorkflowEngine::save`]: a new submission, or a new version of
/// an existing one when `submission_id` is set.
///
/// [`WorkflowEngine::save`]: crate::WorkflowEngine::save
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<SubmissionId>,
    pub form_id: FormId,
    pub entity: EntityTarget,
    /// Text responses attached to this save, by field.
    #[serde(default)]
    pub responses: Vec<(FieldId, String)>,
    /// Ask for the row to be created directly in `Submitted`. Honored only
    /// when the attached responses already satisfy the required-field gate;
    /// otherwise the row stays a draft.
    #[serde(default)]
    pub submit: bool,
}

impl SubmissionDraft {
    pub fn new(form_id: FormId, entity: EntityTarget) -> Self {
        Self {
            submission_id: None,
            form_id,
            entity,
            responses: Vec::new(),
            submit: false,
        }
    }

    pub fn revising(mut self, submission_id: SubmissionId) -> Self {
        self.submission_id = Some(submission_id);
        self
    }

    pub fn with_response(mut self, field_id: FieldId, value: impl Into<String>) -> Self {
        self.responses.push((field_id, value.into()));
        self
    }

    pub fn submitting(mut self) -> Self {
        self.submit = true;
        self
    }
}

/// Why a principal may not submit against a form right now. Returned by the
/// pre-flight check so callers can refuse before attempting a write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitRefusal {
    /// No such form.
    FormNotFound,
    /// Form inactive or outside its activation window.
    FormClosed,
    /// No live fill-type grant covers the principal.
    NotGranted,
    /// The per-entity submission cap is already reached.
    CapReached { cap: u32 },
}

impl SubmitRefusal {
    /// Translate the refusal into the error a write attempt would raise.
    pub fn into_error(self, form_id: FormId) -> FormsError {
        match self {
            SubmitRefusal::FormNotFound => FormsError::not_found("form", form_id),
            SubmitRefusal::FormClosed => {
                FormsError::Validation("form is not open for submissions".into())
            }
            SubmitRefusal::NotGranted => {
                FormsError::Authorization("no fill assignment covers this principal".into())
            }
            SubmitRefusal::CapReached { cap } => FormsError::Validation(format!(
                "the submission limit of {} for this entity is reached",
                cap
            )),
        }
    }
}

impl std::fmt::Display for SubmitRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitRefusal::FormNotFound => write!(f, "form not found"),
            SubmitRefusal::FormClosed => write!(f, "form is not open for submissions"),
            SubmitRefusal::NotGranted => write!(f, "no fill assignment covers this principal"),
            SubmitRefusal::CapReached { cap } => {
                write!(f, "submission limit of {} reached", cap)
            }
        }
    }
}

/// Outcome of a successful save: the generated identifier and version,
/// plus a user-facing message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaveReceipt {
    pub submission_id: SubmissionId,
    pub version: u32,
    pub status: SubmissionStatus,
    pub message: String,
}

/// A review decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
}

/// Options for duplicating a form.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct DuplicateOptions {
    /// Also re-issue the original's live assignments against the copy.
    #[serde(default)]
    pub include_assignments: bool,
}

/// Per-item outcome of a bulk operation.
#[derive(Clone, Debug)]
pub struct BulkOutcome {
    pub submission_id: SubmissionId,
    pub result: Result<(), FormsError>,
}

/// Report of a bulk operation. One bad item never fails the batch.
#[derive(Clone, Debug, Default)]
pub struct BulkReport {
    pub outcomes: Vec<BulkOutcome>,
}

impl BulkReport {
    pub fn push(&mut self, submission_id: SubmissionId, result: Result<(), FormsError>) {
        self.outcomes.push(BulkOutcome {
            submission_id,
            result,
        });
    }

    pub fn succeeded(&self) -> Vec<SubmissionId> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.submission_id)
            .collect()
    }

    pub fn failed(&self) -> Vec<(SubmissionId, &FormsError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.submission_id, e)))
            .collect()
    }

    pub fn is_all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}
