//! The workflow engine: every write against forms, grants, and submissions
//!
//! The engine owns the catalog, directory, and store exclusively, composes
//! their answers into operation-level decisions, and is the only component
//! that checks permissions or transition legality. Because all three sit
//! behind `&mut self`, the clear-latest/insert pair of a version bump can
//! never interleave with another writer.

use crate::collaborators::{
    AuditEvent, AuditSink, FamilyRegistry, FileStore, MapFamilyRegistry, MemoryFileStore,
    NullAuditSink,
};
use crate::report::{
    BulkReport, DuplicateOptions, EntityTarget, ReviewAction, SaveReceipt, SubmissionDraft,
    SubmitRefusal,
};
use chrono::Utc;
use forms_catalog::FormCatalog;
use forms_directory::{AssignmentDirectory, NewAssignment};
use forms_store::SubmissionStore;
use forms_types::{
    AssignmentId, EntityKind, EntityRef, FieldId, FieldOptions, FieldPatch, Form, FormId,
    FormPatch, FormQuery, FormsError, FormsResult, NewField, NewForm, OperationContext, Response,
    ResponseValue, Submission, SubmissionId, SubmissionQuery, SubmissionStatus,
};
use std::sync::Arc;

/// Orchestrates the form catalog, assignment directory, and submission
/// store behind one write surface.
pub struct WorkflowEngine {
    catalog: FormCatalog,
    directory: AssignmentDirectory,
    store: SubmissionStore,
    audit: Arc<dyn AuditSink>,
    files: Arc<dyn FileStore>,
    registry: Arc<dyn FamilyRegistry>,
}

impl WorkflowEngine {
    /// Engine with a silent audit sink, in-memory file store, and an empty
    /// family registry.
    pub fn new() -> Self {
        Self {
            catalog: FormCatalog::new(),
            directory: AssignmentDirectory::new(),
            store: SubmissionStore::new(),
            audit: Arc::new(NullAuditSink),
            files: Arc::new(MemoryFileStore::new()),
            registry: Arc::new(MapFamilyRegistry::new()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }

    pub fn with_family_registry(mut self, registry: Arc<dyn FamilyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    // ── Read surface ─────────────────────────────────────────────────

    pub fn catalog(&self) -> &FormCatalog {
        &self.catalog
    }

    pub fn directory(&self) -> &AssignmentDirectory {
        &self.directory
    }

    pub fn store(&self) -> &SubmissionStore {
        &self.store
    }

    pub fn form(&self, id: FormId) -> FormsResult<&Form> {
        self.catalog.get_form(id)
    }

    pub fn list_forms(&self, query: &FormQuery) -> Vec<&Form> {
        self.catalog.list_forms(query)
    }

    pub fn submission(&self, id: SubmissionId) -> FormsResult<&Submission> {
        self.store.get(id)
    }

    pub fn submissions(&self, query: &SubmissionQuery) -> Vec<&Submission> {
        self.store.list(query)
    }

    pub fn responses(&self, id: SubmissionId) -> Vec<&Response> {
        self.store.responses(id)
    }

    pub fn history(&self, form_id: FormId, entity: EntityRef) -> Vec<&Submission> {
        self.store.history(form_id, entity)
    }

    /// Forms the calling office can fill right now, for the given entity
    /// kind.
    pub fn list_assigned_forms(&self, ctx: &OperationContext, entity_kind: EntityKind) -> Vec<&Form> {
        self.directory.list_assigned_forms(
            &self.catalog,
            ctx.office_kind,
            &ctx.office_code,
            entity_kind,
            Utc::now(),
        )
    }

    // ── Form administration ──────────────────────────────────────────

    pub fn create_form(&mut self, new: NewForm, ctx: &OperationContext) -> FormsResult<FormId> {
        let id = self.catalog.create_form(new, ctx.user_id.clone())?;
        let row = self.catalog.get_form(id)?;
        let snapshot = serde_json::to_value(row).ok();
        self.record_audit(ctx, "form_created", "form", id.to_string(), None, snapshot);
        Ok(id)
    }

    pub fn update_form(
        &mut self,
        id: FormId,
        patch: FormPatch,
        ctx: &OperationContext,
    ) -> FormsResult<()> {
        let old = serde_json::to_value(self.catalog.get_form(id)?).ok();
        self.catalog.update_form(id, patch)?;
        let new = serde_json::to_value(self.catalog.get_form(id)?).ok();
        self.record_audit(ctx, "form_updated", "form", id.to_string(), old, new);
        Ok(())
    }

    /// Delete a form and everything hanging off it, child before parent:
    /// responses and submissions, then assignments, then fields, then the
    /// form. Refused while submissions exist unless the caller's context
    /// carries the cascade override.
    pub fn delete_form(&mut self, id: FormId, ctx: &OperationContext) -> FormsResult<()> {
        let old = serde_json::to_value(self.catalog.get_form(id)?).ok();
        if self.store.form_has_submissions(id) && !ctx.cascade_override {
            return Err(FormsError::Conflict(
                "form has submissions; deletion requires an explicit override".into(),
            ));
        }
        self.store.purge_form(id);
        self.directory.remove_for_form(id);
        self.catalog.remove_form(id)?;
        self.record_audit(ctx, "form_deleted", "form", id.to_string(), old, None);
        Ok(())
    }

    pub fn duplicate_form(
        &mut self,
        id: FormId,
        options: DuplicateOptions,
        ctx: &OperationContext,
    ) -> FormsResult<FormId> {
        let copy = self.catalog.duplicate_form(id, ctx.user_id.clone())?;
        if options.include_assignments {
            self.directory.clone_for_form(id, copy, ctx.user_id.clone());
        }
        let snapshot = serde_json::to_value(self.catalog.get_form(copy)?).ok();
        self.record_audit(ctx, "form_duplicated", "form", copy.to_string(), None, snapshot);
        Ok(copy)
    }

    pub fn add_field(
        &mut self,
        form_id: FormId,
        new: NewField,
        ctx: &OperationContext,
    ) -> FormsResult<FieldId> {
        let id = self.catalog.add_field(form_id, new)?;
        let snapshot = serde_json::to_value(self.catalog.get_field(id)?).ok();
        self.record_audit(ctx, "field_added", "field", id.to_string(), None, snapshot);
        Ok(id)
    }

    pub fn update_field(
        &mut self,
        id: FieldId,
        patch: FieldPatch,
        ctx: &OperationContext,
    ) -> FormsResult<()> {
        let old = serde_json::to_value(self.catalog.get_field(id)?).ok();
        self.catalog.update_field(id, patch)?;
        let new = serde_json::to_value(self.catalog.get_field(id)?).ok();
        self.record_audit(ctx, "field_updated", "field", id.to_string(), old, new);
        Ok(())
    }

    /// Refused while any response references the field.
    pub fn delete_field(&mut self, id: FieldId, ctx: &OperationContext) -> FormsResult<()> {
        let old = serde_json::to_value(self.catalog.get_field(id)?).ok();
        if self.store.field_referenced(id) {
            return Err(FormsError::Conflict(
                "field has recorded responses and cannot be deleted".into(),
            ));
        }
        self.catalog.remove_field(id)?;
        self.record_audit(ctx, "field_deleted", "field", id.to_string(), old, None);
        Ok(())
    }

    pub fn reorder_fields(
        &mut self,
        form_id: FormId,
        order: &[FieldId],
        ctx: &OperationContext,
    ) -> FormsResult<()> {
        self.catalog.reorder_fields(form_id, order)?;
        self.record_audit(ctx, "fields_reordered", "form", form_id.to_string(), None, None);
        Ok(())
    }

    // ── Assignments ──────────────────────────────────────────────────

    pub fn assign(
        &mut self,
        grant: NewAssignment,
        ctx: &OperationContext,
    ) -> FormsResult<AssignmentId> {
        self.catalog.get_form(grant.form_id)?;
        let id = self.directory.assign(grant, ctx.user_id.clone())?;
        let snapshot = serde_json::to_value(self.directory.get(id)?).ok();
        self.record_audit(ctx, "assignment_granted", "assignment", id.to_string(), None, snapshot);
        Ok(id)
    }

    pub fn revoke(&mut self, id: AssignmentId, ctx: &OperationContext) -> FormsResult<()> {
        let old = serde_json::to_value(self.directory.get(id)?).ok();
        self.directory.revoke(id)?;
        let new = serde_json::to_value(self.directory.get(id)?).ok();
        self.record_audit(ctx, "assignment_revoked", "assignment", id.to_string(), old, new);
        Ok(())
    }

    // ── Submission workflow ──────────────────────────────────────────

    /// Pre-flight check composing every gate a write would hit: the form
    /// exists, is open, a live fill grant covers the principal, and the
    /// submission cap is not reached. With an entity given the cap counts
    /// that chain's rows; without one it counts the principal's rows for
    /// the form.
    pub fn can_submit(
        &self,
        form_id: FormId,
        ctx: &OperationContext,
        entity: Option<EntityRef>,
    ) -> Result<(), SubmitRefusal> {
        let now = Utc::now();
        let form = match self.catalog.get_form(form_id) {
            Ok(form) => form,
            Err(_) => return Err(SubmitRefusal::FormNotFound),
        };
        if !form.is_open_at(now) {
            return Err(SubmitRefusal::FormClosed);
        }
        if !self
            .directory
            .can_fill(form_id, &ctx.user_id, ctx.office_kind, &ctx.office_code, now)
        {
            return Err(SubmitRefusal::NotGranted);
        }
        if form.max_submissions > 0 {
            let prior = match entity {
                Some(entity) => self.store.chain_len(form_id, entity),
                None => self.store.count_by_user(form_id, &ctx.user_id),
            };
            if prior >= form.max_submissions as usize {
                return Err(SubmitRefusal::CapReached {
                    cap: form.max_submissions,
                });
            }
        }
        Ok(())
    }

    /// Create a submission, or open the next version of an existing one.
    ///
    /// A save without a submission id opens a chain only when the entity
    /// has none for this form; otherwise it is treated as a revision of
    /// the chain's latest row and must pass the same checks.
    ///
    /// Every precondition is checked before the first write, and all writes
    /// of one call happen inside the same exclusive section, so a failure
    /// leaves the prior latest row untouched.
    pub fn save(
        &mut self,
        draft: SubmissionDraft,
        ctx: &OperationContext,
    ) -> FormsResult<SaveReceipt> {
        let entity = self.resolve_entity(draft.entity)?;
        let form = self.catalog.get_form(draft.form_id)?;
        if !form.entity_kind.accepts(entity.kind()) {
            return Err(FormsError::Validation(format!(
                "form '{}' does not target {} records",
                form.code,
                entity.kind()
            )));
        }
        for (field_id, _) in &draft.responses {
            let field = self.catalog.get_field(*field_id)?;
            if field.form_id != draft.form_id {
                return Err(FormsError::Validation(format!(
                    "field {} does not belong to form {}",
                    field_id, draft.form_id
                )));
            }
            if field.kind == forms_types::FieldKind::File {
                return Err(FormsError::Validation(format!(
                    "field '{}' takes an upload, not a text value",
                    field.code
                )));
            }
        }
        // A revision is permissioned through the row being revised; the
        // fill gate and cap apply only to brand-new submissions. Saving
        // without a submission id against an entity whose chain already
        // exists supersedes that chain's latest row, so it must pass the
        // revision checks as well as the fill gate.
        let revising = match draft.submission_id {
            Some(existing) => {
                let row = self.store.get(existing)?;
                if row.form_id != draft.form_id || row.entity != entity {
                    return Err(FormsError::Validation(
                        "submission does not belong to this form and entity".into(),
                    ));
                }
                if !row.is_latest {
                    return Err(FormsError::Conflict(
                        "only the latest version of a submission can be revised".into(),
                    ));
                }
                Some(existing)
            }
            None => self.store.latest(draft.form_id, entity).map(|row| row.id),
        };
        if let Some(existing) = revising {
            let row = self.store.get(existing)?;
            if row.status.is_reviewable() {
                return Err(FormsError::state(row.status, "revised"));
            }
            let now = Utc::now();
            if row.submitted_by != ctx.user_id
                && !self.directory.can_edit(
                    row.form_id,
                    &ctx.user_id,
                    ctx.office_kind,
                    &ctx.office_code,
                    now,
                )
            {
                return Err(FormsError::Authorization(
                    "only the submitter or an edit grant may revise a submission".into(),
                ));
            }
        }
        if draft.submission_id.is_none() {
            self.can_submit(draft.form_id, ctx, Some(entity))
                .map_err(|refusal| refusal.into_error(draft.form_id))?;
        }

        // Carry the prior version's answers into the new draft; the
        // attached responses then overwrite field by field.
        let carried: Vec<(FieldId, ResponseValue)> = match revising {
            Some(existing) => self
                .store
                .responses(existing)
                .into_iter()
                .map(|response| (response.field_id, response.value.clone()))
                .collect(),
            None => Vec::new(),
        };

        let total = self.catalog.field_count(draft.form_id) as u32;
        let id = self.store.open_version(
            draft.form_id,
            entity,
            ctx.office_code.clone(),
            ctx.user_id.clone(),
            total,
        )?;
        for (field_id, value) in carried {
            self.store.upsert_response(id, field_id, value)?;
        }
        for (field_id, value) in &draft.responses {
            self.store
                .upsert_response(id, *field_id, ResponseValue::Text(value.clone()))?;
        }
        self.store.recount_completed(id)?;

        let mut status = SubmissionStatus::Draft;
        if draft.submit && self.missing_required(draft.form_id, id).is_empty() {
            self.store.get_mut(id)?.mark_submitted();
            status = SubmissionStatus::Submitted;
        }

        let version = self.store.get(id)?.version;
        let snapshot = serde_json::to_value(self.store.get(id)?).ok();
        self.record_audit(ctx, "submission_saved", "submission", id.to_string(), None, snapshot);

        let message = match status {
            SubmissionStatus::Submitted => {
                format!("submission recorded and handed over for review (version {})", version)
            }
            _ => format!("submission saved as draft (version {})", version),
        };
        Ok(SaveReceipt {
            submission_id: id,
            version,
            status,
            message,
        })
    }

    /// Record a text value against one field of a draft.
    pub fn save_response(
        &mut self,
        id: SubmissionId,
        field_id: FieldId,
        value: impl Into<String>,
        ctx: &OperationContext,
    ) -> FormsResult<()> {
        let field_kind_is_file = self.check_response_write(id, field_id, ctx)?;
        if field_kind_is_file {
            return Err(FormsError::Validation(
                "file fields take an upload, not a text value".into(),
            ));
        }
        self.store
            .upsert_response(id, field_id, ResponseValue::Text(value.into()))?;
        self.store.recount_completed(id)?;
        self.record_audit(ctx, "response_saved", "submission", id.to_string(), None, None);
        Ok(())
    }

    /// Store a file through the storage collaborator and record the
    /// returned reference against the field. A storage failure fails the
    /// whole operation; no response row is written.
    pub fn save_file_response(
        &mut self,
        id: SubmissionId,
        field_id: FieldId,
        bytes: &[u8],
        declared_name: &str,
        declared_type: &str,
        ctx: &OperationContext,
    ) -> FormsResult<()> {
        let field_kind_is_file = self.check_response_write(id, field_id, ctx)?;
        if !field_kind_is_file {
            return Err(FormsError::Validation(
                "only file fields take an upload".into(),
            ));
        }
        if let FieldOptions::File {
            accepted_types,
            max_bytes,
        } = &self.catalog.get_field(field_id)?.options
        {
            if !accepted_types.is_empty() && !accepted_types.iter().any(|t| t == declared_type) {
                return Err(FormsError::Validation(format!(
                    "this field does not accept '{}' files",
                    declared_type
                )));
            }
            if let Some(max) = max_bytes {
                if bytes.len() as u64 > *max {
                    return Err(FormsError::Validation(
                        "file exceeds this field's size limit".into(),
                    ));
                }
            }
        }

        let stored = self
            .files
            .store(field_id, bytes, declared_name, declared_type)?;
        self.store
            .upsert_response(id, field_id, ResponseValue::File(stored))?;
        self.store.recount_completed(id)?;
        self.record_audit(ctx, "file_response_saved", "submission", id.to_string(), None, None);
        Ok(())
    }

    /// Hand a draft over for review. Fails with `Validation` while any
    /// field currently marked required on the form lacks a non-empty
    /// response, including fields added after the draft was started.
    pub fn submit_for_review(
        &mut self,
        id: SubmissionId,
        ctx: &OperationContext,
    ) -> FormsResult<()> {
        let row = self.store.get(id)?;
        if row.status != SubmissionStatus::Draft {
            return Err(FormsError::state(row.status, "submitted for review"));
        }
        let form_id = row.form_id;
        if row.submitted_by != ctx.user_id
            && !self.directory.can_edit(
                form_id,
                &ctx.user_id,
                ctx.office_kind,
                &ctx.office_code,
                Utc::now(),
            )
        {
            return Err(FormsError::Authorization(
                "only the submitter or an edit grant may submit this draft".into(),
            ));
        }
        let missing = self.missing_required(form_id, id);
        if !missing.is_empty() {
            return Err(FormsError::Validation(format!(
                "required fields missing a value: {}",
                missing.join(", ")
            )));
        }

        self.store.get_mut(id)?.mark_submitted();
        let snapshot = serde_json::to_value(self.store.get(id)?).ok();
        self.record_audit(ctx, "submission_submitted", "submission", id.to_string(), None, snapshot);
        tracing::info!(submission_id = %id, "submission handed over for review");
        Ok(())
    }

    /// A reviewer takes a submitted row into review.
    pub fn mark_under_review(
        &mut self,
        id: SubmissionId,
        ctx: &OperationContext,
    ) -> FormsResult<()> {
        let row = self.store.get(id)?;
        if row.status != SubmissionStatus::Submitted {
            return Err(FormsError::state(row.status, "taken into review"));
        }
        let form_id = row.form_id;
        self.require_review_grant(form_id, ctx)?;
        self.store.get_mut(id)?.mark_under_review(ctx.user_id.clone());
        self.record_audit(ctx, "submission_in_review", "submission", id.to_string(), None, None);
        Ok(())
    }

    /// Approve or reject. Terminal either way; a rejected row stays visible
    /// and a later edit opens a new draft version.
    pub fn review(
        &mut self,
        id: SubmissionId,
        action: ReviewAction,
        ctx: &OperationContext,
        notes: Option<String>,
    ) -> FormsResult<()> {
        let row = self.store.get(id)?;
        let attempted = match action {
            ReviewAction::Approve => "approved",
            ReviewAction::Reject => "rejected",
        };
        if !row.status.is_reviewable() {
            return Err(FormsError::state(row.status, attempted));
        }
        let form_id = row.form_id;
        self.require_review_grant(form_id, ctx)?;

        let old = serde_json::to_value(self.store.get(id)?).ok();
        let status = match action {
            ReviewAction::Approve => SubmissionStatus::Approved,
            ReviewAction::Reject => SubmissionStatus::Rejected,
        };
        self.store
            .get_mut(id)?
            .mark_reviewed(status, ctx.user_id.clone(), notes);
        let new = serde_json::to_value(self.store.get(id)?).ok();
        self.record_audit(ctx, "submission_reviewed", "submission", id.to_string(), old, new);
        tracing::info!(submission_id = %id, status = %status, "submission reviewed");
        Ok(())
    }

    /// Delete one submission row and its responses. Allowed for the
    /// original submitter while the row is not yet reviewed, or for a
    /// principal whose grant carries the delete capability.
    pub fn delete(&mut self, id: SubmissionId, ctx: &OperationContext) -> FormsResult<()> {
        let row = self.store.get(id)?;
        let own_unreviewed = row.submitted_by == ctx.user_id
            && row.reviewed_by.is_none()
            && !row.status.is_terminal();
        let granted = self.directory.can_delete(
            row.form_id,
            &ctx.user_id,
            ctx.office_kind,
            &ctx.office_code,
            Utc::now(),
        );
        if !own_unreviewed && !granted {
            return Err(FormsError::Authorization(
                "only the submitter of an unreviewed submission or a delete grant may delete it"
                    .into(),
            ));
        }
        let old = serde_json::to_value(self.store.get(id)?).ok();
        self.store.delete_submission(id)?;
        self.record_audit(ctx, "submission_deleted", "submission", id.to_string(), old, None);
        Ok(())
    }

    // ── Bulk variants ────────────────────────────────────────────────

    pub fn bulk_approve(
        &mut self,
        ids: &[SubmissionId],
        ctx: &OperationContext,
        notes: Option<String>,
    ) -> BulkReport {
        let mut report = BulkReport::default();
        for &id in ids {
            report.push(id, self.review(id, ReviewAction::Approve, ctx, notes.clone()));
        }
        report
    }

    pub fn bulk_reject(
        &mut self,
        ids: &[SubmissionId],
        ctx: &OperationContext,
        notes: Option<String>,
    ) -> BulkReport {
        let mut report = BulkReport::default();
        for &id in ids {
            report.push(id, self.review(id, ReviewAction::Reject, ctx, notes.clone()));
        }
        report
    }

    pub fn bulk_delete(&mut self, ids: &[SubmissionId], ctx: &OperationContext) -> BulkReport {
        let mut report = BulkReport::default();
        for &id in ids {
            report.push(id, self.delete(id, ctx));
        }
        report
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn resolve_entity(&self, target: EntityTarget) -> FormsResult<EntityRef> {
        match target {
            EntityTarget::Family(family) => Ok(EntityRef::Family(family)),
            EntityTarget::Member(member) => {
                let family = self.registry.family_of_member(member).ok_or_else(|| {
                    FormsError::Validation(format!("member {} is not known to the registry", member))
                })?;
                Ok(EntityRef::Member { member, family })
            }
        }
    }

    /// Codes of required fields on the form's current schema that have no
    /// non-empty response on the submission.
    fn missing_required(&self, form_id: FormId, id: SubmissionId) -> Vec<String> {
        self.catalog
            .required_fields(form_id)
            .into_iter()
            .filter(|field| {
                self.store
                    .response(id, field.id)
                    .map_or(true, |response| response.value.is_empty())
            })
            .map(|field| field.code.clone())
            .collect()
    }

    /// Shared checks for writing a response: row exists and is an editable
    /// draft, the actor may write to it, and the field belongs to its form.
    /// Returns whether the field is file-kind.
    fn check_response_write(
        &self,
        id: SubmissionId,
        field_id: FieldId,
        ctx: &OperationContext,
    ) -> FormsResult<bool> {
        let row = self.store.get(id)?;
        if row.status != SubmissionStatus::Draft {
            return Err(FormsError::state(row.status, "modified"));
        }
        let field = self.catalog.get_field(field_id)?;
        if field.form_id != row.form_id {
            return Err(FormsError::Validation(format!(
                "field {} does not belong to form {}",
                field_id, row.form_id
            )));
        }
        if row.submitted_by != ctx.user_id
            && !self.directory.can_edit(
                row.form_id,
                &ctx.user_id,
                ctx.office_kind,
                &ctx.office_code,
                Utc::now(),
            )
        {
            return Err(FormsError::Authorization(
                "only the submitter or an edit grant may record responses".into(),
            ));
        }
        Ok(field.kind == forms_types::FieldKind::File)
    }

    fn require_review_grant(&self, form_id: FormId, ctx: &OperationContext) -> FormsResult<()> {
        if self.directory.can_review(
            form_id,
            &ctx.user_id,
            ctx.office_kind,
            &ctx.office_code,
            Utc::now(),
        ) {
            Ok(())
        } else {
            Err(FormsError::Authorization(
                "no review assignment covers this principal".into(),
            ))
        }
    }

    /// Audit failures are logged and swallowed; they never fail the
    /// operation that produced them.
    fn record_audit(
        &self,
        ctx: &OperationContext,
        action: &str,
        entity: &'static str,
        entity_id: String,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) {
        let event = AuditEvent {
            actor: ctx.user_id.clone(),
            action: action.to_string(),
            entity,
            entity_id,
            old_value,
            new_value,
        };
        if let Err(reason) = self.audit.record(event) {
            tracing::warn!(%reason, action, "audit sink failed; continuing");
        }
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryAuditSink;
    use forms_types::{
        AssignmentPurpose, Capabilities, EntityKind, FamilyId, FieldKind, GrantTarget, MemberId,
        OfficeCode, OfficeKind, UserId,
    };

    fn ctx(user: &str, kind: OfficeKind, code: &str) -> OperationContext {
        OperationContext::new(UserId::new(user), kind, OfficeCode::new(code))
    }

    fn admin() -> OperationContext {
        ctx("admin", OfficeKind::Ministry, "MIN")
    }

    fn clerk() -> OperationContext {
        ctx("clerk", OfficeKind::Division, "DIV-7")
    }

    fn reviewer() -> OperationContext {
        ctx("reviewer", OfficeKind::District, "DST-2")
    }

    /// Engine seeded with one family form carrying two required fields, a
    /// fill grant for division DIV-7 and a review grant for `reviewer`.
    fn seeded() -> (WorkflowEngine, FormId, FieldId, FieldId) {
        let mut engine = WorkflowEngine::new();
        let form = engine
            .create_form(
                NewForm::new("FAM01", "Family survey", EntityKind::Family),
                &admin(),
            )
            .unwrap();
        let head = engine
            .add_field(
                form,
                NewField::new("head_name", "Head of family", FieldKind::Text).required(),
                &admin(),
            )
            .unwrap();
        let size = engine
            .add_field(
                form,
                NewField::new("household_size", "Household size", FieldKind::Number).required(),
                &admin(),
            )
            .unwrap();
        engine
            .assign(
                NewAssignment::new(
                    form,
                    GrantTarget::office(OfficeKind::Division, OfficeCode::new("DIV-7")),
                    AssignmentPurpose::Fill,
                ),
                &admin(),
            )
            .unwrap();
        engine
            .assign(
                NewAssignment::new(
                    form,
                    GrantTarget::user(UserId::new("reviewer")),
                    AssignmentPurpose::Review,
                ),
                &admin(),
            )
            .unwrap();
        (engine, form, head, size)
    }

    /// Save a complete submission for `family` and hand it over for review.
    fn submitted(
        engine: &mut WorkflowEngine,
        form: FormId,
        head: FieldId,
        size: FieldId,
        family: u64,
    ) -> SubmissionId {
        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(family)))
            .with_response(head, "Asha Perera")
            .with_response(size, "4")
            .submitting();
        let receipt = engine.save(draft, &clerk()).unwrap();
        assert_eq!(receipt.status, SubmissionStatus::Submitted);
        receipt.submission_id
    }

    #[test]
    fn test_incomplete_draft_cannot_be_submitted() {
        let (mut engine, form, head, size) = seeded();
        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
            .with_response(head, "Asha Perera");
        let receipt = engine.save(draft, &clerk()).unwrap();
        assert_eq!(receipt.status, SubmissionStatus::Draft);
        assert_eq!(receipt.version, 1);

        let err = engine
            .submit_for_review(receipt.submission_id, &clerk())
            .unwrap_err();
        match err {
            FormsError::Validation(message) => assert!(message.contains("household_size")),
            other => panic!("expected validation error, got {other:?}"),
        }

        engine
            .save_response(receipt.submission_id, size, "4", &clerk())
            .unwrap();
        engine
            .submit_for_review(receipt.submission_id, &clerk())
            .unwrap();
        let row = engine.submission(receipt.submission_id).unwrap();
        assert_eq!(row.status, SubmissionStatus::Submitted);
        assert!(row.submitted_at.is_some());
        assert_eq!(row.completed_fields, 2);
    }

    #[test]
    fn test_submit_flag_downgrades_to_draft_when_incomplete() {
        let (mut engine, form, head, _size) = seeded();
        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
            .with_response(head, "Asha Perera")
            .submitting();
        let receipt = engine.save(draft, &clerk()).unwrap();
        assert_eq!(receipt.status, SubmissionStatus::Draft);
    }

    #[test]
    fn test_fill_grant_alone_cannot_review() {
        let (mut engine, form, head, size) = seeded();
        let id = submitted(&mut engine, form, head, size, 1);

        let err = engine
            .review(id, ReviewAction::Approve, &clerk(), None)
            .unwrap_err();
        assert!(matches!(err, FormsError::Authorization(_)));

        engine
            .review(id, ReviewAction::Approve, &reviewer(), Some("checked".into()))
            .unwrap();
        let row = engine.submission(id).unwrap();
        assert_eq!(row.status, SubmissionStatus::Approved);
        assert_eq!(row.reviewed_by, Some(UserId::new("reviewer")));
        assert_eq!(row.review_notes.as_deref(), Some("checked"));
    }

    #[test]
    fn test_terminal_rows_cannot_be_rereviewed() {
        let (mut engine, form, head, size) = seeded();
        let id = submitted(&mut engine, form, head, size, 1);
        engine
            .review(id, ReviewAction::Approve, &reviewer(), None)
            .unwrap();

        let err = engine
            .review(id, ReviewAction::Reject, &reviewer(), None)
            .unwrap_err();
        match err {
            FormsError::State { current, attempted } => {
                assert_eq!(current, "approved");
                assert_eq!(attempted, "rejected");
            }
            other => panic!("expected state error, got {other:?}"),
        }
    }

    #[test]
    fn test_mark_under_review_transition() {
        let (mut engine, form, head, size) = seeded();
        let id = submitted(&mut engine, form, head, size, 1);

        // Only submitted rows can be taken into review, and only by a
        // review grant.
        assert!(matches!(
            engine.mark_under_review(id, &clerk()),
            Err(FormsError::Authorization(_))
        ));
        engine.mark_under_review(id, &reviewer()).unwrap();
        assert_eq!(
            engine.submission(id).unwrap().status,
            SubmissionStatus::PendingReview
        );
        assert!(matches!(
            engine.mark_under_review(id, &reviewer()),
            Err(FormsError::State { .. })
        ));

        // Pending-review rows are still reviewable.
        engine
            .review(id, ReviewAction::Reject, &reviewer(), Some("resubmit".into()))
            .unwrap();
        assert_eq!(
            engine.submission(id).unwrap().status,
            SubmissionStatus::Rejected
        );
    }

    #[test]
    fn test_editing_reviewed_row_appends_version() {
        let (mut engine, form, head, size) = seeded();
        let first = submitted(&mut engine, form, head, size, 1);
        engine
            .review(first, ReviewAction::Approve, &reviewer(), None)
            .unwrap();

        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
            .revising(first)
            .with_response(size, "5");
        let receipt = engine.save(draft, &clerk()).unwrap();
        assert_eq!(receipt.version, 2);
        assert_eq!(receipt.status, SubmissionStatus::Draft);
        assert_ne!(receipt.submission_id, first);

        let old = engine.submission(first).unwrap();
        assert_eq!(old.status, SubmissionStatus::Approved);
        assert!(!old.is_latest);
        assert!(engine.submission(receipt.submission_id).unwrap().is_latest);
        assert_eq!(engine.history(form, EntityRef::Family(FamilyId(1))).len(), 2);

        // The prior answers carried over; the attached one overwrote.
        let carried = engine.store().response(receipt.submission_id, head).unwrap();
        assert_eq!(carried.value, ResponseValue::Text("Asha Perera".into()));
        let updated = engine.store().response(receipt.submission_id, size).unwrap();
        assert_eq!(updated.value, ResponseValue::Text("5".into()));
    }

    #[test]
    fn test_idless_save_cannot_supersede_a_row_in_review() {
        let (mut engine, form, head, size) = seeded();
        let id = submitted(&mut engine, form, head, size, 1);

        // Family 1 already has a chain, so this is not a new submission.
        // Its latest row sits in review and may not be displaced, not even
        // by the submitter, and not by another holder of the fill grant.
        let fresh = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)));
        assert!(matches!(
            engine.save(fresh.clone(), &clerk()),
            Err(FormsError::State { .. })
        ));
        let other = ctx("other_clerk", OfficeKind::Division, "DIV-7");
        assert!(matches!(
            engine.save(fresh, &other),
            Err(FormsError::State { .. })
        ));
        assert!(engine.submission(id).unwrap().is_latest);
        assert_eq!(engine.history(form, EntityRef::Family(FamilyId(1))).len(), 1);
    }

    #[test]
    fn test_idless_save_on_existing_chain_is_a_revision() {
        let (mut engine, form, head, size) = seeded();
        let first = engine
            .save(
                SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
                    .with_response(head, "Asha Perera"),
                &clerk(),
            )
            .unwrap();

        // A colleague with the same office fill grant is not the submitter
        // and holds no edit grant, so they cannot displace the draft.
        let other = ctx("other_clerk", OfficeKind::Division, "DIV-7");
        let fresh = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)));
        assert!(matches!(
            engine.save(fresh, &other),
            Err(FormsError::Authorization(_))
        ));

        // The submitter's id-less save appends the next version with the
        // recorded answers carried forward.
        let receipt = engine
            .save(
                SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
                    .with_response(size, "4"),
                &clerk(),
            )
            .unwrap();
        assert_eq!(receipt.version, 2);
        assert!(!engine.submission(first.submission_id).unwrap().is_latest);
        let carried = engine.store().response(receipt.submission_id, head).unwrap();
        assert_eq!(carried.value, ResponseValue::Text("Asha Perera".into()));
    }

    #[test]
    fn test_attached_text_cannot_fill_a_file_field() {
        let (mut engine, form, head, size) = seeded();
        let scan = engine
            .add_field(
                form,
                NewField::new("deed_scan", "Deed scan", FieldKind::File).required(),
                &admin(),
            )
            .unwrap();

        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
            .with_response(head, "Asha Perera")
            .with_response(size, "4")
            .with_response(scan, "just some text, not a file")
            .submitting();
        match engine.save(draft, &clerk()) {
            Err(FormsError::Validation(message)) => assert!(message.contains("deed_scan")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(engine.history(form, EntityRef::Family(FamilyId(1))).is_empty());
    }

    #[test]
    fn test_rows_in_review_cannot_be_revised() {
        let (mut engine, form, head, size) = seeded();
        let id = submitted(&mut engine, form, head, size, 1);

        let err = engine
            .save_response(id, size, "9", &clerk())
            .unwrap_err();
        assert!(matches!(err, FormsError::State { .. }));

        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1))).revising(id);
        assert!(matches!(
            engine.save(draft, &clerk()),
            Err(FormsError::State { .. })
        ));
    }

    #[test]
    fn test_can_submit_composes_every_gate() {
        let (mut engine, form, _head, _size) = seeded();
        let entity = EntityRef::Family(FamilyId(1));

        assert_eq!(
            engine.can_submit(FormId(99), &clerk(), None),
            Err(SubmitRefusal::FormNotFound)
        );
        assert_eq!(
            engine.can_submit(form, &reviewer(), None),
            Err(SubmitRefusal::NotGranted)
        );
        assert_eq!(engine.can_submit(form, &clerk(), Some(entity)), Ok(()));

        let patch = FormPatch {
            is_active: Some(false),
            ..FormPatch::default()
        };
        engine.update_form(form, patch, &admin()).unwrap();
        assert_eq!(
            engine.can_submit(form, &clerk(), Some(entity)),
            Err(SubmitRefusal::FormClosed)
        );
    }

    #[test]
    fn test_submission_cap_per_entity() {
        let (mut engine, form, head, size) = seeded();
        let patch = FormPatch {
            max_submissions: Some(1),
            ..FormPatch::default()
        };
        engine.update_form(form, patch, &admin()).unwrap();

        let id = submitted(&mut engine, form, head, size, 1);
        assert_eq!(
            engine.can_submit(form, &clerk(), Some(EntityRef::Family(FamilyId(1)))),
            Err(SubmitRefusal::CapReached { cap: 1 })
        );
        // Another family is unaffected.
        assert_eq!(
            engine.can_submit(form, &clerk(), Some(EntityRef::Family(FamilyId(2)))),
            Ok(())
        );

        // Once the chain's latest row is terminal, an id-less save by the
        // submitter reaches the cap check and is refused there.
        engine
            .review(id, ReviewAction::Approve, &reviewer(), None)
            .unwrap();
        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)));
        assert!(matches!(
            engine.save(draft, &clerk()),
            Err(FormsError::Validation(_))
        ));
    }

    #[test]
    fn test_member_targets_resolve_through_registry() {
        let (engine, form, head, size) = seeded();
        let registry = MapFamilyRegistry::new().with_member(MemberId(31), FamilyId(3));
        let mut engine = engine.with_family_registry(Arc::new(registry));
        let patch = FormPatch {
            entity_kind: Some(EntityKind::Both),
            ..FormPatch::default()
        };
        engine.update_form(form, patch, &admin()).unwrap();

        let draft = SubmissionDraft::new(form, EntityTarget::Member(MemberId(31)))
            .with_response(head, "Nimal")
            .with_response(size, "1")
            .submitting();
        let receipt = engine.save(draft, &clerk()).unwrap();
        let row = engine.submission(receipt.submission_id).unwrap();
        assert_eq!(
            row.entity,
            EntityRef::Member {
                member: MemberId(31),
                family: FamilyId(3),
            }
        );

        let unknown = SubmissionDraft::new(form, EntityTarget::Member(MemberId(99)));
        assert!(matches!(
            engine.save(unknown, &clerk()),
            Err(FormsError::Validation(_))
        ));
    }

    #[test]
    fn test_entity_kind_mismatch_is_rejected() {
        let (engine, form, _head, _size) = seeded();
        let registry = MapFamilyRegistry::new().with_member(MemberId(31), FamilyId(3));
        let mut engine = engine.with_family_registry(Arc::new(registry));

        // FAM01 targets families only.
        let draft = SubmissionDraft::new(form, EntityTarget::Member(MemberId(31)));
        match engine.save(draft, &clerk()) {
            Err(FormsError::Validation(message)) => assert!(message.contains("member")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_form_refused_then_cascaded() {
        let (mut engine, form, head, size) = seeded();
        let id = submitted(&mut engine, form, head, size, 1);

        assert!(matches!(
            engine.delete_form(form, &admin()),
            Err(FormsError::Conflict(_))
        ));
        assert!(engine.form(form).is_ok());

        engine
            .delete_form(form, &admin().with_cascade_override())
            .unwrap();
        assert!(engine.form(form).is_err());
        assert!(engine.submission(id).is_err());
        assert!(engine.directory().assignments_for_form(form).is_empty());
        assert_eq!(engine.catalog().fields_of(form).len(), 0);
    }

    #[test]
    fn test_delete_field_with_responses_refused() {
        let (mut engine, form, head, size) = seeded();
        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
            .with_response(head, "Asha Perera");
        engine.save(draft, &clerk()).unwrap();

        assert!(matches!(
            engine.delete_field(head, &admin()),
            Err(FormsError::Conflict(_))
        ));
        // The untouched field can go.
        engine.delete_field(size, &admin()).unwrap();
        assert_eq!(engine.catalog().fields_of(form).len(), 1);
    }

    #[test]
    fn test_file_responses_validated_and_stored() {
        let (mut engine, form, _head, _size) = seeded();
        let scan = engine
            .add_field(
                form,
                NewField::new("deed_scan", "Deed scan", FieldKind::File).with_options(
                    FieldOptions::File {
                        accepted_types: vec!["application/pdf".into()],
                        max_bytes: Some(1024),
                    },
                ),
                &admin(),
            )
            .unwrap();
        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)));
        let id = engine.save(draft, &clerk()).unwrap().submission_id;

        let err = engine
            .save_file_response(id, scan, b"GIF89a", "deed.gif", "image/gif", &clerk())
            .unwrap_err();
        assert!(matches!(err, FormsError::Validation(_)));

        let oversized = vec![0u8; 2048];
        assert!(matches!(
            engine.save_file_response(id, scan, &oversized, "deed.pdf", "application/pdf", &clerk()),
            Err(FormsError::Validation(_))
        ));
        assert!(engine.store().response(id, scan).is_none());

        engine
            .save_file_response(id, scan, b"%PDF-1.4", "deed.pdf", "application/pdf", &clerk())
            .unwrap();
        let response = engine.store().response(id, scan).unwrap();
        match &response.value {
            ResponseValue::File(stored) => {
                assert_eq!(stored.original_name, "deed.pdf");
                assert_eq!(stored.size, 8);
            }
            other => panic!("expected a file value, got {other:?}"),
        }

        // A text value cannot land on a file field, and vice versa.
        assert!(matches!(
            engine.save_response(id, scan, "not a file", &clerk()),
            Err(FormsError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_submission_permissions() {
        let (mut engine, form, head, size) = seeded();
        engine
            .assign(
                NewAssignment::new(
                    form,
                    GrantTarget::user(UserId::new("supervisor")),
                    AssignmentPurpose::Fill,
                )
                .with_capabilities(Capabilities {
                    can_delete: true,
                    ..Capabilities::default()
                }),
                &admin(),
            )
            .unwrap();

        // Submitter may delete their own unreviewed row.
        let first = submitted(&mut engine, form, head, size, 1);
        engine.delete(first, &clerk()).unwrap();
        assert!(engine.submission(first).is_err());

        // After review only a delete grant may.
        let second = submitted(&mut engine, form, head, size, 2);
        engine
            .review(second, ReviewAction::Approve, &reviewer(), None)
            .unwrap();
        assert!(matches!(
            engine.delete(second, &clerk()),
            Err(FormsError::Authorization(_))
        ));
        let supervisor = ctx("supervisor", OfficeKind::District, "DST-2");
        engine.delete(second, &supervisor).unwrap();

        // A stranger may never.
        let third = submitted(&mut engine, form, head, size, 3);
        let stranger = ctx("stranger", OfficeKind::LocalOffice, "LO-1");
        assert!(matches!(
            engine.delete(third, &stranger),
            Err(FormsError::Authorization(_))
        ));
    }

    #[test]
    fn test_bulk_review_reports_each_outcome() {
        let (mut engine, form, head, size) = seeded();
        let first = submitted(&mut engine, form, head, size, 1);
        let second = submitted(&mut engine, form, head, size, 2);
        // A draft in the batch fails its item without touching the rest.
        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(3)));
        let third = engine.save(draft, &clerk()).unwrap().submission_id;

        let report = engine.bulk_approve(&[first, second, third], &reviewer(), None);
        assert_eq!(report.succeeded(), vec![first, second]);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.failed()[0].0, third);
        assert!(!report.is_all_ok());
        assert_eq!(
            engine.submission(first).unwrap().status,
            SubmissionStatus::Approved
        );
        assert_eq!(
            engine.submission(third).unwrap().status,
            SubmissionStatus::Draft
        );
    }

    #[test]
    fn test_duplicate_form_optionally_carries_assignments() {
        let (mut engine, form, _head, _size) = seeded();

        let bare = engine
            .duplicate_form(form, DuplicateOptions::default(), &admin())
            .unwrap();
        assert!(engine.directory().assignments_for_form(bare).is_empty());
        assert_eq!(engine.catalog().fields_of(bare).len(), 2);

        let with_grants = engine
            .duplicate_form(
                form,
                DuplicateOptions {
                    include_assignments: true,
                },
                &admin(),
            )
            .unwrap();
        assert_eq!(
            engine.directory().assignments_for_form(with_grants).len(),
            2
        );
    }

    #[test]
    fn test_list_assigned_forms_for_office() {
        let (mut engine, form, _head, _size) = seeded();
        let listed = engine.list_assigned_forms(&clerk(), EntityKind::Family);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, form);

        // Wrong entity kind, or an office without a grant, sees nothing.
        assert!(engine
            .list_assigned_forms(&clerk(), EntityKind::Member)
            .is_empty());
        let other = ctx("other", OfficeKind::Division, "DIV-8");
        assert!(engine
            .list_assigned_forms(&other, EntityKind::Family)
            .is_empty());

        let patch = FormPatch {
            is_active: Some(false),
            ..FormPatch::default()
        };
        engine.update_form(form, patch, &admin()).unwrap();
        assert!(engine
            .list_assigned_forms(&clerk(), EntityKind::Family)
            .is_empty());
    }

    #[test]
    fn test_responses_must_belong_to_the_form() {
        let (mut engine, form, head, _size) = seeded();
        let other = engine
            .create_form(
                NewForm::new("MEM01", "Member census", EntityKind::Member),
                &admin(),
            )
            .unwrap();
        let stray = engine
            .add_field(other, NewField::new("age", "Age", FieldKind::Number), &admin())
            .unwrap();

        let draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
            .with_response(stray, "40");
        assert!(matches!(
            engine.save(draft, &clerk()),
            Err(FormsError::Validation(_))
        ));

        let id = engine
            .save(
                SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
                    .with_response(head, "Asha Perera"),
                &clerk(),
            )
            .unwrap()
            .submission_id;
        assert!(matches!(
            engine.save_response(id, stray, "40", &clerk()),
            Err(FormsError::Validation(_))
        ));
    }

    #[test]
    fn test_audit_trail_records_mutations() {
        let sink = Arc::new(MemoryAuditSink::new());
        let mut engine = WorkflowEngine::new().with_audit(sink.clone());
        let form = engine
            .create_form(
                NewForm::new("FAM01", "Family survey", EntityKind::Family),
                &admin(),
            )
            .unwrap();
        engine
            .assign(
                NewAssignment::new(
                    form,
                    GrantTarget::office(OfficeKind::Division, OfficeCode::new("DIV-7")),
                    AssignmentPurpose::Fill,
                ),
                &admin(),
            )
            .unwrap();
        engine
            .save(
                SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1))),
                &clerk(),
            )
            .unwrap();

        let actions: Vec<String> = sink.events().iter().map(|e| e.action.clone()).collect();
        assert_eq!(
            actions,
            vec!["form_created", "assignment_granted", "submission_saved"]
        );
        assert_eq!(sink.events()[0].actor, UserId::new("admin"));
        assert!(sink.events()[0].new_value.is_some());
    }

    #[test]
    fn test_revision_keeps_entity_and_form_fixed() {
        let (mut engine, form, head, size) = seeded();
        let id = submitted(&mut engine, form, head, size, 1);
        engine
            .review(id, ReviewAction::Reject, &reviewer(), None)
            .unwrap();

        let wrong_family = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(2)))
            .revising(id);
        assert!(matches!(
            engine.save(wrong_family, &clerk()),
            Err(FormsError::Validation(_))
        ));

        // Only the submitter or an edit grant may revise.
        let stranger_draft = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1)))
            .revising(id)
            .with_response(size, "6");
        let stranger = ctx("stranger", OfficeKind::Division, "DIV-7");
        assert!(matches!(
            engine.save(stranger_draft.clone(), &stranger),
            Err(FormsError::Authorization(_))
        ));
        let receipt = engine.save(stranger_draft, &clerk()).unwrap();
        assert_eq!(receipt.version, 2);

        // Stale id: the rejected row is no longer latest.
        let stale = SubmissionDraft::new(form, EntityTarget::Family(FamilyId(1))).revising(id);
        assert!(matches!(
            engine.save(stale, &clerk()),
            Err(FormsError::Conflict(_))
        ));
    }
}
