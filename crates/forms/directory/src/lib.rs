//! Assignment directory: who may fill or review which form
//!
//! The directory stores capability grants and answers exactly one kind of
//! question: "is this principal granted X on this form". Form-level gates
//! (active flag, activation window, submission caps) are composed by the
//! workflow engine, with one deliberate exception: [`list_assigned_forms`]
//! pre-filters on the form's window so office task lists only show forms
//! that are actually fillable right now.
//!
//! Grants are never mutated. They expire, are revoked (expiry stamped to
//! now), or are superseded by a newer grant; expired rows stay visible to
//! history queries.
//!
//! [`list_assigned_forms`]: AssignmentDirectory::list_assigned_forms

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use forms_catalog::FormCatalog;
use forms_types::{
    Assignment, AssignmentId, AssignmentPurpose, Capabilities, EntityKind, Form, FormId,
    FormsError, FormsResult, GrantTarget, OfficeCode, OfficeKind, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Input for creating a grant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewAssignment {
    pub form_id: FormId,
    pub target: GrantTarget,
    pub purpose: AssignmentPurpose,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewAssignment {
    pub fn new(form_id: FormId, target: GrantTarget, purpose: AssignmentPurpose) -> Self {
        Self {
            form_id,
            target,
            purpose,
            capabilities: Capabilities::default(),
            expires_at: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Registry of capability grants.
#[derive(Clone, Debug, Default)]
pub struct AssignmentDirectory {
    assignments: HashMap<AssignmentId, Assignment>,
    by_form: HashMap<FormId, Vec<AssignmentId>>,
    next_id: u64,
}

impl AssignmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a grant. A live duplicate of the same (form, principal,
    /// purpose) is rejected; an expired duplicate may be re-granted, that is
    /// how lapsed access is renewed.
    pub fn assign(&mut self, grant: NewAssignment, granted_by: UserId) -> FormsResult<AssignmentId> {
        if grant.target.is_empty() {
            return Err(FormsError::Validation(
                "a grant must name an office or a user".into(),
            ));
        }
        let now = Utc::now();
        let duplicate = self
            .for_form(grant.form_id)
            .any(|existing| {
                existing.target == grant.target
                    && existing.purpose == grant.purpose
                    && existing.is_live_at(now)
            });
        if duplicate {
            return Err(FormsError::Conflict(
                "an identical live assignment already exists".into(),
            ));
        }

        self.next_id += 1;
        let id = AssignmentId(self.next_id);
        let assignment = Assignment {
            id,
            form_id: grant.form_id,
            target: grant.target,
            purpose: grant.purpose,
            capabilities: grant.capabilities,
            granted_by,
            granted_at: now,
            expires_at: grant.expires_at,
        };
        self.by_form.entry(grant.form_id).or_default().push(id);
        self.assignments.insert(id, assignment);

        tracing::info!(assignment_id = %id, "assignment granted");
        Ok(id)
    }

    /// Expire a grant now. The row is kept for history.
    pub fn revoke(&mut self, id: AssignmentId) -> FormsResult<()> {
        let assignment = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| FormsError::not_found("assignment", id))?;
        assignment.expires_at = Some(Utc::now());
        tracing::info!(assignment_id = %id, "assignment revoked");
        Ok(())
    }

    pub fn get(&self, id: AssignmentId) -> FormsResult<&Assignment> {
        self.assignments
            .get(&id)
            .ok_or_else(|| FormsError::not_found("assignment", id))
    }

    // ── Capability checks ────────────────────────────────────────────

    /// True iff a live fill-type grant covers the principal as of `as_of`.
    pub fn can_fill(
        &self,
        form_id: FormId,
        user: &UserId,
        office_kind: OfficeKind,
        office_code: &OfficeCode,
        as_of: DateTime<Utc>,
    ) -> bool {
        self.has_live_grant(form_id, user, office_kind, office_code, as_of, |a| {
            a.purpose.allows_fill()
        })
    }

    /// True iff a live grant covering the principal allows reviewing,
    /// through its purpose or its capability flags.
    pub fn can_review(
        &self,
        form_id: FormId,
        user: &UserId,
        office_kind: OfficeKind,
        office_code: &OfficeCode,
        as_of: DateTime<Utc>,
    ) -> bool {
        self.has_live_grant(form_id, user, office_kind, office_code, as_of, |a| {
            a.grants_review()
        })
    }

    /// True iff a live grant covering the principal carries the delete flag.
    pub fn can_delete(
        &self,
        form_id: FormId,
        user: &UserId,
        office_kind: OfficeKind,
        office_code: &OfficeCode,
        as_of: DateTime<Utc>,
    ) -> bool {
        self.has_live_grant(form_id, user, office_kind, office_code, as_of, |a| {
            a.capabilities.can_delete
        })
    }

    /// True iff a live grant covering the principal carries the edit flag.
    pub fn can_edit(
        &self,
        form_id: FormId,
        user: &UserId,
        office_kind: OfficeKind,
        office_code: &OfficeCode,
        as_of: DateTime<Utc>,
    ) -> bool {
        self.has_live_grant(form_id, user, office_kind, office_code, as_of, |a| {
            a.capabilities.can_edit
        })
    }

    fn has_live_grant(
        &self,
        form_id: FormId,
        user: &UserId,
        office_kind: OfficeKind,
        office_code: &OfficeCode,
        as_of: DateTime<Utc>,
        allows: impl Fn(&Assignment) -> bool,
    ) -> bool {
        self.for_form(form_id).any(|assignment| {
            assignment.is_live_at(as_of)
                && assignment.target.matches(user, office_kind, office_code)
                && allows(assignment)
        })
    }

    // ── Listings ─────────────────────────────────────────────────────

    /// Forms an office can fill right now: active, entity-kind compatible,
    /// inside their activation window as of `as_of`, and covered by a live
    /// fill-type grant to the office.
    pub fn list_assigned_forms<'a>(
        &self,
        catalog: &'a FormCatalog,
        office_kind: OfficeKind,
        office_code: &OfficeCode,
        entity_kind: EntityKind,
        as_of: DateTime<Utc>,
    ) -> Vec<&'a Form> {
        let mut form_ids: Vec<FormId> = self
            .assignments
            .values()
            .filter(|a| {
                a.is_live_at(as_of)
                    && a.purpose.allows_fill()
                    && a.target
                        .office
                        .as_ref()
                        .is_some_and(|o| o.kind == office_kind && &o.code == office_code)
            })
            .map(|a| a.form_id)
            .collect();
        form_ids.sort();
        form_ids.dedup();

        form_ids
            .into_iter()
            .filter_map(|id| catalog.get_form(id).ok())
            .filter(|form| form.is_open_at(as_of))
            .filter(|form| form.entity_kind.accepts(entity_kind))
            .collect()
    }

    /// Every grant ever made for a form, expired rows included.
    pub fn assignments_for_form(&self, form_id: FormId) -> Vec<&Assignment> {
        let mut rows: Vec<&Assignment> = self.for_form(form_id).collect();
        rows.sort_by_key(|a| a.id);
        rows
    }

    /// Every grant naming this user specifically, expired rows included.
    pub fn assignments_for_user(&self, user: &UserId) -> Vec<&Assignment> {
        let mut rows: Vec<&Assignment> = self
            .assignments
            .values()
            .filter(|a| a.target.user.as_ref() == Some(user))
            .collect();
        rows.sort_by_key(|a| a.id);
        rows
    }

    // ── Cascade support ──────────────────────────────────────────────

    /// Drop every grant of a form. Used by the engine's form-delete cascade.
    pub fn remove_for_form(&mut self, form_id: FormId) -> usize {
        let ids = self.by_form.remove(&form_id).unwrap_or_default();
        for id in &ids {
            self.assignments.remove(id);
        }
        if !ids.is_empty() {
            tracing::info!(form_id = %form_id, count = ids.len(), "assignments removed with form");
        }
        ids.len()
    }

    /// Re-issue every live grant of one form against another. Used when a
    /// form is duplicated with assignments requested.
    pub fn clone_for_form(&mut self, from: FormId, to: FormId, granted_by: UserId) -> usize {
        let now = Utc::now();
        let grants: Vec<NewAssignment> = self
            .for_form(from)
            .filter(|a| a.is_live_at(now))
            .map(|a| NewAssignment {
                form_id: to,
                target: a.target.clone(),
                purpose: a.purpose,
                capabilities: a.capabilities,
                expires_at: a.expires_at,
            })
            .collect();
        let mut cloned = 0;
        for grant in grants {
            if self.assign(grant, granted_by.clone()).is_ok() {
                cloned += 1;
            }
        }
        cloned
    }

    pub fn count(&self) -> usize {
        self.assignments.len()
    }

    fn for_form(&self, form_id: FormId) -> impl Iterator<Item = &Assignment> {
        self.by_form
            .get(&form_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.assignments.get(id))
    }
}
