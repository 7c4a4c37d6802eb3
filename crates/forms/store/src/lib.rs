//! Submission store: one append-only version chain per (form, entity)
//!
//! Rows are never rewritten across versions. Opening a new version clears
//! the prior latest row's flag and inserts `version = prev + 1` in one
//! exclusive `&mut self` call, so the two writes can never interleave with
//! another writer. That exclusive call is the per-chain critical section
//! the version-bump invariant requires. A storage backend replacing this
//! one must keep an
//! equivalent guarantee (a per-chain lock, or a unique partial index on
//! `(form, entity, is_latest)`).
//!
//! The store enforces chain-shape invariants only. Whether a transition or
//! a write is allowed for a given principal is the engine's decision.

#![deny(unsafe_code)]

use chrono::Utc;
use forms_types::{
    EntityRef, FieldId, FormId, FormsError, FormsResult, OfficeCode, Response, ResponseValue,
    Submission, SubmissionId, SubmissionQuery, SubmissionStatus, UserId,
};
use std::collections::{BTreeMap, HashMap};

type ChainKey = (FormId, EntityRef);

/// In-memory store of submission chains and their responses.
#[derive(Clone, Debug, Default)]
pub struct SubmissionStore {
    submissions: HashMap<SubmissionId, Submission>,
    /// Version chains in ascending version order.
    chains: HashMap<ChainKey, Vec<SubmissionId>>,
    responses: HashMap<SubmissionId, BTreeMap<FieldId, Response>>,
    next_id: u64,
}

impl SubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Version chain ────────────────────────────────────────────────

    /// Open the next version of the (form, entity) chain as a draft: version
    /// 1 for a fresh chain, otherwise the prior latest row's flag is cleared
    /// and `version = prev + 1` inserted in the same call.
    pub fn open_version(
        &mut self,
        form_id: FormId,
        entity: EntityRef,
        office_code: OfficeCode,
        submitted_by: UserId,
        total_fields: u32,
    ) -> FormsResult<SubmissionId> {
        let key = (form_id, entity);
        let prior_id = self.chains.get(&key).and_then(|chain| chain.last()).copied();
        let version = match prior_id {
            None => 1,
            Some(prior_id) => {
                let prior = self.submissions.get_mut(&prior_id).ok_or_else(|| {
                    FormsError::Persistence(format!(
                        "chain references missing submission {}",
                        prior_id
                    ))
                })?;
                prior.is_latest = false;
                prior.updated_at = Utc::now();
                prior.version + 1
            }
        };

        self.next_id += 1;
        let id = SubmissionId(self.next_id);
        let now = Utc::now();
        let submission = Submission {
            id,
            form_id,
            entity,
            office_code,
            submitted_by,
            status: SubmissionStatus::Draft,
            total_fields,
            completed_fields: 0,
            submitted_at: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            version,
            is_latest: true,
            created_at: now,
            updated_at: now,
        };
        self.chains.entry(key).or_default().push(id);
        self.submissions.insert(id, submission);

        tracing::info!(submission_id = %id, form_id = %form_id, version, "submission version opened");
        Ok(id)
    }

    pub fn get(&self, id: SubmissionId) -> FormsResult<&Submission> {
        self.submissions
            .get(&id)
            .ok_or_else(|| FormsError::not_found("submission", id))
    }

    /// Mutable row access for the engine. Chain fields (`version`,
    /// `is_latest`) must not be touched through this; use the chain
    /// operations instead.
    pub fn get_mut(&mut self, id: SubmissionId) -> FormsResult<&mut Submission> {
        self.submissions
            .get_mut(&id)
            .ok_or_else(|| FormsError::not_found("submission", id))
    }

    /// The latest row of a chain, if the chain exists.
    pub fn latest(&self, form_id: FormId, entity: EntityRef) -> Option<&Submission> {
        self.chains
            .get(&(form_id, entity))
            .and_then(|chain| chain.last())
            .and_then(|id| self.submissions.get(id))
    }

    /// Full chain history, ascending by version.
    pub fn history(&self, form_id: FormId, entity: EntityRef) -> Vec<&Submission> {
        self.chains
            .get(&(form_id, entity))
            .map(|chain| {
                chain
                    .iter()
                    .filter_map(|id| self.submissions.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of rows in the (form, entity) chain.
    pub fn chain_len(&self, form_id: FormId, entity: EntityRef) -> usize {
        self.chains.get(&(form_id, entity)).map_or(0, Vec::len)
    }

    /// Number of rows a user has recorded against a form, across entities.
    pub fn count_by_user(&self, form_id: FormId, user: &UserId) -> usize {
        self.submissions
            .values()
            .filter(|s| s.form_id == form_id && &s.submitted_by == user)
            .count()
    }

    /// Whether any submission exists for the form. Guards form deletion.
    pub fn form_has_submissions(&self, form_id: FormId) -> bool {
        self.submissions.values().any(|s| s.form_id == form_id)
    }

    // ── Responses ────────────────────────────────────────────────────

    /// Record a value against a field. An existing (submission, field) pair
    /// is replaced, never duplicated.
    pub fn upsert_response(
        &mut self,
        id: SubmissionId,
        field_id: FieldId,
        value: ResponseValue,
    ) -> FormsResult<()> {
        if !self.submissions.contains_key(&id) {
            return Err(FormsError::not_found("submission", id));
        }
        self.responses.entry(id).or_default().insert(
            field_id,
            Response {
                submission_id: id,
                field_id,
                value,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn response(&self, id: SubmissionId, field_id: FieldId) -> Option<&Response> {
        self.responses.get(&id).and_then(|map| map.get(&field_id))
    }

    /// All responses of a submission, in field-id order.
    pub fn responses(&self, id: SubmissionId) -> Vec<&Response> {
        self.responses
            .get(&id)
            .map(|map| map.values().collect())
            .unwrap_or_default()
    }

    /// Recompute and persist the row's completed-field count from its
    /// non-empty responses. Returns the new count.
    pub fn recount_completed(&mut self, id: SubmissionId) -> FormsResult<u32> {
        let completed = self
            .responses
            .get(&id)
            .map(|map| map.values().filter(|r| !r.value.is_empty()).count() as u32)
            .unwrap_or(0);
        let submission = self
            .submissions
            .get_mut(&id)
            .ok_or_else(|| FormsError::not_found("submission", id))?;
        submission.completed_fields = completed;
        submission.updated_at = Utc::now();
        Ok(completed)
    }

    /// Whether any response anywhere references the field. Guards field
    /// deletion.
    pub fn field_referenced(&self, field_id: FieldId) -> bool {
        self.responses
            .values()
            .any(|map| map.contains_key(&field_id))
    }

    // ── Deletion ─────────────────────────────────────────────────────

    /// Delete one row and its responses together. If the deleted row was
    /// the latest of a longer chain, the prior version becomes latest again
    /// so the one-latest invariant holds.
    pub fn delete_submission(&mut self, id: SubmissionId) -> FormsResult<Submission> {
        let submission = self
            .submissions
            .remove(&id)
            .ok_or_else(|| FormsError::not_found("submission", id))?;
        self.responses.remove(&id);

        let key = (submission.form_id, submission.entity);
        let new_last = match self.chains.get_mut(&key) {
            Some(chain) => {
                chain.retain(|existing| *existing != id);
                chain.last().copied()
            }
            None => None,
        };
        match new_last {
            None => {
                self.chains.remove(&key);
            }
            Some(last) if submission.is_latest => {
                if let Some(row) = self.submissions.get_mut(&last) {
                    row.is_latest = true;
                    row.updated_at = Utc::now();
                }
            }
            Some(_) => {}
        }

        tracing::info!(submission_id = %id, "submission deleted");
        Ok(submission)
    }

    /// Drop every chain of a form, responses before rows. Used by the
    /// engine's form-delete cascade.
    pub fn purge_form(&mut self, form_id: FormId) -> usize {
        let ids: Vec<SubmissionId> = self
            .submissions
            .values()
            .filter(|s| s.form_id == form_id)
            .map(|s| s.id)
            .collect();
        for id in &ids {
            self.responses.remove(id);
        }
        for id in &ids {
            self.submissions.remove(id);
        }
        self.chains.retain(|(form, _), _| *form != form_id);
        if !ids.is_empty() {
            tracing::info!(form_id = %form_id, count = ids.len(), "submissions purged with form");
        }
        ids.len()
    }

    // ── Listing ──────────────────────────────────────────────────────

    /// Rows matching the query, ordered by id.
    pub fn list(&self, query: &SubmissionQuery) -> Vec<&Submission> {
        let mut rows: Vec<&Submission> = self
            .submissions
            .values()
            .filter(|s| query.form_id.map_or(true, |form| s.form_id == form))
            .filter(|s| query.status.map_or(true, |status| s.status == status))
            .filter(|s| {
                query
                    .office_code
                    .as_ref()
                    .map_or(true, |office| &s.office_code == office)
            })
            .filter(|s| {
                query
                    .entity_kind
                    .map_or(true, |kind| s.entity.kind() == kind)
            })
            .filter(|s| !query.latest_only || s.is_latest)
            .collect();
        rows.sort_by_key(|s| s.id);
        query.page.apply(rows)
    }

    pub fn count(&self) -> usize {
        self.submissions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forms_types::{FamilyId, StoredFile};

    fn officer() -> UserId {
        UserId::new("officer-7")
    }

    fn office() -> OfficeCode {
        OfficeCode::new("DV-01")
    }

    fn family(n: u64) -> EntityRef {
        EntityRef::Family(FamilyId(n))
    }

    #[test]
    fn test_first_version_is_one_and_latest() {
        let mut store = SubmissionStore::new();
        let id = store
            .open_version(FormId(1), family(10), office(), officer(), 3)
            .unwrap();
        let row = store.get(id).unwrap();
        assert_eq!(row.version, 1);
        assert!(row.is_latest);
        assert_eq!(row.status, SubmissionStatus::Draft);
        assert!(row.submitted_at.is_none());
    }

    #[test]
    fn test_version_bump_flips_prior_latest() {
        let mut store = SubmissionStore::new();
        let v1 = store
            .open_version(FormId(1), family(10), office(), officer(), 3)
            .unwrap();
        let v2 = store
            .open_version(FormId(1), family(10), office(), officer(), 3)
            .unwrap();

        assert_eq!(store.get(v1).unwrap().version, 1);
        assert!(!store.get(v1).unwrap().is_latest);
        assert_eq!(store.get(v2).unwrap().version, 2);
        assert!(store.get(v2).unwrap().is_latest);
        assert_eq!(store.latest(FormId(1), family(10)).unwrap().id, v2);
        assert_eq!(store.chain_len(FormId(1), family(10)), 2);
    }

    #[test]
    fn test_terminal_row_keeps_status_when_superseded() {
        let mut store = SubmissionStore::new();
        let v1 = store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();
        store
            .get_mut(v1)
            .unwrap()
            .mark_reviewed(SubmissionStatus::Approved, UserId::new("reviewer"), None);

        let v2 = store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();
        let old = store.get(v1).unwrap();
        assert_eq!(old.status, SubmissionStatus::Approved);
        assert!(!old.is_latest);
        let new = store.get(v2).unwrap();
        assert_eq!(new.status, SubmissionStatus::Draft);
        assert!(new.is_latest);
    }

    #[test]
    fn test_chains_are_independent() {
        let mut store = SubmissionStore::new();
        store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();
        let other = store
            .open_version(FormId(1), family(11), office(), officer(), 1)
            .unwrap();
        assert_eq!(store.get(other).unwrap().version, 1);

        let member = EntityRef::Member {
            member: forms_types::MemberId(5),
            family: FamilyId(10),
        };
        let third = store
            .open_version(FormId(1), member, office(), officer(), 1)
            .unwrap();
        assert_eq!(store.get(third).unwrap().version, 1);
    }

    #[test]
    fn test_response_upsert_replaces() {
        let mut store = SubmissionStore::new();
        let id = store
            .open_version(FormId(1), family(10), office(), officer(), 2)
            .unwrap();
        store
            .upsert_response(id, FieldId(1), ResponseValue::Text("first".into()))
            .unwrap();
        store
            .upsert_response(id, FieldId(1), ResponseValue::Text("second".into()))
            .unwrap();

        assert_eq!(store.responses(id).len(), 1);
        assert_eq!(
            store.response(id, FieldId(1)).unwrap().value,
            ResponseValue::Text("second".into())
        );
        assert!(store.field_referenced(FieldId(1)));
        assert!(!store.field_referenced(FieldId(2)));
    }

    #[test]
    fn test_recount_skips_empty_values() {
        let mut store = SubmissionStore::new();
        let id = store
            .open_version(FormId(1), family(10), office(), officer(), 3)
            .unwrap();
        store
            .upsert_response(id, FieldId(1), ResponseValue::Text("filled".into()))
            .unwrap();
        store
            .upsert_response(id, FieldId(2), ResponseValue::Text("   ".into()))
            .unwrap();
        store
            .upsert_response(
                id,
                FieldId(3),
                ResponseValue::File(StoredFile {
                    path: "uploads/x".into(),
                    original_name: "scan.pdf".into(),
                    size: 9,
                    content_type: "application/pdf".into(),
                }),
            )
            .unwrap();

        assert_eq!(store.recount_completed(id).unwrap(), 2);
        assert_eq!(store.get(id).unwrap().completed_fields, 2);
    }

    #[test]
    fn test_delete_latest_restores_prior() {
        let mut store = SubmissionStore::new();
        let v1 = store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();
        let v2 = store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();

        store.delete_submission(v2).unwrap();
        let row = store.get(v1).unwrap();
        assert!(row.is_latest);
        assert_eq!(store.latest(FormId(1), family(10)).unwrap().id, v1);

        store.delete_submission(v1).unwrap();
        assert!(store.latest(FormId(1), family(10)).is_none());
        assert_eq!(store.chain_len(FormId(1), family(10)), 0);

        // A fresh chain starts over at version 1.
        let fresh = store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();
        assert_eq!(store.get(fresh).unwrap().version, 1);
    }

    #[test]
    fn test_purge_form_removes_rows_and_responses() {
        let mut store = SubmissionStore::new();
        let keep = store
            .open_version(FormId(2), family(10), office(), officer(), 1)
            .unwrap();
        let id = store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();
        store
            .upsert_response(id, FieldId(1), ResponseValue::Text("x".into()))
            .unwrap();

        assert_eq!(store.purge_form(FormId(1)), 1);
        assert!(!store.form_has_submissions(FormId(1)));
        assert!(store.responses(id).is_empty());
        assert!(store.get(keep).is_ok());
    }

    #[test]
    fn test_list_query() {
        let mut store = SubmissionStore::new();
        let a = store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();
        store
            .open_version(FormId(1), family(10), office(), officer(), 1)
            .unwrap();
        store
            .open_version(FormId(2), family(11), OfficeCode::new("DV-02"), officer(), 1)
            .unwrap();
        store.get_mut(a).unwrap().mark_submitted();

        assert_eq!(store.list(&SubmissionQuery::default()).len(), 3);
        assert_eq!(store.list(&SubmissionQuery::latest()).len(), 2);
        assert_eq!(store.list(&SubmissionQuery::for_form(FormId(1))).len(), 2);
        assert_eq!(
            store
                .list(&SubmissionQuery::default().with_status(SubmissionStatus::Submitted))
                .len(),
            1
        );
        assert_eq!(
            store
                .list(&SubmissionQuery::default().with_office(OfficeCode::new("DV-02")))
                .len(),
            1
        );
    }

    mod chain_invariants {
        use super::*;
        use proptest::prelude::*;

        /// Random interleavings of opens and deletes across a handful of
        /// chains must preserve: exactly one latest row per surviving chain,
        /// and chain versions strictly increasing.
        #[derive(Debug, Clone)]
        enum Op {
            Open { form: u64, fam: u64 },
            DeleteLatest { form: u64, fam: u64 },
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1u64..3, 1u64..4).prop_map(|(form, fam)| Op::Open { form, fam }),
                (1u64..3, 1u64..4).prop_map(|(form, fam)| Op::DeleteLatest { form, fam }),
            ]
        }

        proptest! {
            #[test]
            fn chain_shape_holds(ops in proptest::collection::vec(op_strategy(), 1..40)) {
                let mut store = SubmissionStore::new();
                for op in ops {
                    match op {
                        Op::Open { form, fam } => {
                            store
                                .open_version(
                                    FormId(form),
                                    family(fam),
                                    office(),
                                    officer(),
                                    1,
                                )
                                .unwrap();
                        }
                        Op::DeleteLatest { form, fam } => {
                            if let Some(id) =
                                store.latest(FormId(form), family(fam)).map(|s| s.id)
                            {
                                store.delete_submission(id).unwrap();
                            }
                        }
                    }

                    for form in 1..3u64 {
                        for fam in 1..4u64 {
                            let chain = store.history(FormId(form), family(fam));
                            let latest_count =
                                chain.iter().filter(|s| s.is_latest).count();
                            if chain.is_empty() {
                                prop_assert_eq!(latest_count, 0);
                            } else {
                                prop_assert_eq!(latest_count, 1);
                                prop_assert!(chain.last().unwrap().is_latest);
                                for pair in chain.windows(2) {
                                    prop_assert!(pair[0].version < pair[1].version);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
