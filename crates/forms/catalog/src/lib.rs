//! Form catalog: owns form definitions and their field schemas
//!
//! The catalog is the single authority for form codes (unique,
//! case-sensitive) and per-form field codes. Mutations validate everything
//! before touching state, so a failed call never leaves a partial write.
//!
//! Guards that depend on other components ("has this form submissions",
//! "does any response reference this field") are composed by the engine,
//! which calls the catalog's removal primitives only after those checks
//! pass. Used standalone, [`FormCatalog::remove_form`] and
//! [`FormCatalog::remove_field`] are unguarded cascade primitives.

#![deny(unsafe_code)]

use chrono::Utc;
use forms_types::{
    FieldDefinition, FieldId, FieldPatch, Form, FormId, FormPatch, FormQuery, FormsError,
    FormsResult, NewField, NewForm, UserId,
};
use std::collections::HashMap;

/// Registry of forms and their field schemas.
#[derive(Clone, Debug, Default)]
pub struct FormCatalog {
    forms: HashMap<FormId, Form>,
    fields: HashMap<FieldId, FieldDefinition>,
    /// Field ids per form, in insertion order. Display order lives on the
    /// fields themselves.
    form_fields: HashMap<FormId, Vec<FieldId>>,
    /// code → form id, the uniqueness index.
    by_code: HashMap<String, FormId>,
    next_form_id: u64,
    next_field_id: u64,
}

impl FormCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Form operations ──────────────────────────────────────────────

    /// Create a form. Fails with `Validation` on missing attributes and
    /// `Conflict` on a duplicate code.
    pub fn create_form(&mut self, new: NewForm, created_by: UserId) -> FormsResult<FormId> {
        if new.code.trim().is_empty() {
            return Err(FormsError::Validation("form code must not be empty".into()));
        }
        if new.name.trim().is_empty() {
            return Err(FormsError::Validation("form name must not be empty".into()));
        }
        if let (Some(from), Some(until)) = (new.active_from, new.active_until) {
            if until < from {
                return Err(FormsError::Validation(
                    "activation window must not end before it starts".into(),
                ));
            }
        }
        if self.by_code.contains_key(&new.code) {
            return Err(FormsError::Conflict(format!(
                "form code '{}' is already in use",
                new.code
            )));
        }

        self.next_form_id += 1;
        let id = FormId(self.next_form_id);
        let now = Utc::now();
        let form = Form {
            id,
            code: new.code.clone(),
            name: new.name,
            description: new.description,
            category: new.category,
            entity_kind: new.entity_kind,
            is_active: new.is_active,
            active_from: new.active_from,
            active_until: new.active_until,
            max_submissions: new.max_submissions,
            created_by,
            created_at: now,
            updated_at: now,
        };
        self.by_code.insert(new.code, id);
        self.forms.insert(id, form);
        self.form_fields.insert(id, Vec::new());

        tracing::info!(form_id = %id, "form created");
        Ok(id)
    }

    pub fn get_form(&self, id: FormId) -> FormsResult<&Form> {
        self.forms
            .get(&id)
            .ok_or_else(|| FormsError::not_found("form", id))
    }

    pub fn get_form_by_code(&self, code: &str) -> Option<&Form> {
        self.by_code.get(code).and_then(|id| self.forms.get(id))
    }

    /// Exact, case-sensitive code lookup.
    pub fn form_code_exists(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    /// Apply a partial update. Code uniqueness is re-checked only when the
    /// code actually changes; the update timestamp is always stamped.
    pub fn update_form(&mut self, id: FormId, patch: FormPatch) -> FormsResult<()> {
        if !self.forms.contains_key(&id) {
            return Err(FormsError::not_found("form", id));
        }
        if let Some(code) = &patch.code {
            if code.trim().is_empty() {
                return Err(FormsError::Validation("form code must not be empty".into()));
            }
            let current = &self.forms[&id].code;
            if code != current && self.by_code.contains_key(code) {
                return Err(FormsError::Conflict(format!(
                    "form code '{}' is already in use",
                    code
                )));
            }
        }
        {
            let current = &self.forms[&id];
            let from = patch.active_from.unwrap_or(current.active_from);
            let until = patch.active_until.unwrap_or(current.active_until);
            if let (Some(from), Some(until)) = (from, until) {
                if until < from {
                    return Err(FormsError::Validation(
                        "activation window must not end before it starts".into(),
                    ));
                }
            }
        }

        if let Some(code) = &patch.code {
            let current = self.forms[&id].code.clone();
            if code != &current {
                self.by_code.remove(&current);
                self.by_code.insert(code.clone(), id);
            }
        }
        let form = self
            .forms
            .get_mut(&id)
            .ok_or_else(|| FormsError::not_found("form", id))?;
        if let Some(code) = patch.code {
            form.code = code;
        }
        if let Some(name) = patch.name {
            form.name = name;
        }
        if let Some(description) = patch.description {
            form.description = description;
        }
        if let Some(category) = patch.category {
            form.category = category;
        }
        if let Some(entity_kind) = patch.entity_kind {
            form.entity_kind = entity_kind;
        }
        if let Some(is_active) = patch.is_active {
            form.is_active = is_active;
        }
        if let Some(active_from) = patch.active_from {
            form.active_from = active_from;
        }
        if let Some(active_until) = patch.active_until {
            form.active_until = active_until;
        }
        if let Some(max) = patch.max_submissions {
            form.max_submissions = max;
        }
        form.updated_at = Utc::now();

        tracing::info!(form_id = %id, "form updated");
        Ok(())
    }

    /// Remove a form and its fields, fields first. Unguarded: the caller is
    /// responsible for refusing the cascade while submissions exist.
    pub fn remove_form(&mut self, id: FormId) -> FormsResult<Form> {
        if !self.forms.contains_key(&id) {
            return Err(FormsError::not_found("form", id));
        }
        for field_id in self.form_fields.remove(&id).unwrap_or_default() {
            self.fields.remove(&field_id);
        }
        let form = self
            .forms
            .remove(&id)
            .ok_or_else(|| FormsError::not_found("form", id))?;
        self.by_code.remove(&form.code);

        tracing::info!(form_id = %id, code = %form.code, "form removed");
        Ok(form)
    }

    /// Deep-clone a form and its fields under a fresh `<code>_copy<n>` code,
    /// incrementing `n` until free. The copy starts inactive with a cleared
    /// activation window.
    pub fn duplicate_form(&mut self, id: FormId, created_by: UserId) -> FormsResult<FormId> {
        let original = self.get_form(id)?.clone();
        let code = self.free_copy_code(&original.code);

        let mut new = NewForm::new(code, original.name.clone(), original.entity_kind);
        new.description = original.description.clone();
        new.category = original.category.clone();
        new.is_active = false;
        new.max_submissions = original.max_submissions;
        let copy_id = self.create_form(new, created_by)?;

        let fields: Vec<FieldDefinition> = self.fields_of(id).into_iter().cloned().collect();
        for field in fields {
            let clone = NewField {
                code: field.code.clone(),
                label: field.label.clone(),
                kind: field.kind,
                options: Some(field.options.clone()),
                required: field.required,
                display_order: field.display_order,
                default_value: field.default_value.clone(),
                placeholder: field.placeholder.clone(),
                help_text: field.help_text.clone(),
                visible_when: field.visible_when.clone(),
            };
            // Codes were unique on the original, so they are on the copy.
            self.add_field(copy_id, clone)?;
        }

        tracing::info!(form_id = %id, copy_id = %copy_id, "form duplicated");
        Ok(copy_id)
    }

    fn free_copy_code(&self, original: &str) -> String {
        let mut n = 1;
        loop {
            let candidate = format!("{}_copy{}", original, n);
            if !self.by_code.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// List forms matching the query, ordered by id.
    pub fn list_forms(&self, query: &FormQuery) -> Vec<&Form> {
        let mut rows: Vec<&Form> = self
            .forms
            .values()
            .filter(|form| !query.active_only || form.is_active)
            .filter(|form| {
                query
                    .entity_kind
                    .map_or(true, |kind| form.entity_kind.accepts(kind))
            })
            .filter(|form| {
                query
                    .category
                    .as_ref()
                    .map_or(true, |category| &form.category == category)
            })
            .filter(|form| match &query.needle {
                None => true,
                Some(needle) => {
                    let needle = needle.to_lowercase();
                    form.code.to_lowercase().contains(&needle)
                        || form.name.to_lowercase().contains(&needle)
                }
            })
            .collect();
        rows.sort_by_key(|form| form.id);
        query.page.apply(rows)
    }

    pub fn form_count(&self) -> usize {
        self.forms.len()
    }

    // ── Field operations ─────────────────────────────────────────────

    /// Add a field to a form. The options payload, when supplied, must match
    /// the field kind; otherwise the kind's default payload is used.
    pub fn add_field(&mut self, form_id: FormId, new: NewField) -> FormsResult<FieldId> {
        self.get_form(form_id)?;
        if new.code.trim().is_empty() {
            return Err(FormsError::Validation(
                "field code must not be empty".into(),
            ));
        }
        if new.label.trim().is_empty() {
            return Err(FormsError::Validation(
                "field label must not be empty".into(),
            ));
        }
        if self.field_code_in_form(form_id, &new.code).is_some() {
            return Err(FormsError::Conflict(format!(
                "field code '{}' is already in use on this form",
                new.code
            )));
        }
        let options = match new.options {
            Some(options) => {
                options.check_kind(new.kind)?;
                options
            }
            None => forms_types::FieldOptions::default_for(new.kind),
        };

        self.next_field_id += 1;
        let id = FieldId(self.next_field_id);
        let field = FieldDefinition {
            id,
            form_id,
            code: new.code,
            label: new.label,
            kind: new.kind,
            options,
            required: new.required,
            display_order: new.display_order,
            default_value: new.default_value,
            placeholder: new.placeholder,
            help_text: new.help_text,
            visible_when: new.visible_when,
        };
        self.fields.insert(id, field);
        self.form_fields.entry(form_id).or_default().push(id);

        tracing::info!(form_id = %form_id, field_id = %id, "field added");
        Ok(id)
    }

    pub fn get_field(&self, id: FieldId) -> FormsResult<&FieldDefinition> {
        self.fields
            .get(&id)
            .ok_or_else(|| FormsError::not_found("field", id))
    }

    /// Apply a partial update to a field, re-validating code uniqueness
    /// within the form and options-kind agreement.
    pub fn update_field(&mut self, id: FieldId, patch: FieldPatch) -> FormsResult<()> {
        let current = self.get_field(id)?.clone();
        if let Some(code) = &patch.code {
            if code.trim().is_empty() {
                return Err(FormsError::Validation(
                    "field code must not be empty".into(),
                ));
            }
            if code != &current.code {
                if let Some(existing) = self.field_code_in_form(current.form_id, code) {
                    if existing != id {
                        return Err(FormsError::Conflict(format!(
                            "field code '{}' is already in use on this form",
                            code
                        )));
                    }
                }
            }
        }
        let kind = patch.kind.unwrap_or(current.kind);
        let options = match &patch.options {
            Some(options) => {
                options.check_kind(kind)?;
                Some(options.clone())
            }
            // A kind change without new options falls back to the kind's
            // defaults rather than keeping a mismatched payload.
            None if kind != current.kind => Some(forms_types::FieldOptions::default_for(kind)),
            None => None,
        };

        let field = self
            .fields
            .get_mut(&id)
            .ok_or_else(|| FormsError::not_found("field", id))?;
        if let Some(code) = patch.code {
            field.code = code;
        }
        if let Some(label) = patch.label {
            field.label = label;
        }
        field.kind = kind;
        if let Some(options) = options {
            field.options = options;
        }
        if let Some(required) = patch.required {
            field.required = required;
        }
        if let Some(order) = patch.display_order {
            field.display_order = order;
        }
        if let Some(default_value) = patch.default_value {
            field.default_value = default_value;
        }
        if let Some(placeholder) = patch.placeholder {
            field.placeholder = placeholder;
        }
        if let Some(help_text) = patch.help_text {
            field.help_text = help_text;
        }
        if let Some(visible_when) = patch.visible_when {
            field.visible_when = visible_when;
        }
        if let Some(form) = self.forms.get_mut(&current.form_id) {
            form.updated_at = Utc::now();
        }

        tracing::info!(field_id = %id, "field updated");
        Ok(())
    }

    /// Remove a field. Unguarded: the caller refuses the removal while
    /// responses reference the field.
    pub fn remove_field(&mut self, id: FieldId) -> FormsResult<FieldDefinition> {
        let field = self
            .fields
            .remove(&id)
            .ok_or_else(|| FormsError::not_found("field", id))?;
        if let Some(ids) = self.form_fields.get_mut(&field.form_id) {
            ids.retain(|existing| *existing != id);
        }
        tracing::info!(form_id = %field.form_id, field_id = %id, "field removed");
        Ok(field)
    }

    /// Renumber display order to match the given permutation of the form's
    /// fields. Every field of the form must appear exactly once.
    pub fn reorder_fields(&mut self, form_id: FormId, order: &[FieldId]) -> FormsResult<()> {
        self.get_form(form_id)?;
        let current = self.form_fields.get(&form_id).cloned().unwrap_or_default();
        if order.len() != current.len() {
            return Err(FormsError::Validation(format!(
                "reorder must list all {} fields of the form",
                current.len()
            )));
        }
        for field_id in order {
            if !current.contains(field_id) {
                return Err(FormsError::Validation(format!(
                    "field {} does not belong to this form",
                    field_id
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for field_id in order {
            if !seen.insert(field_id) {
                return Err(FormsError::Validation(format!(
                    "field {} listed more than once",
                    field_id
                )));
            }
        }

        for (position, field_id) in order.iter().enumerate() {
            if let Some(field) = self.fields.get_mut(field_id) {
                field.display_order = position as i32 + 1;
            }
        }
        if let Some(form) = self.forms.get_mut(&form_id) {
            form.updated_at = Utc::now();
        }

        tracing::info!(form_id = %form_id, "fields reordered");
        Ok(())
    }

    /// Fields of a form, ordered by display order then id.
    pub fn fields_of(&self, form_id: FormId) -> Vec<&FieldDefinition> {
        let mut fields: Vec<&FieldDefinition> = self
            .form_fields
            .get(&form_id)
            .map(|ids| ids.iter().filter_map(|id| self.fields.get(id)).collect())
            .unwrap_or_default();
        fields.sort_by_key(|field| (field.display_order, field.id));
        fields
    }

    /// Fields currently marked required on a form, in display order.
    pub fn required_fields(&self, form_id: FormId) -> Vec<&FieldDefinition> {
        self.fields_of(form_id)
            .into_iter()
            .filter(|field| field.required)
            .collect()
    }

    pub fn field_count(&self, form_id: FormId) -> usize {
        self.form_fields.get(&form_id).map_or(0, Vec::len)
    }

    fn field_code_in_form(&self, form_id: FormId, code: &str) -> Option<FieldId> {
        self.form_fields.get(&form_id).and_then(|ids| {
            ids.iter()
                .find(|id| self.fields.get(id).is_some_and(|f| f.code == code))
                .copied()
        })
    }
}
