//! Field schemas: the typed, orderable building blocks of a form
//!
//! Each field has a kind and a kind-specific option payload. The payload is
//! decoded into [`FieldOptions`] once, at the catalog boundary; downstream
//! code matches on the variant instead of re-interpreting a loose blob.

use crate::{FormsError, FormsResult};
use serde::{Deserialize, Serialize};

/// Unique identifier for a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub u64);

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The enumerated set of field kinds a form may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    TextArea,
    Number,
    Date,
    Radio,
    Checkbox,
    Dropdown,
    Email,
    Phone,
    YesNo,
    File,
    Rating,
}

impl FieldKind {
    /// Kinds whose options carry a choice list.
    pub fn is_choice(&self) -> bool {
        matches!(self, Self::Radio | Self::Checkbox | Self::Dropdown)
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::TextArea => "text_area",
            FieldKind::Number => "number",
            FieldKind::Date => "date",
            FieldKind::Radio => "radio",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Dropdown => "dropdown",
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::YesNo => "yes_no",
            FieldKind::File => "file",
            FieldKind::Rating => "rating",
        };
        write!(f, "{}", name)
    }
}

/// Kind-specific option payload, one variant per family of kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "options", rename_all = "snake_case")]
pub enum FieldOptions {
    /// Kinds that take no options (date, email, phone, yes/no).
    None,
    /// Length constraint for text and multiline text.
    Text { max_length: Option<u32> },
    /// Numeric bounds.
    Number { min: Option<f64>, max: Option<f64> },
    /// Rating scale, inclusive.
    Rating { min: u32, max: u32 },
    /// Choice list for radio, checkbox, and dropdown kinds.
    Choice { choices: Vec<String> },
    /// Accepted content types and size ceiling for file kinds.
    File {
        accepted_types: Vec<String>,
        max_bytes: Option<u64>,
    },
}

impl FieldOptions {
    /// The default payload for a kind.
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Text | FieldKind::TextArea => Self::Text { max_length: None },
            FieldKind::Number => Self::Number {
                min: None,
                max: None,
            },
            FieldKind::Rating => Self::Rating { min: 1, max: 5 },
            FieldKind::Radio | FieldKind::Checkbox | FieldKind::Dropdown => {
                Self::Choice { choices: vec![] }
            }
            FieldKind::File => Self::File {
                accepted_types: vec![],
                max_bytes: None,
            },
            _ => Self::None,
        }
    }

    /// Check that this payload is the one meaningful for `kind`.
    pub fn check_kind(&self, kind: FieldKind) -> FormsResult<()> {
        let ok = match self {
            Self::None => matches!(
                kind,
                FieldKind::Date | FieldKind::Email | FieldKind::Phone | FieldKind::YesNo
            ),
            Self::Text { .. } => matches!(kind, FieldKind::Text | FieldKind::TextArea),
            Self::Number { .. } => kind == FieldKind::Number,
            Self::Rating { .. } => kind == FieldKind::Rating,
            Self::Choice { .. } => kind.is_choice(),
            Self::File { .. } => kind == FieldKind::File,
        };
        if ok {
            Ok(())
        } else {
            Err(FormsError::Validation(format!(
                "options payload does not match field kind '{}'",
                kind
            )))
        }
    }
}

/// A field belonging to a form's schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: FieldId,
    /// Owning form.
    pub form_id: crate::FormId,
    /// Unique within the owning form, case-sensitive.
    pub code: String,
    pub label: String,
    pub kind: FieldKind,
    pub options: FieldOptions,
    pub required: bool,
    /// Display/validation ordering. Values need not be contiguous.
    pub display_order: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    /// Conditional-visibility expression, evaluated by the rendering layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<String>,
}

/// Input for adding a field to a form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewField {
    pub code: String,
    pub label: String,
    pub kind: FieldKind,
    /// Defaults to [`FieldOptions::default_for`] the kind when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<FieldOptions>,
    pub required: bool,
    pub display_order: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<String>,
}

impl NewField {
    pub fn new(code: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
            kind,
            options: None,
            required: false,
            display_order: 0,
            default_value: None,
            placeholder: None,
            help_text: None,
            visible_when: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.display_order = order;
        self
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Partial update for a field. `None` leaves the attribute unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FieldPatch {
    pub code: Option<String>,
    pub label: Option<String>,
    pub kind: Option<FieldKind>,
    pub options: Option<FieldOptions>,
    pub required: Option<bool>,
    pub display_order: Option<i32>,
    pub default_value: Option<Option<String>>,
    pub placeholder: Option<Option<String>>,
    pub help_text: Option<Option<String>>,
    pub visible_when: Option<Option<String>>,
}
