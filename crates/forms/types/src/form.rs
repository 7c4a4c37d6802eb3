//! Form definitions: what a data-collection form is, independent of its fields
//!
//! Forms are soft-lifecycled: `is_active` marks whether a form is live, and
//! an optional activation window bounds when it may be filled. A form outside
//! its window is fillable by nobody, regardless of assignments.

use crate::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormId(pub u64);

impl std::fmt::Display for FormId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of registry entity a form targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Family,
    Member,
    /// The form may be filled against either a family or a member.
    Both,
}

impl EntityKind {
    /// Whether a form targeting `self` accepts an entity of `other`'s kind.
    pub fn accepts(&self, other: EntityKind) -> bool {
        match self {
            EntityKind::Both => true,
            kind => *kind == other || other == EntityKind::Both,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Family => write!(f, "family"),
            EntityKind::Member => write!(f, "member"),
            EntityKind::Both => write!(f, "both"),
        }
    }
}

/// A form definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    /// Human code, unique across all forms, case-sensitive.
    pub code: String,
    pub name: String,
    pub description: String,
    /// Free-text category tag for grouping in listings.
    pub category: String,
    pub entity_kind: EntityKind,
    pub is_active: bool,
    /// Start of the activation window, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_from: Option<DateTime<Utc>>,
    /// End of the activation window, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_until: Option<DateTime<Utc>>,
    /// Maximum submissions per entity; 0 means unlimited.
    pub max_submissions: u32,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Form {
    /// Whether the form is fillable at `instant`: active and inside its
    /// activation window. Assignments cannot override this.
    pub fn is_open_at(&self, instant: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(from) = self.active_from {
            if instant < from {
                return false;
            }
        }
        if let Some(until) = self.active_until {
            if instant > until {
                return false;
            }
        }
        true
    }
}

/// Input for creating a form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewForm {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub entity_kind: EntityKind,
    /// New forms default to active unless stated otherwise.
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_submissions: u32,
}

fn default_active() -> bool {
    true
}

impl NewForm {
    pub fn new(code: impl Into<String>, name: impl Into<String>, entity_kind: EntityKind) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: String::new(),
            category: String::new(),
            entity_kind,
            is_active: true,
            active_from: None,
            active_until: None,
            max_submissions: 0,
        }
    }

    pub fn with_window(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.active_from = Some(from);
        self.active_until = Some(until);
        self
    }

    pub fn with_max_submissions(mut self, max: u32) -> Self {
        self.max_submissions = max;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Partial update for a form. Outer `None` leaves the attribute unchanged;
/// for the optional window bounds, `Some(None)` clears the bound.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FormPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub entity_kind: Option<EntityKind>,
    pub is_active: Option<bool>,
    pub active_from: Option<Option<DateTime<Utc>>>,
    pub active_until: Option<Option<DateTime<Utc>>>,
    pub max_submissions: Option<u32>,
}
