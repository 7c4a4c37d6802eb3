//! Assignments: capability grants tying a form to a principal
//!
//! A grant names a form and a principal (an office, a specific user, or
//! both), the purpose it serves, and the capability flags it confers.
//! Grants are never mutated after creation; they expire or are superseded
//! by a newer grant. Expired rows stay authoritative for history queries
//! but confer no live capability.

use crate::{FormId, OfficeCode, OfficeKind, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssignmentId(pub u64);

impl std::fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An office identified by its tier and code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfficeTarget {
    pub kind: OfficeKind,
    pub code: OfficeCode,
}

impl OfficeTarget {
    pub fn new(kind: OfficeKind, code: OfficeCode) -> Self {
        Self { kind, code }
    }
}

/// Who a grant targets: an office, a specific user, or both.
///
/// A principal matches when either part matches: an office-wide grant
/// covers every user of that office, a user grant covers that user wherever
/// they act from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub office: Option<OfficeTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
}

impl GrantTarget {
    pub fn office(kind: OfficeKind, code: OfficeCode) -> Self {
        Self {
            office: Some(OfficeTarget::new(kind, code)),
            user: None,
        }
    }

    pub fn user(user: UserId) -> Self {
        Self {
            office: None,
            user: Some(user),
        }
    }

    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    /// A target naming neither an office nor a user grants nothing and is
    /// rejected at creation.
    pub fn is_empty(&self) -> bool {
        self.office.is_none() && self.user.is_none()
    }

    /// Whether this target covers the given principal.
    pub fn matches(&self, user: &UserId, office_kind: OfficeKind, office_code: &OfficeCode) -> bool {
        if self.user.as_ref() == Some(user) {
            return true;
        }
        self.office
            .as_ref()
            .is_some_and(|o| o.kind == office_kind && &o.code == office_code)
    }
}

/// What a grant is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPurpose {
    Fill,
    Review,
    FillAndReview,
}

impl AssignmentPurpose {
    pub fn allows_fill(&self) -> bool {
        matches!(self, Self::Fill | Self::FillAndReview)
    }

    pub fn allows_review(&self) -> bool {
        matches!(self, Self::Review | Self::FillAndReview)
    }
}

impl std::fmt::Display for AssignmentPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentPurpose::Fill => write!(f, "fill"),
            AssignmentPurpose::Review => write!(f, "review"),
            AssignmentPurpose::FillAndReview => write!(f, "fill-and-review"),
        }
    }
}

/// Capability flags a grant confers beyond its purpose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_review: bool,
}

impl Capabilities {
    pub fn editing() -> Self {
        Self {
            can_edit: true,
            ..Self::default()
        }
    }

    pub fn full() -> Self {
        Self {
            can_edit: true,
            can_delete: true,
            can_review: true,
        }
    }
}

/// A capability grant for one form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub form_id: FormId,
    pub target: GrantTarget,
    pub purpose: AssignmentPurpose,
    pub capabilities: Capabilities,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    /// Past-expiry rows remain for history but grant nothing live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Assignment {
    /// Whether the grant confers capability at `instant`.
    pub fn is_live_at(&self, instant: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| expiry >= instant)
    }

    /// Whether the grant allows reviewing, through either its purpose or an
    /// explicit capability flag.
    pub fn grants_review(&self) -> bool {
        self.purpose.allows_review() || self.capabilities.can_review
    }
}
