//! Principals and per-call context
//!
//! The core never reads ambient session state. Every operation receives an
//! [`OperationContext`] carrying the already-resolved principal; building it
//! from a session is the job of the surrounding request layer.

use serde::{Deserialize, Serialize};

/// The four tiers of the administrative hierarchy, top to bottom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfficeKind {
    Ministry,
    District,
    Division,
    LocalOffice,
}

impl std::fmt::Display for OfficeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfficeKind::Ministry => write!(f, "ministry"),
            OfficeKind::District => write!(f, "district"),
            OfficeKind::Division => write!(f, "division"),
            OfficeKind::LocalOffice => write!(f, "local-office"),
        }
    }
}

/// Identifier of a user, as resolved by the identity collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Code of an office within its tier (for example a division code).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfficeCode(pub String);

impl OfficeCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

impl std::fmt::Display for OfficeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved principal plus call options, passed into every core operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationContext {
    /// Acting user.
    pub user_id: UserId,
    /// Tier of the office the user acts for.
    pub office_kind: OfficeKind,
    /// Code of that office.
    pub office_code: OfficeCode,
    /// Allows deleting a form that already has submissions. Off by default;
    /// only administrative callers set it.
    pub cascade_override: bool,
}

impl OperationContext {
    pub fn new(user_id: UserId, office_kind: OfficeKind, office_code: OfficeCode) -> Self {
        Self {
            user_id,
            office_kind,
            office_code,
            cascade_override: false,
        }
    }

    pub fn with_cascade_override(mut self) -> Self {
        self.cascade_override = true;
        self
    }
}
