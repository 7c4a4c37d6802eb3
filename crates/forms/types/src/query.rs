//! Composable list-query specifications
//!
//! Listing surfaces take a query value (predicate fields plus pagination)
//! translated once by the component that owns the data, instead of callers
//! assembling filter fragments per combination.

use crate::{EntityKind, FormId, OfficeCode, SubmissionStatus};
use serde::{Deserialize, Serialize};

/// Paged read window. The zero value means "everything".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum rows to return; 0 means no limit.
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Apply the window to an already-ordered result set.
    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        let iter = rows.into_iter().skip(self.offset);
        if self.limit == 0 {
            iter.collect()
        } else {
            iter.take(self.limit).collect()
        }
    }
}

/// Filter for form listings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FormQuery {
    /// Only forms with `is_active` set.
    pub active_only: bool,
    /// Only forms targeting this entity kind (or `Both`).
    pub entity_kind: Option<EntityKind>,
    pub category: Option<String>,
    /// Case-insensitive needle matched against code and name.
    pub needle: Option<String>,
    pub page: Page,
}

impl FormQuery {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    pub fn with_entity_kind(mut self, kind: EntityKind) -> Self {
        self.entity_kind = Some(kind);
        self
    }

    pub fn with_needle(mut self, needle: impl Into<String>) -> Self {
        self.needle = Some(needle.into());
        self
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.page = page;
        self
    }
}

/// Filter for submission listings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubmissionQuery {
    pub form_id: Option<FormId>,
    pub status: Option<SubmissionStatus>,
    pub office_code: Option<OfficeCode>,
    pub entity_kind: Option<EntityKind>,
    /// Restrict to the latest version of each chain.
    pub latest_only: bool,
    pub page: Page,
}

impl SubmissionQuery {
    pub fn latest() -> Self {
        Self {
            latest_only: true,
            ..Self::default()
        }
    }

    pub fn for_form(form_id: FormId) -> Self {
        Self {
            form_id: Some(form_id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: SubmissionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_office(mut self, office: OfficeCode) -> Self {
        self.office_code = Some(office);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_windowing() {
        let rows: Vec<u32> = (0..10).collect();
        assert_eq!(Page::default().apply(rows.clone()).len(), 10);
        assert_eq!(Page::new(3, 0).apply(rows.clone()), vec![0, 1, 2]);
        assert_eq!(Page::new(3, 8).apply(rows.clone()), vec![8, 9]);
        assert_eq!(Page::new(0, 4).apply(rows).len(), 6);
    }
}
