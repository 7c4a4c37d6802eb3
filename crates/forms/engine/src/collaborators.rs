//! Collaborator contracts the engine consumes
//!
//! The engine never authenticates, stores bytes, or resolves registry
//! hierarchy itself. Those concerns sit behind the traits here, with
//! in-memory reference implementations for tests and embedding.

use forms_types::{FamilyId, FieldId, FormsError, FormsResult, MemberId, StoredFile, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Upload size ceiling enforced by every file store.
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Content types a file store accepts: images, PDF, Word.
pub const ALLOWED_UPLOAD_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

// ── Audit sink ───────────────────────────────────────────────────────

/// One audit record. Old/new values are JSON snapshots of the affected row.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub actor: UserId,
    pub action: String,
    pub entity: &'static str,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,
}

/// Fire-and-forget audit log. A failing sink never blocks or fails the
/// primary operation; the engine logs the failure and moves on.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), String>;
}

/// Sink that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), String> {
        Ok(())
    }
}

/// Sink that keeps events in memory, for tests and local inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), String> {
        self.events
            .lock()
            .map_err(|_| "audit sink lock poisoned".to_string())?
            .push(event);
        Ok(())
    }
}

// ── File storage ─────────────────────────────────────────────────────

/// Synchronous file storage. The engine blocks on the store and keeps only
/// the returned reference; a storage failure fails the response save.
pub trait FileStore: Send + Sync {
    fn store(
        &self,
        field_id: FieldId,
        bytes: &[u8],
        declared_name: &str,
        declared_type: &str,
    ) -> FormsResult<StoredFile>;
}

/// File store keeping payloads in memory under generated paths.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored_count(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl FileStore for MemoryFileStore {
    fn store(
        &self,
        field_id: FieldId,
        bytes: &[u8],
        declared_name: &str,
        declared_type: &str,
    ) -> FormsResult<StoredFile> {
        if bytes.len() as u64 > MAX_UPLOAD_BYTES {
            return Err(FormsError::Validation(format!(
                "file exceeds the {} MiB upload limit",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            )));
        }
        if !ALLOWED_UPLOAD_TYPES.contains(&declared_type) {
            return Err(FormsError::Validation(format!(
                "file type '{}' is not accepted",
                declared_type
            )));
        }

        let path = format!("uploads/{}/{}", field_id, uuid::Uuid::new_v4());
        let stored = StoredFile {
            path: path.clone(),
            original_name: declared_name.to_string(),
            size: bytes.len() as u64,
            content_type: declared_type.to_string(),
        };
        self.files
            .lock()
            .map_err(|_| FormsError::Persistence("file store lock poisoned".into()))?
            .insert(path, bytes.to_vec());
        Ok(stored)
    }
}

// ── Family registry ──────────────────────────────────────────────────

/// Read-only view of the citizen registry: resolves a member's owning
/// family when a member-entity submission is saved.
pub trait FamilyRegistry: Send + Sync {
    fn family_of_member(&self, member: MemberId) -> Option<FamilyId>;
}

/// Registry backed by a plain map, seeded up front.
#[derive(Clone, Debug, Default)]
pub struct MapFamilyRegistry {
    members: HashMap<MemberId, FamilyId>,
}

impl MapFamilyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, member: MemberId, family: FamilyId) -> Self {
        self.members.insert(member, family);
        self
    }
}

impl FamilyRegistry for MapFamilyRegistry {
    fn family_of_member(&self, member: MemberId) -> Option<FamilyId> {
        self.members.get(&member).copied()
    }
}
