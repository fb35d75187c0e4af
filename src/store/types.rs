//! Wire and domain types shared by every store implementation.
//!
//! Serialized names follow the store's PascalCase JSON so the HTTP client can
//! deserialize responses directly into these types.

use serde::{Deserialize, Serialize};

use super::error::StoreError;

// ═══════════════════════════════════════════════════════════
// Documents
// ═══════════════════════════════════════════════════════════

/// An entity that can be written to the store.
pub trait Document: Serialize {
    /// Collection the document belongs to.
    const COLLECTION: &'static str;

    /// Globally unique document identity.
    fn id(&self) -> &str;
}

/// A document ready to be written: identity, collection and JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub collection: String,
    pub body: serde_json::Value,
}

impl StoredDocument {
    pub fn from_entity<T: Document>(entity: &T) -> Result<Self, StoreError> {
        Ok(Self {
            id: entity.id().to_string(),
            collection: T::COLLECTION.to_string(),
            body: serde_json::to_value(entity)?,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Indexes & statistics
// ═══════════════════════════════════════════════════════════

/// Map (and optional reduce) definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexDefinition {
    pub name: String,
    pub maps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Normal,
    Paused,
    Disabled,
    Idle,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexInformation {
    pub name: String,
    pub is_stale: bool,
    pub state: IndexState,
}

impl IndexInformation {
    /// Disabled indexes never catch up, so they never count as stale.
    pub fn is_pending(&self) -> bool {
        self.state != IndexState::Disabled && self.is_stale
    }
}

/// Database statistics as reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseStatistics {
    pub count_of_documents: u64,
    pub count_of_indexes: u32,
    #[serde(default)]
    pub indexes: Vec<IndexInformation>,
}

impl DatabaseStatistics {
    /// Indexes that are not disabled.
    pub fn active_indexes(&self) -> impl Iterator<Item = &IndexInformation> {
        self.indexes.iter().filter(|i| i.state != IndexState::Disabled)
    }

    /// Names of active indexes that have not caught up with all writes.
    pub fn stale_index_names(&self) -> Vec<String> {
        self.indexes
            .iter()
            .filter(|i| i.is_pending())
            .map(|i| i.name.clone())
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════
// Long-running operations
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    InProgress,
    Completed,
    Faulted,
    Canceled,
}

/// Progress of an operation whose total is known up front.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeterminateProgress {
    pub processed: u64,
    pub total: u64,
}

impl DeterminateProgress {
    /// Completion percentage; 0 when the total is unknown.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }
}

/// `1234567` → `"1,234,567"`.
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Outcome recorded for a single document touched by a patch-by-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatchStatus {
    DocumentDoesNotExist,
    Created,
    Patched,
    Skipped,
    NotModified,
}

impl std::fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DocumentDoesNotExist => "DocumentDoesNotExist",
            Self::Created => "Created",
            Self::Patched => "Patched",
            Self::Skipped => "Skipped",
            Self::NotModified => "NotModified",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchDetail {
    pub id: String,
    pub status: PatchStatus,
}

/// Result of a completed bulk (patch/delete by query) operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BulkOperationResult {
    /// Human-readable summary, e.g. `"Processed 1,234 items."`.
    #[serde(default)]
    pub message: String,
    /// Structured processed count, when the store reports one.
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub details: Vec<PatchDetail>,
}

/// Polled state of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationState {
    pub status: OperationStatus,
    #[serde(default)]
    pub progress: Option<DeterminateProgress>,
    #[serde(default)]
    pub result: Option<BulkOperationResult>,
    #[serde(default)]
    pub error: Option<String>,
}
