//! Core data models for the expense dispatcher

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

//
// ================= Enums =================
//

/// Closed set of agent capabilities the dispatcher can route to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Summary,
    Tax,
    SpendingPattern,
    Compliance,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Summary,
        Capability::Tax,
        Capability::SpendingPattern,
        Capability::Compliance,
    ];
}

/// Canonical transaction categories shared across the whole pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Travel,
    Meals,
    Groceries,
    Rent,
    Entertainment,
    Electronics,
    Health,
    Utilities,
    Income,
    Transfer,
    Other,
}

impl Category {
    /// Categories that represent money leaving the account. Income and
    /// internal transfers are excluded from expense-oriented retrieval.
    pub fn is_expense(&self) -> bool {
        !matches!(self, Category::Income | Category::Transfer)
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        let category = match normalized.as_str() {
            "TRAVEL" => Category::Travel,
            "MEALS" => Category::Meals,
            "GROCERIES" => Category::Groceries,
            "RENT" => Category::Rent,
            "ENTERTAINMENT" => Category::Entertainment,
            "ELECTRONICS" => Category::Electronics,
            "HEALTH" => Category::Health,
            "UTILITIES" => Category::Utilities,
            "INCOME" => Category::Income,
            "TRANSFER" => Category::Transfer,
            _ => Category::Other,
        };
        Ok(category)
    }
}

//
// ================= Transaction Record =================
//

/// A structured transaction row produced by the external ingestion
/// pipeline. Immutable once created; the core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub id: String,
    pub date: NaiveDate,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    pub amount: f64,
    pub category: Category,
    pub source_document_id: String,
}

impl TransactionRecord {
    /// Text rendered into the embedding space for this record.
    pub fn embedding_text(&self) -> String {
        let merchant = self.merchant.as_deref().unwrap_or("unknown");
        format!(
            "Date: {}. Merchant: {}. Category: {}. Amount: {:.2}. {}",
            self.date, merchant, self.category, self.amount, self.description
        )
    }
}

//
// ================= Vector Document =================
//

/// Denormalized copy of record fields used for filtering at search time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMetadata {
    pub date: NaiveDate,
    pub amount: f64,
    pub category: Category,
}

/// The searchable projection of a TransactionRecord. Exactly one per
/// record id; re-upsert replaces it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub document_id: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
    pub needs_embedding: bool,
}

//
// ================= Query =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_capability: Option<Capability>,
    pub timestamp: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            requested_capability: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_capability(text: impl Into<String>, capability: Capability) -> Self {
        Self {
            text: text.into(),
            requested_capability: Some(capability),
            timestamp: Utc::now(),
        }
    }
}

//
// ================= Classification =================
//

/// Routing decision for a query. `capability == None` means the query is
/// unsupported and must be surfaced as such, never silently defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub capability: Option<Capability>,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

//
// ================= Retrieval =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: TransactionRecord,
    pub score: f32,
}

/// Records returned for a query, descending by similarity score with ties
/// broken by most-recent date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub records: Vec<ScoredRecord>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self { records: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn record_ids(&self) -> Vec<String> {
        self.records.iter().map(|s| s.record.id.clone()).collect()
    }
}

//
// ================= Agent Response =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub capability: Capability,
    pub answer_text: String,
    pub supporting_record_ids: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

//
// ================= Dispatch Outcome =================
//

/// Result of the query boundary: a grounded answer or an explicit
/// "cannot handle this request".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered(AgentResponse),
    Unsupported {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
}

//
// ================= Ingestion =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Ingested,
    StoredUnembedded,
    Failed,
}

/// Per-record result of the ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub record_id: String,
    pub status: IngestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

//
// ================= Request State =================
//

/// Per-request state machine tracked by the dispatcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestState {
    Received,
    Classified,
    Retrieved,
    Answered,
    Done,
    Error,
}

//
// ================= Display =================
//

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Summary => "summary",
            Capability::Tax => "tax",
            Capability::SpendingPattern => "spending_pattern",
            Capability::Compliance => "compliance",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Travel => "TRAVEL",
            Category::Meals => "MEALS",
            Category::Groceries => "GROCERIES",
            Category::Rent => "RENT",
            Category::Entertainment => "ENTERTAINMENT",
            Category::Electronics => "ELECTRONICS",
            Category::Health => "HEALTH",
            Category::Utilities => "UTILITIES",
            Category::Income => "INCOME",
            Category::Transfer => "TRANSFER",
            Category::Other => "OTHER",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Received => "RECEIVED",
            RequestState::Classified => "CLASSIFIED",
            RequestState::Retrieved => "RETRIEVED",
            RequestState::Answered => "ANSWERED",
            RequestState::Done => "DONE",
            RequestState::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}
