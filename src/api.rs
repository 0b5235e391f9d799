//! REST API adapter for the expense dispatcher
//!
//! Thin transport layer over the ingestion and query boundaries.
//! Transport concerns stop here; the core below is HTTP-free.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::models::{Capability, Category, Query, TransactionRecord};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub transactions: Vec<TransactionRow>,
}

/// One parsed transaction row from the upstream OCR/parsing service.
/// Missing ids are derived deterministically so re-posting the same
/// statement never duplicates records.
#[derive(Debug, Deserialize)]
pub struct TransactionRow {
    pub id: Option<String>,
    pub date: NaiveDate,
    pub description: String,
    pub merchant: Option<String>,
    pub amount: f64,
    pub category: Option<String>,
    pub source_document_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub capability: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher>,
}

/// =============================
/// Helpers — Parsing
/// =============================

fn parse_capability(raw: &str) -> Option<Capability> {
    match raw.to_lowercase().as_str() {
        "summary" => Some(Capability::Summary),
        "tax" => Some(Capability::Tax),
        "spending_pattern" | "spending-pattern" | "spending" => Some(Capability::SpendingPattern),
        "compliance" => Some(Capability::Compliance),
        _ => None,
    }
}

/// Content-derived record id: the same row always maps to the same id.
fn stable_record_id(row: &TransactionRow) -> String {
    use sha2::{Digest, Sha256};

    let seed = format!(
        "{}|{}|{}|{:.2}",
        row.source_document_id.as_deref().unwrap_or("unknown"),
        row.date,
        row.description,
        row.amount
    );

    let hash = Sha256::digest(seed.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes).to_string()
}

fn into_record(row: TransactionRow) -> TransactionRecord {
    let id = match &row.id {
        Some(id) if !id.trim().is_empty() => id.clone(),
        _ => stable_record_id(&row),
    };

    let category = row
        .category
        .as_deref()
        .map(|raw| Category::from_str(raw).unwrap_or(Category::Other))
        .unwrap_or(Category::Other);

    TransactionRecord {
        id,
        date: row.date,
        description: row.description,
        merchant: row.merchant,
        amount: row.amount,
        category,
        source_document_id: row
            .source_document_id
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Ingestion Endpoint
/// =============================

async fn ingest_handler(
    State(state): State<ApiState>,
    Json(req): Json<IngestRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received ingest request: {} row(s)", req.transactions.len());

    let records: Vec<TransactionRecord> = req.transactions.into_iter().map(into_record).collect();
    let outcomes = state.dispatcher.ingest(records).await;

    (StatusCode::OK, Json(ApiResponse::success(outcomes)))
}

/// =============================
/// Query Endpoint
/// =============================

async fn query_handler(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received query: {}", req.question);

    let query = match req.capability.as_deref().map(parse_capability) {
        Some(Some(capability)) => Query::with_capability(req.question, capability),
        Some(None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error("Unknown capability".into())),
            );
        }
        None => Query::new(req.question),
    };

    match state.dispatcher.handle(query).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Dispatch failed: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(dispatcher: Arc<Dispatcher>) -> Router {
    let state = ApiState { dispatcher };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/ingest", post(ingest_handler))
        .route("/api/query", post(query_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    dispatcher: Arc<Dispatcher>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(dispatcher);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(description: &str, amount: f64) -> TransactionRow {
        TransactionRow {
            id: None,
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            description: description.to_string(),
            merchant: None,
            amount,
            category: Some("MEALS".to_string()),
            source_document_id: Some("statement-1".to_string()),
        }
    }

    #[test]
    fn test_stable_record_id_is_deterministic() {
        let a = stable_record_id(&row("Office lunch", -42.5));
        let b = stable_record_id(&row("Office lunch", -42.5));
        let c = stable_record_id(&row("Airport taxi", -30.0));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_into_record_keeps_caller_supplied_id() {
        let mut r = row("Office lunch", -42.5);
        r.id = Some("tx-1".to_string());

        let record = into_record(r);
        assert_eq!(record.id, "tx-1");
        assert_eq!(record.category, Category::Meals);
    }

    #[test]
    fn test_parse_capability_variants() {
        assert_eq!(parse_capability("tax"), Some(Capability::Tax));
        assert_eq!(
            parse_capability("spending-pattern"),
            Some(Capability::SpendingPattern)
        );
        assert_eq!(parse_capability("weather"), None);
    }
}
