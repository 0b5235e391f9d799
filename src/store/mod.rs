//! Transaction store
//!
//! Owns transaction records and their vector documents for process
//! lifetime. Concurrent searches may overlap upserts; each upsert is
//! atomic per record id, so a reader sees either the pre- or post-upsert
//! version of a document, never a partial write. A JSON snapshot on local
//! disk carries the store across runs.

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::DispatchError;
use crate::models::{
    Category, RecordMetadata, RetrievalResult, ScoredRecord, TransactionRecord, VectorDocument,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A record together with its searchable projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    record: TransactionRecord,
    document: VectorDocument,
}

pub struct TransactionStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
    embedder: Arc<dyn Embedder>,
    embedding_dim: usize,
    snapshot_path: Option<PathBuf>,
}

impl TransactionStore {
    /// In-memory store with no snapshot file.
    pub fn new(embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            embedder,
            embedding_dim: config.embedding_dim,
            snapshot_path: None,
        }
    }

    /// Store backed by the configured snapshot file; loads any existing
    /// snapshot at startup.
    pub fn open(embedder: Arc<dyn Embedder>, config: &Config) -> Result<Self> {
        let mut documents = HashMap::new();

        if let Some(path) = &config.snapshot_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)?;
                let stored: Vec<StoredDocument> = serde_json::from_str(&raw)?;
                for doc in stored {
                    documents.insert(doc.record.id.clone(), doc);
                }
                info!(
                    count = documents.len(),
                    path = %path.display(),
                    "Store snapshot loaded"
                );
            }
        }

        Ok(Self {
            documents: RwLock::new(documents),
            embedder,
            embedding_dim: config.embedding_dim,
            snapshot_path: config.snapshot_path.clone(),
        })
    }

    /// Insert or replace the record and its vector document, keyed by
    /// record id. When the embedding capability cannot be reached the
    /// record is still stored, flagged `needs_embedding`, and the error is
    /// surfaced to the caller.
    pub async fn upsert(&self, record: TransactionRecord) -> Result<VectorDocument> {
        let metadata = RecordMetadata {
            date: record.date,
            amount: record.amount,
            category: record.category,
        };

        let embedded = match self.embedder.embed(&record.embedding_text()).await {
            Ok(vector) if vector.len() == self.embedding_dim => Ok(vector),
            Ok(vector) => Err(DispatchError::EmbeddingUnavailable(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.embedding_dim,
                vector.len()
            ))),
            Err(e) => Err(e),
        };

        match embedded {
            Ok(vector) => {
                let document = VectorDocument {
                    document_id: record.id.clone(),
                    embedding: vector,
                    metadata,
                    needs_embedding: false,
                };

                {
                    let mut documents = self.documents.write().await;
                    documents.insert(
                        record.id.clone(),
                        StoredDocument {
                            record,
                            document: document.clone(),
                        },
                    );
                }

                self.persist().await?;
                Ok(document)
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "Storing record unembedded");

                let document = VectorDocument {
                    document_id: record.id.clone(),
                    embedding: Vec::new(),
                    metadata,
                    needs_embedding: true,
                };

                {
                    let mut documents = self.documents.write().await;
                    documents.insert(
                        record.id.clone(),
                        StoredDocument { record, document },
                    );
                }

                self.persist().await?;
                Err(e)
            }
        }
    }

    /// Top-k nearest documents by cosine similarity, descending, ties
    /// broken by most-recent date. Documents awaiting embedding are not
    /// candidates. Nothing above the floor yields an empty result, not an
    /// error.
    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        categories: Option<&[Category]>,
        min_score: f32,
    ) -> Result<RetrievalResult> {
        if query_vector.len() != self.embedding_dim {
            return Err(DispatchError::RetrievalFailure(format!(
                "Query vector dimension mismatch: expected {}, got {}",
                self.embedding_dim,
                query_vector.len()
            )));
        }

        let documents = self.documents.read().await;

        let mut scored: Vec<ScoredRecord> = documents
            .values()
            .filter(|stored| !stored.document.needs_embedding)
            .filter(|stored| match categories {
                Some(allowed) => allowed.contains(&stored.document.metadata.category),
                None => true,
            })
            .filter_map(|stored| {
                let score = cosine_similarity(query_vector, &stored.document.embedding);
                if score >= min_score {
                    Some(ScoredRecord {
                        record: stored.record.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.record.date.cmp(&a.record.date))
        });
        scored.truncate(k);

        debug!(
            candidates = documents.len(),
            returned = scored.len(),
            "Similarity search completed"
        );

        Ok(RetrievalResult { records: scored })
    }

    pub async fn get(&self, record_id: &str) -> Result<TransactionRecord> {
        let documents = self.documents.read().await;
        documents
            .get(record_id)
            .map(|stored| stored.record.clone())
            .ok_or_else(|| DispatchError::NotFound(record_id.to_string()))
    }

    /// Re-embed documents that were stored while the embedding capability
    /// was unreachable. Returns how many were recovered.
    pub async fn retry_pending_embeddings(&self) -> Result<usize> {
        let pending: Vec<TransactionRecord> = {
            let documents = self.documents.read().await;
            documents
                .values()
                .filter(|stored| stored.document.needs_embedding)
                .map(|stored| stored.record.clone())
                .collect()
        };

        let mut recovered = 0;
        for record in pending {
            let record_id = record.id.clone();
            match self.upsert(record).await {
                Ok(_) => recovered += 1,
                Err(e) => {
                    warn!(record_id = %record_id, error = %e, "Re-embedding still failing");
                }
            }
        }

        Ok(recovered)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Write the snapshot file, if one is configured.
    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let stored: Vec<StoredDocument> = {
            let documents = self.documents.read().await;
            documents.values().cloned().collect()
        };

        let json = serde_json::to_string(&stored)?;
        std::fs::write(path, json)?;

        debug!(count = stored.len(), path = %path.display(), "Store snapshot written");
        Ok(())
    }
}

/// Cosine similarity; zero for empty or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
