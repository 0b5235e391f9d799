//! Retrieval layer
//!
//! Embeds the query text and runs similarity search against the
//! transaction store, under a capability-specific plan supplied by the
//! dispatcher. An empty store or nothing above the similarity floor is a
//! valid empty result; only unreachable dependencies are errors.

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::DispatchError;
use crate::models::{Capability, Category, RetrievalResult};
use crate::store::TransactionStore;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Categories the tax agent is allowed to see. Income and transfers are
/// never deduction candidates.
const EXPENSE_CATEGORIES: &[Category] = &[
    Category::Travel,
    Category::Meals,
    Category::Groceries,
    Category::Rent,
    Category::Entertainment,
    Category::Electronics,
    Category::Health,
    Category::Utilities,
    Category::Other,
];

/// How a capability wants its evidence gathered.
#[derive(Debug, Clone)]
pub struct RetrievalPlan {
    pub k: usize,
    pub min_score: f32,
    pub categories: Option<Vec<Category>>,
}

impl RetrievalPlan {
    pub fn for_capability(capability: Capability, config: &Config) -> Self {
        match capability {
            Capability::Summary => Self {
                k: config.summary_k,
                min_score: config.similarity_floor,
                categories: None,
            },
            Capability::Tax => Self {
                k: config.tax_k,
                min_score: config.similarity_floor,
                categories: Some(EXPENSE_CATEGORIES.to_vec()),
            },
            Capability::SpendingPattern => Self {
                k: config.spending_k,
                min_score: config.similarity_floor,
                categories: None,
            },
            // Widened and unfiltered: a missed anomaly is worse than a
            // loosely related record in the candidate set.
            Capability::Compliance => Self {
                k: config.compliance_k,
                min_score: 0.0,
                categories: None,
            },
        }
    }
}

pub struct Retriever {
    store: Arc<TransactionStore>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(store: Arc<TransactionStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Top-k records relevant to the query under the given plan.
    pub async fn retrieve(&self, query_text: &str, plan: &RetrievalPlan) -> Result<RetrievalResult> {
        let query_vector = self.embedder.embed(query_text).await.map_err(|e| {
            DispatchError::RetrievalFailure(format!("query embedding failed: {}", e))
        })?;

        let result = self
            .store
            .search(
                &query_vector,
                plan.k,
                plan.categories.as_deref(),
                plan.min_score,
            )
            .await?;

        debug!(
            k = plan.k,
            returned = result.len(),
            filtered = plan.categories.is_some(),
            "Retrieval completed"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::models::TransactionRecord;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimension(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(DispatchError::EmbeddingUnavailable("offline".into()))
        }
    }

    fn test_config() -> Config {
        Config {
            embedding_dim: 64,
            similarity_floor: 0.0,
            ..Config::default()
        }
    }

    fn record(id: &str, description: &str, amount: f64, category: Category) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            description: description.to_string(),
            merchant: None,
            amount,
            category,
            source_document_id: "doc-1".to_string(),
        }
    }

    #[test]
    fn test_tax_plan_filters_to_expenses() {
        let plan = RetrievalPlan::for_capability(Capability::Tax, &Config::default());
        let categories = plan.categories.expect("tax plan filters categories");
        assert!(categories.contains(&Category::Meals));
        assert!(!categories.contains(&Category::Income));
        assert!(!categories.contains(&Category::Transfer));

        for category in &categories {
            assert!(category.is_expense());
        }
    }

    #[test]
    fn test_compliance_plan_is_widest() {
        let config = Config::default();
        let compliance = RetrievalPlan::for_capability(Capability::Compliance, &config);
        let tax = RetrievalPlan::for_capability(Capability::Tax, &config);

        assert!(compliance.categories.is_none());
        assert!(compliance.k >= tax.k);
        assert_eq!(compliance.min_score, 0.0);
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_result() {
        let config = test_config();
        let embedder = Arc::new(HashingEmbedder::new(config.embedding_dim));
        let store = Arc::new(TransactionStore::new(embedder.clone(), &config));
        let retriever = Retriever::new(store, embedder);

        let plan = RetrievalPlan::for_capability(Capability::Summary, &config);
        let result = retriever.retrieve("how much did I spend", &plan).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_returns_ingested_records() {
        let config = test_config();
        let embedder = Arc::new(HashingEmbedder::new(config.embedding_dim));
        let store = Arc::new(TransactionStore::new(embedder.clone(), &config));

        store
            .upsert(record("tx-1", "Office lunch", -42.5, Category::Meals))
            .await
            .unwrap();

        let retriever = Retriever::new(store, embedder);
        let plan = RetrievalPlan::for_capability(Capability::Tax, &config);
        let result = retriever.retrieve("office lunch deductions", &plan).await.unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.records[0].record.id, "tx-1");
    }

    #[tokio::test]
    async fn test_query_embedding_failure_is_retrieval_failure() {
        let config = test_config();
        let store = Arc::new(TransactionStore::new(
            Arc::new(HashingEmbedder::new(config.embedding_dim)),
            &config,
        ));
        let retriever = Retriever::new(store, Arc::new(FailingEmbedder));

        let plan = RetrievalPlan::for_capability(Capability::Summary, &config);
        let result = retriever.retrieve("anything", &plan).await;
        assert!(matches!(result, Err(DispatchError::RetrievalFailure(_))));
    }
}
