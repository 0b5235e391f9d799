//! Dispatcher - sequences classification, retrieval, and agent invocation
//!
//! Per-request state machine:
//! RECEIVED → CLASSIFIED → RETRIEVED → ANSWERED → DONE, with ERROR
//! terminal from any step. An unsupported classification short-circuits to
//! DONE without retrieval or agent work. Agent-level partial success is a
//! normal ANSWERED outcome carrying warnings, not an error.

use crate::agents::AgentRegistry;
use crate::classifier::QueryClassifier;
use crate::config::Config;
use crate::error::DispatchError;
use crate::models::{
    IngestOutcome, IngestStatus, Query, QueryOutcome, RequestState, TransactionRecord,
};
use crate::retrieval::{RetrievalPlan, Retriever};
use crate::store::TransactionStore;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Dispatcher {
    classifier: QueryClassifier,
    retriever: Retriever,
    agents: AgentRegistry,
    store: Arc<TransactionStore>,
    config: Config,
}

impl Dispatcher {
    pub fn new(
        classifier: QueryClassifier,
        retriever: Retriever,
        agents: AgentRegistry,
        store: Arc<TransactionStore>,
        config: Config,
    ) -> Self {
        Self {
            classifier,
            retriever,
            agents,
            store,
            config,
        }
    }

    //
    // ================= Query Boundary =================
    //

    /// Handle one query end to end. The sole entry point for all four
    /// capabilities; capability selection is internal.
    pub async fn handle(&self, query: Query) -> Result<QueryOutcome> {
        let mut state = RequestState::Received;
        info!(state = %state, text = %query.text, "Query received");

        // === CLASSIFY ===
        let classification = self.classifier.classify(&query).await;
        state = RequestState::Classified;
        debug!(
            state = %state,
            capability = ?classification.capability,
            confidence = classification.confidence,
            "Query classified"
        );

        let Some(capability) = classification.capability else {
            state = RequestState::Done;
            info!(state = %state, "Unsupported request, skipping retrieval and agents");
            return Ok(QueryOutcome::Unsupported {
                rationale: classification.rationale,
            });
        };

        // === RETRIEVE ===
        let plan = RetrievalPlan::for_capability(capability, &self.config);
        let retrieved = match self.retriever.retrieve(&query.text, &plan).await {
            Ok(retrieved) => retrieved,
            Err(e) => {
                error!(state = %RequestState::Error, error = %e, "Retrieval dependency failed");
                return Err(e);
            }
        };
        state = RequestState::Retrieved;
        debug!(state = %state, records = retrieved.len(), "Evidence retrieved");

        // === ANSWER ===
        let agent = self.agents.get(capability).ok_or_else(|| {
            error!(state = %RequestState::Error, capability = %capability, "No agent registered");
            DispatchError::AgentError(format!("no agent registered for {}", capability))
        })?;

        let mut response = match agent.answer(&query, &retrieved).await {
            Ok(response) => response,
            Err(e) => {
                error!(state = %RequestState::Error, error = %e, "Agent failed");
                return Err(e);
            }
        };
        state = RequestState::Answered;
        debug!(state = %state, "Agent produced a response");

        if let Some(top) = retrieved.records.first() {
            if top.score < self.config.similarity_floor + 0.1 {
                response.warnings.push("low retrieval confidence".to_string());
            }
        }

        state = RequestState::Done;
        info!(
            state = %state,
            capability = %capability,
            supporting = response.supporting_record_ids.len(),
            warnings = response.warnings.len(),
            "Query answered"
        );

        Ok(QueryOutcome::Answered(response))
    }

    //
    // ================= Ingestion Boundary =================
    //

    /// Upsert a batch of parsed transaction records, reporting per-record
    /// success or failure. A record stored without its vector (embedding
    /// capability down) is reported distinctly so callers can retry.
    pub async fn ingest(&self, records: Vec<TransactionRecord>) -> Vec<IngestOutcome> {
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            let record_id = record.id.clone();
            let outcome = match self.store.upsert(record).await {
                Ok(_) => IngestOutcome {
                    record_id,
                    status: IngestStatus::Ingested,
                    detail: None,
                },
                Err(DispatchError::EmbeddingUnavailable(reason)) => {
                    warn!(record_id = %record_id, reason = %reason, "Record stored unembedded");
                    IngestOutcome {
                        record_id,
                        status: IngestStatus::StoredUnembedded,
                        detail: Some(reason),
                    }
                }
                Err(e) => {
                    error!(record_id = %record_id, error = %e, "Ingestion failed");
                    IngestOutcome {
                        record_id,
                        status: IngestStatus::Failed,
                        detail: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Re-embed records stored while the embedding capability was down.
    pub async fn retry_pending_embeddings(&self) -> Result<usize> {
        self.store.retry_pending_embeddings().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::create_default_registry;
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::gemini::{ReasoningModel, RetryPolicy, StubModel};
    use crate::models::{Capability, Category};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct FailingModel;

    #[async_trait]
    impl ReasoningModel for FailingModel {
        async fn generate(&self, _system: &str, _prompt: &str) -> Result<String> {
            Err(DispatchError::ReasoningModelFailure("offline".into()))
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimension(&self) -> usize {
            64
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(DispatchError::EmbeddingUnavailable("offline".into()))
        }
    }

    fn test_config() -> Config {
        Config {
            embedding_dim: 64,
            similarity_floor: 0.0,
            retry_backoff_ms: 1,
            ..Config::default()
        }
    }

    fn dispatcher_with(model: Arc<dyn ReasoningModel>, embedder: Arc<dyn Embedder>) -> Dispatcher {
        let config = test_config();
        let store = Arc::new(TransactionStore::new(embedder.clone(), &config));
        let retriever = Retriever::new(store.clone(), embedder);
        let classifier = QueryClassifier::new(
            model.clone(),
            config.classifier_confidence_threshold,
            RetryPolicy {
                retries: 1,
                backoff: Duration::from_millis(1),
            },
        );
        let agents = create_default_registry(model, &config);
        Dispatcher::new(classifier, retriever, agents, store, config)
    }

    fn record(id: &str, date: &str, description: &str, amount: f64, category: Category) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: description.to_string(),
            merchant: None,
            amount,
            category,
            source_document_id: "statement-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_tax_question_end_to_end() {
        let dispatcher = dispatcher_with(
            Arc::new(StubModel::new("Meals are 50% deductible under standard rules.")),
            Arc::new(HashingEmbedder::new(64)),
        );

        let outcomes = dispatcher
            .ingest(vec![record("1", "2025-01-10", "Office lunch", -42.5, Category::Meals)])
            .await;
        assert_eq!(outcomes[0].status, IngestStatus::Ingested);

        let outcome = dispatcher
            .handle(Query::new("What tax deductions do I have?"))
            .await
            .unwrap();

        let QueryOutcome::Answered(response) = outcome else {
            panic!("expected an answered outcome");
        };
        assert_eq!(response.capability, Capability::Tax);
        assert_eq!(response.supporting_record_ids, vec!["1"]);
        assert!(response.answer_text.contains("21.25"));
    }

    #[tokio::test]
    async fn test_duplicate_records_flagged_without_model() {
        // the model fails both attempts; duplicate detection is rule-only
        let dispatcher = dispatcher_with(
            Arc::new(FailingModel),
            Arc::new(HashingEmbedder::new(64)),
        );

        dispatcher
            .ingest(vec![
                record("tx-1", "2025-03-01", "Coffee shop", -18.0, Category::Meals),
                record("tx-2", "2025-03-01", "Bookstore", -18.0, Category::Entertainment),
            ])
            .await;

        let outcome = dispatcher
            .handle(Query::new("Are there any suspicious transactions?"))
            .await
            .unwrap();

        let QueryOutcome::Answered(response) = outcome else {
            panic!("expected an answered outcome");
        };
        assert_eq!(response.capability, Capability::Compliance);
        assert!(response.supporting_record_ids.contains(&"tx-1".to_string()));
        assert!(response.supporting_record_ids.contains(&"tx-2".to_string()));
    }

    #[tokio::test]
    async fn test_empty_store_summary_is_deterministic() {
        let dispatcher = dispatcher_with(
            Arc::new(FailingModel),
            Arc::new(HashingEmbedder::new(64)),
        );

        let outcome = dispatcher
            .handle(Query::new("Summarize my expenses"))
            .await
            .unwrap();

        let QueryOutcome::Answered(response) = outcome else {
            panic!("expected an answered outcome");
        };
        assert_eq!(response.capability, Capability::Summary);
        assert!(response.answer_text.contains("No transaction data"));
    }

    #[tokio::test]
    async fn test_unsupported_skips_retrieval_and_agents() {
        // retrieval would fail loudly with this embedder; an Unsupported
        // outcome proves the short-circuit
        let dispatcher = dispatcher_with(
            Arc::new(StubModel::new("unsupported")),
            Arc::new(FailingEmbedder),
        );

        let outcome = dispatcher
            .handle(Query::new("Will it rain tomorrow?"))
            .await
            .unwrap();

        assert!(matches!(outcome, QueryOutcome::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_requested_capability_override_routes_directly() {
        let dispatcher = dispatcher_with(
            Arc::new(FailingModel),
            Arc::new(HashingEmbedder::new(64)),
        );

        dispatcher
            .ingest(vec![record("tx-1", "2025-01-10", "Office lunch", -42.5, Category::Meals)])
            .await;

        let outcome = dispatcher
            .handle(Query::with_capability(
                "anything at all",
                Capability::SpendingPattern,
            ))
            .await
            .unwrap();

        let QueryOutcome::Answered(response) = outcome else {
            panic!("expected an answered outcome");
        };
        assert_eq!(response.capability, Capability::SpendingPattern);
    }

    #[tokio::test]
    async fn test_embedder_outage_reports_stored_unembedded() {
        let dispatcher = dispatcher_with(
            Arc::new(StubModel::new("ok")),
            Arc::new(FailingEmbedder),
        );

        let outcomes = dispatcher
            .ingest(vec![record("tx-1", "2025-01-10", "Office lunch", -42.5, Category::Meals)])
            .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, IngestStatus::StoredUnembedded);
        assert!(outcomes[0].detail.is_some());
    }

    #[tokio::test]
    async fn test_query_time_embedding_outage_is_typed_error() {
        let dispatcher = dispatcher_with(
            Arc::new(StubModel::new("ok")),
            Arc::new(FailingEmbedder),
        );

        let result = dispatcher
            .handle(Query::new("Summarize my expenses"))
            .await;

        assert!(matches!(result, Err(DispatchError::RetrievalFailure(_))));
    }
}
