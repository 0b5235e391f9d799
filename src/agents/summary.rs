//! Summary agent
//!
//! Aggregates retrieved records into totals and balances. The numbers are
//! computed here; the model only narrates them. With no retrieved
//! evidence the agent answers deterministically and never touches the
//! model.

use crate::agents::{narrate_or_degrade, render_records, Agent};
use crate::gemini::{ReasoningModel, RetryPolicy};
use crate::models::{AgentResponse, Capability, Category, Query, RetrievalResult};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are an expense analysis assistant. Use ONLY the \
provided figures. Answer clearly and concisely for a busy professional.";

pub const NO_DATA_ANSWER: &str =
    "No transaction data is available to answer this question.";

pub struct SummaryAgent {
    model: Arc<dyn ReasoningModel>,
    retry: RetryPolicy,
}

impl SummaryAgent {
    pub fn new(model: Arc<dyn ReasoningModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }
}

#[async_trait::async_trait]
impl Agent for SummaryAgent {
    fn capability(&self) -> Capability {
        Capability::Summary
    }

    async fn answer(&self, query: &Query, retrieved: &RetrievalResult) -> Result<AgentResponse> {
        if retrieved.is_empty() {
            return Ok(AgentResponse {
                capability: Capability::Summary,
                answer_text: NO_DATA_ANSWER.to_string(),
                supporting_record_ids: Vec::new(),
                warnings: vec!["no supporting evidence retrieved".to_string()],
            });
        }

        let totals = compute_totals(retrieved);
        let deterministic = totals.render();

        let prompt = format!(
            "User question:\n{}\n\nComputed figures:\n{}\n\nRetrieved records:\n{}\n\n\
             Write a short narrative summary (1-2 paragraphs) of these figures. \
             Do not invent numbers.",
            query.text,
            deterministic,
            render_records(retrieved)
        );

        let (answer_text, warnings) = narrate_or_degrade(
            self.model.as_ref(),
            &self.retry,
            SYSTEM_PROMPT,
            &prompt,
            deterministic,
        )
        .await;

        Ok(AgentResponse {
            capability: Capability::Summary,
            answer_text,
            supporting_record_ids: retrieved.record_ids(),
            warnings,
        })
    }
}

//
// ================= Deterministic Totals =================
//

struct Totals {
    count: usize,
    inflow: f64,
    outflow: f64,
    by_category: Vec<(Category, f64)>,
}

impl Totals {
    fn net(&self) -> f64 {
        self.inflow - self.outflow
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Transactions considered: {}\n", self.count));
        out.push_str(&format!("Total inflow: {:.2}\n", self.inflow));
        out.push_str(&format!("Total outflow: {:.2}\n", self.outflow));
        out.push_str(&format!("Net: {:.2}\n", self.net()));
        out.push_str("Totals by category:\n");
        for (category, total) in &self.by_category {
            out.push_str(&format!("  {}: {:.2}\n", category, total));
        }
        out.trim_end().to_string()
    }
}

fn compute_totals(retrieved: &RetrievalResult) -> Totals {
    let mut inflow = 0.0;
    let mut outflow = 0.0;
    let mut by_category: HashMap<Category, f64> = HashMap::new();

    for scored in &retrieved.records {
        let record = &scored.record;
        if record.amount >= 0.0 {
            inflow += record.amount;
        } else {
            outflow += record.amount.abs();
        }
        *by_category.entry(record.category).or_insert(0.0) += record.amount;
    }

    let mut by_category: Vec<(Category, f64)> = by_category.into_iter().collect();
    // biggest spend first; expense totals are negative
    by_category.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    Totals {
        count: retrieved.len(),
        inflow,
        outflow,
        by_category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::gemini::StubModel;
    use crate::models::{ScoredRecord, TransactionRecord};
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

    fn retry() -> RetryPolicy {
        RetryPolicy {
            retries: 1,
            backoff: Duration::from_millis(1),
        }
    }

    fn retrieved(rows: Vec<(&str, f64, Category)>) -> RetrievalResult {
        RetrievalResult {
            records: rows
                .into_iter()
                .map(|(id, amount, category)| ScoredRecord {
                    record: TransactionRecord {
                        id: id.to_string(),
                        date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                        description: format!("{} purchase", id),
                        merchant: None,
                        amount,
                        category,
                        source_document_id: "doc-1".to_string(),
                    },
                    score: 0.9,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_empty_retrieval_is_deterministic_no_data() {
        // a failing model proves the no-data path never calls it
        let agent = SummaryAgent::new(Arc::new(FailingModel), retry());
        let response = agent
            .answer(&Query::new("summarize my spending"), &RetrievalResult::empty())
            .await
            .unwrap();

        assert_eq!(response.answer_text, NO_DATA_ANSWER);
        assert!(response.supporting_record_ids.is_empty());
        assert!(!response
            .warnings
            .iter()
            .any(|w| w.contains("narrative generation failed")));
    }

    #[tokio::test]
    async fn test_totals_are_computed_not_narrated() {
        let agent = SummaryAgent::new(Arc::new(StubModel::new("Spending looks stable.")), retry());
        let records = retrieved(vec![
            ("tx-1", -42.5, Category::Meals),
            ("tx-2", -10.0, Category::Meals),
            ("tx-3", 2000.0, Category::Income),
        ]);

        let response = agent
            .answer(&Query::new("summarize my spending"), &records)
            .await
            .unwrap();

        assert!(response.answer_text.contains("Total inflow: 2000.00"));
        assert!(response.answer_text.contains("Total outflow: 52.50"));
        assert!(response.answer_text.contains("Net: 1947.50"));
        assert!(response.answer_text.contains("MEALS: -52.50"));
        assert!(response.answer_text.contains("Spending looks stable."));
        assert_eq!(response.supporting_record_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_degrades_to_totals_when_model_fails_twice() {
        let agent = SummaryAgent::new(Arc::new(FailingModel), retry());
        let records = retrieved(vec![("tx-1", -42.5, Category::Meals)]);

        let response = agent
            .answer(&Query::new("summarize my spending"), &records)
            .await
            .unwrap();

        assert!(response.answer_text.contains("Total outflow: 42.50"));
        assert!(!response.warnings.is_empty());
    }
}
