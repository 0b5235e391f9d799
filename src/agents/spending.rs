//! Spending-pattern agent
//!
//! KPIs (monthly totals, category totals, top spends) are computed from
//! the retrieved records in code; the model is only ever asked to narrate
//! the numbers it is handed. It never computes them.

use crate::agents::{narrate_or_degrade, Agent};
use crate::gemini::{ReasoningModel, RetryPolicy};
use crate::models::{AgentResponse, Capability, Category, Query, RetrievalResult};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a helpful financial analyst. Explain clearly \
and briefly, focusing on actionable insights.";

/// Largest transactions shown in the KPI block.
const TOP_N: usize = 5;

pub struct SpendingPatternAgent {
    model: Arc<dyn ReasoningModel>,
    retry: RetryPolicy,
}

impl SpendingPatternAgent {
    pub fn new(model: Arc<dyn ReasoningModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }
}

#[async_trait::async_trait]
impl Agent for SpendingPatternAgent {
    fn capability(&self) -> Capability {
        Capability::SpendingPattern
    }

    async fn answer(&self, query: &Query, retrieved: &RetrievalResult) -> Result<AgentResponse> {
        if retrieved.is_empty() {
            return Ok(AgentResponse {
                capability: Capability::SpendingPattern,
                answer_text: "No transaction data is available to analyze spending \
                              patterns."
                    .to_string(),
                supporting_record_ids: Vec::new(),
                warnings: vec!["no supporting evidence retrieved".to_string()],
            });
        }

        let kpis = compute_kpis(retrieved);
        let deterministic = kpis.render();

        let prompt = format!(
            "User question:\n{}\n\nComputed spending KPIs:\n{}\n\n\
             Write a concise narrative (1-2 short paragraphs plus 3-5 bullet \
             insights) covering the trend over time, which categories dominate, \
             and the largest transactions. Use ONLY the numbers above.",
            query.text, deterministic
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
            capability: Capability::SpendingPattern,
            answer_text,
            supporting_record_ids: retrieved.record_ids(),
            warnings,
        })
    }
}

//
// ================= KPI Computation =================
//

struct SpendingKpis {
    monthly: Vec<(String, f64)>,
    by_category: Vec<(Category, f64)>,
    top_spends: Vec<(String, String, f64)>,
}

impl SpendingKpis {
    fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("Monthly totals:\n");
        for (month, total) in &self.monthly {
            out.push_str(&format!("  {}: {:.2}\n", month, total));
        }

        out.push_str("Totals by category:\n");
        for (category, total) in &self.by_category {
            out.push_str(&format!("  {}: {:.2}\n", category, total));
        }

        out.push_str(&format!("Top {} transactions by amount:\n", self.top_spends.len()));
        for (id, description, amount) in &self.top_spends {
            out.push_str(&format!("  {} ({}): {:.2}\n", id, description, amount));
        }

        out.trim_end().to_string()
    }
}

fn compute_kpis(retrieved: &RetrievalResult) -> SpendingKpis {
    // BTreeMap keeps months in chronological order
    let mut monthly: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_category: BTreeMap<String, (Category, f64)> = BTreeMap::new();

    for scored in &retrieved.records {
        let record = &scored.record;
        *monthly
            .entry(record.date.format("%Y-%m").to_string())
            .or_insert(0.0) += record.amount;
        by_category
            .entry(record.category.to_string())
            .or_insert((record.category, 0.0))
            .1 += record.amount;
    }

    let mut by_category: Vec<(Category, f64)> =
        by_category.into_values().collect();
    by_category.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut top_spends: Vec<(String, String, f64)> = retrieved
        .records
        .iter()
        .map(|s| {
            (
                s.record.id.clone(),
                s.record.description.clone(),
                s.record.amount,
            )
        })
        .collect();
    top_spends.sort_by(|a, b| {
        b.2.abs()
            .partial_cmp(&a.2.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    top_spends.truncate(TOP_N);

    SpendingKpis {
        monthly: monthly.into_iter().collect(),
        by_category,
        top_spends,
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
            Err(DispatchError::ReasoningModelFailure("rate limited".into()))
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            retries: 1,
            backoff: Duration::from_millis(1),
        }
    }

    fn retrieved(rows: Vec<(&str, &str, f64, Category)>) -> RetrievalResult {
        RetrievalResult {
            records: rows
                .into_iter()
                .map(|(id, date, amount, category)| ScoredRecord {
                    record: TransactionRecord {
                        id: id.to_string(),
                        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                        description: format!("{} purchase", id),
                        merchant: None,
                        amount,
                        category,
                        source_document_id: "doc-1".to_string(),
                    },
                    score: 0.8,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_kpis_bucket_by_month_and_category() {
        let agent =
            SpendingPatternAgent::new(Arc::new(StubModel::new("Spending rose in February.")), retry());
        let records = retrieved(vec![
            ("tx-1", "2025-01-05", -100.0, Category::Meals),
            ("tx-2", "2025-01-20", -50.0, Category::Travel),
            ("tx-3", "2025-02-03", -200.0, Category::Meals),
        ]);

        let response = agent
            .answer(&Query::new("how is my spending trending"), &records)
            .await
            .unwrap();

        assert!(response.answer_text.contains("2025-01: -150.00"));
        assert!(response.answer_text.contains("2025-02: -200.00"));
        assert!(response.answer_text.contains("MEALS: -300.00"));
        assert!(response.answer_text.contains("TRAVEL: -50.00"));
        assert!(response.answer_text.contains("Spending rose in February."));
    }

    #[tokio::test]
    async fn test_partial_success_keeps_correct_kpis() {
        // model fails on both attempts; the KPI block must survive intact
        let agent = SpendingPatternAgent::new(Arc::new(FailingModel), retry());
        let records = retrieved(vec![
            ("tx-1", "2025-01-05", -100.0, Category::Meals),
            ("tx-2", "2025-01-20", -50.0, Category::Travel),
        ]);

        let response = agent
            .answer(&Query::new("spending patterns?"), &records)
            .await
            .unwrap();

        assert!(response.answer_text.contains("2025-01: -150.00"));
        assert!(response.answer_text.contains("tx-1 (tx-1 purchase): -100.00"));
        assert!(!response.warnings.is_empty());
        assert_eq!(response.supporting_record_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_top_spends_ranked_by_absolute_amount() {
        let records = retrieved(vec![
            ("tx-small", "2025-01-05", -10.0, Category::Meals),
            ("tx-big", "2025-01-06", -500.0, Category::Electronics),
            ("tx-mid", "2025-01-07", 100.0, Category::Income),
        ]);

        let kpis = compute_kpis(&records);
        assert_eq!(kpis.top_spends[0].0, "tx-big");
        assert_eq!(kpis.top_spends[1].0, "tx-mid");
        assert_eq!(kpis.top_spends[2].0, "tx-small");
    }

    #[tokio::test]
    async fn test_empty_retrieval_is_deterministic() {
        let agent = SpendingPatternAgent::new(Arc::new(FailingModel), retry());
        let response = agent
            .answer(&Query::new("patterns?"), &RetrievalResult::empty())
            .await
            .unwrap();

        assert!(response.answer_text.contains("No transaction data"));
        assert!(!response
            .warnings
            .iter()
            .any(|w| w.contains("narrative generation failed")));
    }
}
