//! Tax agent
//!
//! Applies the category deduction whitelist before any model involvement.
//! Records the rules cannot classify are flagged "needs review" instead of
//! being asserted either way; the model only explains the rule outcomes.

use crate::agents::{narrate_or_degrade, Agent};
use crate::gemini::{ReasoningModel, RetryPolicy};
use crate::models::{AgentResponse, Capability, Category, Query, RetrievalResult, TransactionRecord};
use crate::Result;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a tax deduction assistant. Explain deduction \
rules clearly and simply. Do not make legal determinations.";

/// Deduction percentage per category. `None` means the rules cannot
/// classify the record and a human needs to review it.
fn deduction_rate(category: Category) -> Option<f64> {
    match category {
        Category::Meals => Some(0.50),
        Category::Travel => Some(1.00),
        Category::Electronics => Some(0.30),
        Category::Other => None,
        _ => Some(0.0),
    }
}

pub struct TaxAgent {
    model: Arc<dyn ReasoningModel>,
    retry: RetryPolicy,
}

impl TaxAgent {
    pub fn new(model: Arc<dyn ReasoningModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }
}

#[async_trait::async_trait]
impl Agent for TaxAgent {
    fn capability(&self) -> Capability {
        Capability::Tax
    }

    async fn answer(&self, query: &Query, retrieved: &RetrievalResult) -> Result<AgentResponse> {
        if retrieved.is_empty() {
            return Ok(AgentResponse {
                capability: Capability::Tax,
                answer_text: "No expense records were retrieved, so there is nothing \
                              to assess for deductibility."
                    .to_string(),
                supporting_record_ids: Vec::new(),
                warnings: vec!["no supporting evidence retrieved".to_string()],
            });
        }

        let analysis = analyze(retrieved);
        let deterministic = analysis.render();

        let prompt = format!(
            "User question:\n{}\n\nRule-based deduction analysis:\n{}\n\n\
             Explain these deduction outcomes in 2-3 sentences each, based on \
             common business expense rules. Do not change any amounts or \
             percentages, and do not classify the records marked as needing review.",
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

        let mut supporting_record_ids: Vec<String> = analysis
            .deductible
            .iter()
            .map(|d| d.record.id.clone())
            .collect();
        supporting_record_ids.extend(analysis.needs_review.iter().map(|r| r.id.clone()));

        Ok(AgentResponse {
            capability: Capability::Tax,
            answer_text,
            supporting_record_ids,
            warnings,
        })
    }
}

//
// ================= Rule Engine =================
//

struct Deduction {
    record: TransactionRecord,
    rate: f64,
    deductible_amount: f64,
}

struct TaxAnalysis {
    deductible: Vec<Deduction>,
    non_deductible: Vec<TransactionRecord>,
    needs_review: Vec<TransactionRecord>,
}

impl TaxAnalysis {
    fn total_deductible(&self) -> f64 {
        self.deductible.iter().map(|d| d.deductible_amount).sum()
    }

    fn render(&self) -> String {
        let mut out = String::new();

        if self.deductible.is_empty() {
            out.push_str("No retrieved records match the deductible categories.\n");
        } else {
            out.push_str("Deductible records:\n");
            for d in &self.deductible {
                out.push_str(&format!(
                    "  {} ({}, {}): {:.0}% of {:.2} = {:.2}\n",
                    d.record.id,
                    d.record.category,
                    d.record.description,
                    d.rate * 100.0,
                    d.record.amount.abs(),
                    d.deductible_amount
                ));
            }
            out.push_str(&format!(
                "Estimated total deduction: {:.2}\n",
                self.total_deductible()
            ));
        }

        if !self.needs_review.is_empty() {
            out.push_str("Needs review (category not classifiable by rule):\n");
            for r in &self.needs_review {
                out.push_str(&format!("  {} ({}): {:.2}\n", r.id, r.description, r.amount));
            }
        }

        if !self.non_deductible.is_empty() {
            out.push_str(&format!(
                "Not deductible: {} record(s)\n",
                self.non_deductible.len()
            ));
        }

        out.trim_end().to_string()
    }
}

fn analyze(retrieved: &RetrievalResult) -> TaxAnalysis {
    let mut deductible = Vec::new();
    let mut non_deductible = Vec::new();
    let mut needs_review = Vec::new();

    for scored in &retrieved.records {
        let record = scored.record.clone();
        match deduction_rate(record.category) {
            Some(rate) if rate > 0.0 => {
                let deductible_amount = record.amount.abs() * rate;
                deductible.push(Deduction {
                    record,
                    rate,
                    deductible_amount,
                });
            }
            Some(_) => non_deductible.push(record),
            None => needs_review.push(record),
        }
    }

    TaxAnalysis {
        deductible,
        non_deductible,
        needs_review,
    }
}
