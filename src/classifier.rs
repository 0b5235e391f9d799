//! Query classifier
//!
//! Maps a user query to one of the fixed agent capabilities, or
//! unsupported. Two stages: fast keyword rules over capability-indicative
//! terms, then a model-based fallback constrained to the capability enum.
//! An explicit `requested_capability` on the query overrides both stages.
//! Misrouting is the failure mode this component exists to prevent, so an
//! undecidable query is surfaced as unsupported rather than guessed.

use crate::gemini::{generate_with_retry, ReasoningModel, RetryPolicy};
use crate::models::{Capability, ClassificationResult, Query};
use std::sync::Arc;
use tracing::{debug, info};

/// Static keyword lists — zero allocation
const SUMMARY_KEYWORDS: &[&str] = &[
    "summary", "summarize", "summarise", "overview", "total", "balance",
    "how much did i spend", "net", "overall",
];

const TAX_KEYWORDS: &[&str] = &[
    "tax", "deduct", "deductible", "deduction", "write off", "write-off",
    "irs", "expense claim",
];

const SPENDING_KEYWORDS: &[&str] = &[
    "spending", "pattern", "trend", "habit", "per month", "monthly",
    "by category", "top merchant", "biggest", "where does my money",
];

const COMPLIANCE_KEYWORDS: &[&str] = &[
    "suspicious", "fraud", "fraudulent", "anomaly", "anomalies", "risky",
    "compliance", "aml", "launder", "duplicate", "unusual",
];

const MODEL_SYSTEM_PROMPT: &str = "You are an intent classifier for a personal \
finance assistant. You MUST respond with exactly one word from the allowed list.";

/// Confidence assigned to a model-based decision; below the override (1.0)
/// and above the rule threshold.
const MODEL_CONFIDENCE: f32 = 0.75;

pub struct QueryClassifier {
    model: Arc<dyn ReasoningModel>,
    confidence_threshold: f32,
    retry: RetryPolicy,
}

impl QueryClassifier {
    pub fn new(
        model: Arc<dyn ReasoningModel>,
        confidence_threshold: f32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            confidence_threshold,
            retry,
        }
    }

    /// Classify a query. Ambiguity is never an error: when neither rules
    /// nor the model can decide, the result is unsupported.
    pub async fn classify(&self, query: &Query) -> ClassificationResult {
        if let Some(capability) = query.requested_capability {
            return ClassificationResult {
                capability: Some(capability),
                confidence: 1.0,
                rationale: Some("caller-requested capability".to_string()),
            };
        }

        let text = query.text.to_lowercase();

        if let Some((capability, confidence)) = rule_match(&text) {
            if confidence >= self.confidence_threshold {
                debug!(capability = %capability, confidence, "Keyword rule fired");
                return ClassificationResult {
                    capability: Some(capability),
                    confidence,
                    rationale: Some("keyword rule".to_string()),
                };
            }
        }

        self.classify_with_model(&query.text).await
    }

    async fn classify_with_model(&self, text: &str) -> ClassificationResult {
        let prompt = format!(
            "Classify this user question into one capability:\n\n\
             \"{}\"\n\n\
             Allowed capabilities:\n\
             - summary: spending totals, balances, overviews\n\
             - tax: deductibility, tax calculations, IRS rules\n\
             - spending_pattern: trends, habits, category or monthly breakdowns\n\
             - compliance: suspicious, fraudulent, or risky transactions\n\
             - unsupported: anything else\n\n\
             Answer with ONLY the capability name, nothing else.",
            text
        );

        let raw = match generate_with_retry(
            self.model.as_ref(),
            MODEL_SYSTEM_PROMPT,
            &prompt,
            &self.retry,
        )
        .await
        {
            Ok(raw) => raw,
            Err(e) => {
                info!(error = %e, "Model fallback unavailable, returning unsupported");
                return ClassificationResult {
                    capability: None,
                    confidence: 0.0,
                    rationale: Some(format!("model fallback unavailable: {}", e)),
                };
            }
        };

        let normalized = raw.trim().to_lowercase();

        // The model occasionally wraps the answer ("Capability: tax").
        // Longest names checked first so "spending_pattern" never reads
        // as "summary" via a stray substring.
        let capability = if normalized.contains("spending_pattern")
            || normalized.contains("spending pattern")
        {
            Some(Capability::SpendingPattern)
        } else if normalized.contains("compliance") {
            Some(Capability::Compliance)
        } else if normalized.contains("summary") {
            Some(Capability::Summary)
        } else if normalized.contains("tax") {
            Some(Capability::Tax)
        } else {
            None
        };

        match capability {
            Some(capability) => ClassificationResult {
                capability: Some(capability),
                confidence: MODEL_CONFIDENCE,
                rationale: Some("model fallback".to_string()),
            },
            None => ClassificationResult {
                capability: None,
                confidence: 0.0,
                rationale: Some(format!("model returned unrecognized intent: {}", raw.trim())),
            },
        }
    }
}

/// Count keyword hits per capability; a strict winner becomes the rule
/// decision, a tie falls through to the model.
fn rule_match(text: &str) -> Option<(Capability, f32)> {
    let count = |keywords: &[&str]| keywords.iter().filter(|kw| text.contains(**kw)).count();

    let scores = [
        (Capability::Summary, count(SUMMARY_KEYWORDS)),
        (Capability::Tax, count(TAX_KEYWORDS)),
        (Capability::SpendingPattern, count(SPENDING_KEYWORDS)),
        (Capability::Compliance, count(COMPLIANCE_KEYWORDS)),
    ];

    let (best, best_count) = scores
        .iter()
        .max_by_key(|(_, count)| *count)
        .copied()
        .expect("non-empty score table");

    if best_count == 0 {
        return None;
    }

    let runner_up = scores
        .iter()
        .filter(|(capability, _)| *capability != best)
        .map(|(_, count)| *count)
        .max()
        .unwrap_or(0);

    if runner_up == best_count {
        return None;
    }

    let confidence = (0.5 + 0.2 * best_count as f32).min(0.95);
    Some((best, confidence))
}
