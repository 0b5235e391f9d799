//! Compliance agent
//!
//! Deterministic rule checks are the source of truth: a record is only
//! ever flagged by a rule, never by the model. The model's sole job is to
//! explain already-flagged records in plain language.

use crate::agents::{narrate_or_degrade, Agent};
use crate::config::Config;
use crate::gemini::{ReasoningModel, RetryPolicy};
use crate::models::{AgentResponse, Capability, Category, Query, RetrievalResult, TransactionRecord};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are an experienced bank compliance officer. \
Explain suspicion levels clearly, but do not claim to make legal determinations.";

const HIGH_RISK_KEYWORDS: &[&str] = &[
    "CRYPTO", "BINANCE", "COINBASE", "GAMBLING", "CASINO", "BET", "POKER", "FOREX",
];

//
// ================= Rules =================
//

/// One rule hit against one record.
#[derive(Debug, Clone)]
pub struct RuleFlag {
    pub record_id: String,
    pub rule_name: &'static str,
    pub details: String,
    pub points: f32,
}

/// Trait for deterministic compliance rules
pub trait ComplianceRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, records: &[TransactionRecord]) -> Vec<RuleFlag>;
}

/// Two records with the same amount and dates within the window.
pub struct DuplicateChargeRule {
    pub window_days: i64,
}

impl ComplianceRule for DuplicateChargeRule {
    fn name(&self) -> &'static str {
        "duplicate_charge"
    }

    fn check(&self, records: &[TransactionRecord]) -> Vec<RuleFlag> {
        let mut flags = Vec::new();

        for (i, a) in records.iter().enumerate() {
            let duplicate_of = records.iter().enumerate().find(|(j, b)| {
                *j != i
                    && cents(a.amount) == cents(b.amount)
                    && (a.date - b.date).num_days().abs() <= self.window_days
            });

            if let Some((_, b)) = duplicate_of {
                flags.push(RuleFlag {
                    record_id: a.id.clone(),
                    rule_name: self.name(),
                    details: format!(
                        "same amount {:.2} as record {} within {} day(s)",
                        a.amount, b.id, self.window_days
                    ),
                    points: 30.0,
                });
            }
        }

        flags
    }
}

/// Single transaction at or above the configured cutoff. A second tier at
/// five times the cutoff scores higher, mirroring the usual reporting
/// escalation.
pub struct LargeAmountRule {
    pub cutoff: f64,
}

impl ComplianceRule for LargeAmountRule {
    fn name(&self) -> &'static str {
        "large_amount"
    }

    fn check(&self, records: &[TransactionRecord]) -> Vec<RuleFlag> {
        records
            .iter()
            .filter_map(|r| {
                let magnitude = r.amount.abs();
                if magnitude >= self.cutoff * 5.0 {
                    Some(RuleFlag {
                        record_id: r.id.clone(),
                        rule_name: self.name(),
                        details: format!("very large amount {:.2}", r.amount),
                        points: 50.0,
                    })
                } else if magnitude >= self.cutoff {
                    Some(RuleFlag {
                        record_id: r.id.clone(),
                        rule_name: self.name(),
                        details: format!("large amount {:.2}", r.amount),
                        points: 25.0,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Merchant or description mentions a high-risk activity.
pub struct HighRiskMerchantRule;

impl ComplianceRule for HighRiskMerchantRule {
    fn name(&self) -> &'static str {
        "high_risk_merchant"
    }

    fn check(&self, records: &[TransactionRecord]) -> Vec<RuleFlag> {
        records
            .iter()
            .filter_map(|r| {
                let text = format!(
                    "{} {}",
                    r.description.to_uppercase(),
                    r.merchant.as_deref().unwrap_or("").to_uppercase()
                );

                HIGH_RISK_KEYWORDS
                    .iter()
                    .find(|kw| text.contains(**kw))
                    .map(|kw| RuleFlag {
                        record_id: r.id.clone(),
                        rule_name: self.name(),
                        details: format!("high-risk merchant or activity: {}", kw),
                        points: 40.0,
                    })
            })
            .collect()
    }
}

/// Transfers and unclassified records carry residual risk.
pub struct AmbiguousCategoryRule;

impl ComplianceRule for AmbiguousCategoryRule {
    fn name(&self) -> &'static str {
        "ambiguous_category"
    }

    fn check(&self, records: &[TransactionRecord]) -> Vec<RuleFlag> {
        records
            .iter()
            .filter(|r| matches!(r.category, Category::Transfer | Category::Other))
            .map(|r| RuleFlag {
                record_id: r.id.clone(),
                rule_name: self.name(),
                details: format!("ambiguous category: {}", r.category),
                points: 10.0,
            })
            .collect()
    }
}

/// Standard rule set wired from configuration.
pub fn create_default_rules(config: &Config) -> Vec<Box<dyn ComplianceRule>> {
    vec![
        Box::new(DuplicateChargeRule {
            window_days: config.duplicate_window_days,
        }),
        Box::new(LargeAmountRule {
            cutoff: config.large_amount_cutoff,
        }),
        Box::new(HighRiskMerchantRule),
        Box::new(AmbiguousCategoryRule),
    ]
}

fn cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

//
// ================= Risk Assessment =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn from_score(score: f32) -> Self {
        if score >= 75.0 {
            RiskLevel::High
        } else if score >= 40.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

struct Assessment {
    record_id: String,
    score: f32,
    level: RiskLevel,
    flags: Vec<String>,
}

fn assess(rules: &[Box<dyn ComplianceRule>], records: &[TransactionRecord]) -> Vec<Assessment> {
    // keyed by record id so flags from different rules accumulate
    let mut per_record: BTreeMap<String, (f32, Vec<String>)> = BTreeMap::new();

    for rule in rules {
        for flag in rule.check(records) {
            let entry = per_record.entry(flag.record_id).or_insert((0.0, Vec::new()));
            entry.0 += flag.points;
            entry.1.push(format!("{}: {}", flag.rule_name, flag.details));
        }
    }

    let mut assessments: Vec<Assessment> = per_record
        .into_iter()
        .map(|(record_id, (raw_score, flags))| {
            let score = raw_score.min(100.0);
            Assessment {
                record_id,
                score,
                level: RiskLevel::from_score(score),
                flags,
            }
        })
        .collect();

    assessments.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    assessments
}

//
// ================= Agent =================
//

pub struct ComplianceAgent {
    model: Arc<dyn ReasoningModel>,
    retry: RetryPolicy,
    rules: Vec<Box<dyn ComplianceRule>>,
}

impl ComplianceAgent {
    pub fn new(
        model: Arc<dyn ReasoningModel>,
        retry: RetryPolicy,
        rules: Vec<Box<dyn ComplianceRule>>,
    ) -> Self {
        Self {
            model,
            retry,
            rules,
        }
    }
}

#[async_trait::async_trait]
impl Agent for ComplianceAgent {
    fn capability(&self) -> Capability {
        Capability::Compliance
    }

    async fn answer(&self, query: &Query, retrieved: &RetrievalResult) -> Result<AgentResponse> {
        if retrieved.is_empty() {
            return Ok(AgentResponse {
                capability: Capability::Compliance,
                answer_text: "No transaction data is available to screen for \
                              suspicious activity."
                    .to_string(),
                supporting_record_ids: Vec::new(),
                warnings: vec!["no supporting evidence retrieved".to_string()],
            });
        }

        let records: Vec<TransactionRecord> = retrieved
            .records
            .iter()
            .map(|s| s.record.clone())
            .collect();

        let assessments = assess(&self.rules, &records);

        if assessments.is_empty() {
            return Ok(AgentResponse {
                capability: Capability::Compliance,
                answer_text: format!(
                    "No suspicious activity: {} record(s) screened, none flagged \
                     by the compliance rules.",
                    records.len()
                ),
                supporting_record_ids: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let deterministic = render_assessments(&assessments, records.len());

        let prompt = format!(
            "User question:\n{}\n\nRule-flagged transactions:\n{}\n\n\
             Explain in 3-5 sentences why these transactions were flagged and \
             whether this looks like normal activity or something needing review. \
             Only discuss the flagged records above; do not flag anything else.",
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

        let supporting_record_ids = assessments.iter().map(|a| a.record_id.clone()).collect();

        Ok(AgentResponse {
            capability: Capability::Compliance,
            answer_text,
            supporting_record_ids,
            warnings,
        })
    }
}

fn render_assessments(assessments: &[Assessment], screened: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} of {} screened record(s) flagged:\n",
        assessments.len(),
        screened
    ));

    for a in assessments {
        out.push_str(&format!(
            "  {} — risk {} ({:.0}/100)\n",
            a.record_id,
            a.level.as_str(),
            a.score
        ));
        for flag in &a.flags {
            out.push_str(&format!("    - {}\n", flag));
        }
    }

    out.trim_end().to_string()
}
