//! Agent trait and registry
//!
//! One agent per capability. Every agent computes its deterministic
//! portion first (totals, rule flags, KPIs); the reasoning model only
//! narrates what was already computed. A model failure is retried once and
//! then degrades to the deterministic portion with a warning, never a hard
//! error.

use crate::config::Config;
use crate::gemini::{generate_with_retry, ReasoningModel, RetryPolicy};
use crate::models::{AgentResponse, Capability, Query, RetrievalResult};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub mod compliance;
pub mod spending;
pub mod summary;
pub mod tax;

pub use compliance::ComplianceAgent;
pub use spending::SpendingPatternAgent;
pub use summary::SummaryAgent;
pub use tax::TaxAgent;

/// Trait for a capability-specific answering agent
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn capability(&self) -> Capability;
    async fn answer(&self, query: &Query, retrieved: &RetrievalResult) -> Result<AgentResponse>;
}

/// Registry for looking up agents by capability
pub struct AgentRegistry {
    agents: HashMap<Capability, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.capability(), agent);
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn Agent>> {
        self.agents.get(&capability).cloned()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.agents.keys().copied().collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with all four capability agents.
pub fn create_default_registry(model: Arc<dyn ReasoningModel>, config: &Config) -> AgentRegistry {
    let retry = RetryPolicy::from_config(config);

    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(SummaryAgent::new(model.clone(), retry.clone())));
    registry.register(Arc::new(TaxAgent::new(model.clone(), retry.clone())));
    registry.register(Arc::new(SpendingPatternAgent::new(
        model.clone(),
        retry.clone(),
    )));
    registry.register(Arc::new(ComplianceAgent::new(
        model,
        retry,
        compliance::create_default_rules(config),
    )));
    registry
}

//
// ================= Shared Helpers =================
//

/// Render retrieved records for a model prompt, one numbered source line
/// per record so the model can cite them.
pub(crate) fn render_records(retrieved: &RetrievalResult) -> String {
    retrieved
        .records
        .iter()
        .enumerate()
        .map(|(i, scored)| {
            let r = &scored.record;
            format!(
                "Source {} (record_id={}): {} | {} | {} | {:.2}",
                i + 1,
                r.id,
                r.date,
                r.category,
                r.description,
                r.amount
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run the narration call under the retry policy. On success the
/// narrative is appended to the deterministic portion; on a second failure
/// the deterministic portion stands alone and a warning records why.
pub(crate) async fn narrate_or_degrade(
    model: &dyn ReasoningModel,
    retry: &RetryPolicy,
    system: &str,
    prompt: &str,
    deterministic: String,
) -> (String, Vec<String>) {
    match generate_with_retry(model, system, prompt, retry).await {
        Ok(narration) => (
            format!("{}\n\n{}", deterministic, narration.trim()),
            Vec::new(),
        ),
        Err(e) => {
            warn!(error = %e, "Narrative generation failed, degrading to computed answer");
            (
                deterministic,
                vec![format!("narrative generation failed: {}", e)],
            )
        }
    }
}
