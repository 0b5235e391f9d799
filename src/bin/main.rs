use chrono::NaiveDate;
use expense_rag_orchestrator::{
    agents::create_default_registry,
    classifier::QueryClassifier,
    config::Config,
    dispatcher::Dispatcher,
    embedding::HashingEmbedder,
    gemini::{RetryPolicy, StubModel},
    models::{Category, Query, QueryOutcome, TransactionRecord},
    retrieval::Retriever,
    store::TransactionStore,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Expense RAG Orchestrator starting (offline demo)");

    // Stub components keep the demo functional without API keys. The
    // similarity floor drops to zero because the hashing embedder scores
    // far lower than a real semantic model.
    let config = Config {
        similarity_floor: 0.0,
        embedding_dim: 128,
        ..Config::default()
    };

    let embedder = Arc::new(HashingEmbedder::new(config.embedding_dim));
    let model = Arc::new(StubModel::new(
        "These figures were computed from your ingested transactions.",
    ));

    let store = Arc::new(TransactionStore::new(embedder.clone(), &config));
    let retriever = Retriever::new(store.clone(), embedder);
    let classifier = QueryClassifier::new(
        model.clone(),
        config.classifier_confidence_threshold,
        RetryPolicy::from_config(&config),
    );
    let agents = create_default_registry(model, &config);

    let dispatcher = Dispatcher::new(classifier, retriever, agents, store, config);

    // Ingest sample records
    let records = vec![
        sample("1", "2025-01-10", "Office lunch", -42.50, Category::Meals),
        sample("2", "2025-01-12", "Flight to client site", -320.00, Category::Travel),
        sample("3", "2025-01-12", "Conference hotel", -320.00, Category::Travel),
        sample("4", "2025-01-31", "Payroll deposit", 4200.00, Category::Income),
    ];

    let outcomes = dispatcher.ingest(records).await;
    for outcome in &outcomes {
        info!(record_id = %outcome.record_id, status = ?outcome.status, "Ingested");
    }

    // Run sample queries
    let questions = [
        "What tax deductions do I have?",
        "Are there any suspicious transactions?",
        "Summarize my expenses",
    ];

    for question in questions {
        println!("\n=== QUERY: {} ===", question);

        match dispatcher.handle(Query::new(question)).await {
            Ok(QueryOutcome::Answered(response)) => {
                println!("Capability: {}", response.capability);
                println!("Supporting records: {:?}", response.supporting_record_ids);
                if !response.warnings.is_empty() {
                    println!("Warnings: {:?}", response.warnings);
                }
                println!("\n{}", response.answer_text);
            }
            Ok(QueryOutcome::Unsupported { rationale }) => {
                println!("Unsupported request: {:?}", rationale);
            }
            Err(e) => {
                eprintln!("Dispatch failed: {}", e);
            }
        }
    }

    Ok(())
}

fn sample(id: &str, date: &str, description: &str, amount: f64, category: Category) -> TransactionRecord {
    TransactionRecord {
        id: id.to_string(),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid demo date"),
        description: description.to_string(),
        merchant: None,
        amount,
        category,
        source_document_id: "demo-statement".to_string(),
    }
}
