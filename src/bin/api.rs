use expense_rag_orchestrator::{
    agents::create_default_registry,
    api::start_server,
    classifier::QueryClassifier,
    config::Config,
    dispatcher::Dispatcher,
    embedding::GeminiEmbedder,
    gemini::{GeminiClient, RetryPolicy},
    retrieval::Retriever,
    store::TransactionStore,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("GEMINI_API_KEY not set in .env");
        eprintln!("See .env.example for setup instructions");
        String::new()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let config = Config::from_env();

    info!("Expense RAG Orchestrator - API Server");
    info!("Port: {}", api_port);

    // Create components
    let embedder = Arc::new(GeminiEmbedder::new(
        gemini_api_key.clone(),
        config.embedding_dim,
        config.model_timeout_secs,
    ));
    let model = Arc::new(GeminiClient::new(gemini_api_key, config.model_timeout_secs));

    let store = Arc::new(TransactionStore::open(embedder.clone(), &config)?);
    let retriever = Retriever::new(store.clone(), embedder);
    let classifier = QueryClassifier::new(
        model.clone(),
        config.classifier_confidence_threshold,
        RetryPolicy::from_config(&config),
    );
    let agents = create_default_registry(model, &config);

    // Create dispatcher
    let dispatcher = Arc::new(Dispatcher::new(
        classifier, retriever, agents, store, config,
    ));

    info!("Dispatcher initialized");
    info!("Starting API server...");

    // Start API server
    start_server(dispatcher, api_port).await?;

    Ok(())
}
