use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use decant_common::config::{load_system_config, RuntimeEnv, ServerConfig};
use decant_common::types::ExtractOptions;

use decant_server::circuit_breaker::CircuitBreakerRegistry;
use decant_server::classify::Classifier;
use decant_server::enrich::EnrichmentQueue;
use decant_server::extract::ExtractorFactory;
use decant_server::http::{build_router, ApiRateLimiter, AppState};
use decant_server::import::{ImportCache, ImportPipeline};
use decant_server::keystore::Keystore;
use decant_server::llm::{LlmCaller, LlmClient};
use decant_server::similarity::SimilarityEngine;
use decant_server::store::Store;

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Decant server starting");

    // Tuning parameters — fail loudly on a malformed file.
    let system_path = std::env::var("DECANT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("decant.toml"));
    let system = match load_system_config(&system_path) {
        Ok(system) => system,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // SQLite: connect, migrate, seed. Migrations run to completion
    // before the server accepts requests.
    let store = match Store::connect(&config.database_path).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open database");
            std::process::exit(1);
        }
    };
    if let Err(e) = store.migrate().await {
        tracing::error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }
    if let Err(e) = store.ensure_taxonomy_seeded().await {
        tracing::error!(error = %e, "Failed to seed taxonomy roots");
        std::process::exit(1);
    }
    let store = Arc::new(store);

    tracing::info!("Database ready");

    let breakers = Arc::new(CircuitBreakerRegistry::new());

    // Keystore lives next to the database file.
    let keystore_path = config
        .database_path
        .parent()
        .map(|dir| dir.join("keys.json.enc"))
        .unwrap_or_else(|| PathBuf::from("keys.json.enc"));
    let keystore = match Keystore::open(keystore_path, config.master_key.clone()) {
        Ok(keystore) => Arc::new(keystore),
        Err(e) => {
            tracing::error!(error = %e, "Failed to open keystore");
            std::process::exit(1);
        }
    };

    // Environment keys win over keystore entries.
    let openai_key = config
        .openai_api_key
        .clone()
        .or_else(|| keystore.get("openai"));

    let llm: Option<Arc<dyn LlmCaller>> = LlmClient::new(
        openai_key,
        config.openai_base_url.clone(),
        config.openai_model.clone(),
        system.llm.clone(),
        &breakers,
    )
    .map(|client| Arc::new(client) as Arc<dyn LlmCaller>);

    if llm.is_none() {
        tracing::warn!("No LLM configured — classification will use fallbacks");
    }

    let http_client = reqwest::Client::builder()
        .user_agent("decant-import/0.1")
        .build()
        .expect("Failed to build HTTP client");

    let factory = Arc::new(
        ExtractorFactory::new(http_client, Arc::clone(&breakers), system.extraction.clone())
            .with_llm(llm.clone()),
    );

    let extract_opts = ExtractOptions {
        youtube_api_key: config
            .youtube_api_key
            .clone()
            .or_else(|| keystore.get("youtube")),
        github_token: config.github_token.clone().or_else(|| keystore.get("github")),
        twitter_bearer_token: config
            .twitter_bearer_token
            .clone()
            .or_else(|| keystore.get("twitter")),
        timeout: Some(Duration::from_secs(system.extraction.request_timeout_seconds)),
    };

    let similarity = Arc::new(SimilarityEngine::new(
        Arc::clone(&store),
        system.similarity.clone(),
    ));

    let enrichment = EnrichmentQueue::start(
        Arc::clone(&store),
        Arc::clone(&factory),
        Arc::clone(&similarity),
        extract_opts.clone(),
    );

    let pipeline = Arc::new(ImportPipeline::new(
        Arc::clone(&store),
        Arc::clone(&factory),
        Classifier::new(llm, system.llm.clone()),
        Arc::new(ImportCache::new(Duration::from_secs(
            system.cache.import_ttl_seconds,
        ))),
        Arc::clone(&similarity),
        Some(enrichment),
        extract_opts,
    ));

    // Periodic circuit breaker state gauges.
    {
        let breakers = Arc::clone(&breakers);
        tokio::spawn(async move {
            let interval = Duration::from_secs(30);
            loop {
                tokio::time::sleep(interval).await;
                breakers.report_metrics();
            }
        });
    }

    let state = Arc::new(AppState {
        store,
        pipeline,
        similarity,
        keystore,
        breakers,
        rate_limiter: Arc::new(ApiRateLimiter::new(config.rate_limit.clone())),
        metrics_handle: Some(metrics_handle),
        search_config: system.search.clone(),
        production: config.env == RuntimeEnv::Prod,
    });

    let app = build_router(state, &config.cors_allowed_origins);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = config.port, "Decant server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("HTTP server error");
}
