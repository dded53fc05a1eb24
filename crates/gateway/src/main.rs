//! Caselake Gateway
//!
//! The chat surface over the query orchestrator.
//! Handles:
//! - Request validation and input sanitization
//! - Intent planning, tool dispatch, and answer composition
//! - Rate limiting
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use caselake_common::{
    config::AppConfig,
    db::DbPool,
    lake::FsObjectStore,
    llm::LlmClient,
    metrics,
    VERSION,
};
use caselake_orchestrator::{
    dispatcher::{DispatchConfig, ToolDispatcher},
    knowledge::HttpKnowledgeRetriever,
    query_engine::{HttpQueryEngine, QueryEngineAdapter},
    tools::{AdvisoryTool, CaseAggregationTool, CostUsageTool, KnowledgeInsightTool, Tool, ToolName},
    Composer,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub dispatcher: Arc<ToolDispatcher>,
    pub composer: Arc<Composer>,
    pub tools: Arc<BTreeMap<ToolName, Arc<dyn Tool>>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Caselake Gateway v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("Prometheus exporter listening on {}", addr);
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    // Wire up the orchestrator: each tool gets only the handles it declares
    let llm = Arc::new(LlmClient::new(config.llm.clone())?);
    let query_engine = Arc::new(HttpQueryEngine::new(&config.query_engine)?);
    let adapter = Arc::new(QueryEngineAdapter::new(query_engine, &config.query_engine));
    let retriever = Arc::new(HttpKnowledgeRetriever::new(&config.knowledge)?);
    let lake = Arc::new(FsObjectStore::new(&config.lake.root));

    let mut tools: BTreeMap<ToolName, Arc<dyn Tool>> = BTreeMap::new();
    tools.insert(
        ToolName::CaseAggregation,
        Arc::new(CaseAggregationTool::new(llm.clone(), adapter.clone())),
    );
    tools.insert(
        ToolName::KnowledgeInsight,
        Arc::new(KnowledgeInsightTool::new(retriever, config.knowledge.top_k)),
    );
    tools.insert(
        ToolName::Advisory,
        Arc::new(AdvisoryTool::new(lake, llm.clone())),
    );
    tools.insert(ToolName::CostUsage, Arc::new(CostUsageTool::new(adapter)));

    let dispatcher = Arc::new(ToolDispatcher::new(DispatchConfig::from(&config.orchestrator)));
    let composer = Arc::new(Composer::new(llm, config.orchestrator.max_tokens));

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        dispatcher,
        composer,
        tools: Arc::new(tools),
    };

    // Build the router
    let app = create_router(state, &config);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState, config: &AppConfig) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let mut api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Chat endpoint
        .route("/v1/chat", post(handlers::chat::chat));

    // Rate limiting
    if config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );
        api_routes = api_routes.layer(axum::middleware::from_fn(move |request, next| {
            let limiter = limiter.clone();
            middleware::rate_limit::rate_limit_middleware(request, next, limiter)
        }));
    }

    // Compose the app
    api_routes
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
