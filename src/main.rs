//! Agora search service.
//!
//! The read side of the platform: verifies broker connectivity, ensures the
//! search collection exists, spawns one indexing consumer per question
//! event kind, and serves the search HTTP surface until shutdown.
//!
//! ## Configuration
//!
//! `config/agora.toml` (overridable via `AGORA_CONFIG`), plus:
//! - `AGORA_CONSUMER_NAME`: base name for this process's consumers
//! - `RUST_LOG`: logging level (default: "info")

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use agora::broker::Broker;
use agora::config::AgoraConfig;
use agora::consumer::{default_consumer_name, ConsumerStats, EventConsumer};
use agora::event::EventKind;
use agora::index::{SearchDocument, SearchQuery, TypesenseIndex};
use agora::query::parse_query;
use agora::shutdown::ShutdownSignal;
use agora::SearchIndex;

struct AppState {
    index: Arc<dyn SearchIndex>,
    broker: Broker,
    consumers: Vec<(EventKind, Arc<ConsumerStats>)>,
    started: Instant,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = AgoraConfig::load().unwrap_or_else(|e| {
        error!(error = %e, "Failed to load config, using defaults");
        AgoraConfig::default()
    });

    // Connectivity guard: nothing else starts until the broker answers,
    // and exhausting the retries is fatal.
    let broker = match Broker::connect(&config.broker.url, &config.broker.consumer_group).await {
        Ok(broker) => broker,
        Err(e) => {
            error!(error = %e, "Broker unreachable, aborting startup");
            std::process::exit(1);
        }
    };
    info!(url = %config.broker.url, "Broker connected");

    let index: Arc<dyn SearchIndex> = Arc::new(
        TypesenseIndex::new(&config.index.url, &config.index.api_key)
            .with_timeout(Duration::from_millis(config.index.timeout_ms)),
    );

    // Schema creation failure is non-fatal: the service starts serving
    // queries and consuming events regardless.
    if let Err(e) = index.ensure_schema().await {
        error!(error = %e, "Failed to ensure search collection");
    }

    let shutdown = ShutdownSignal::new();
    let base_name = config
        .broker
        .consumer_name
        .clone()
        .unwrap_or_else(default_consumer_name);

    let mut consumers = Vec::new();
    let mut handles = Vec::new();
    for kind in EventKind::all() {
        let consumer = EventConsumer::new(broker.clone(), index.clone(), kind)
            .with_name(format!("{}-{}", base_name, kind))
            .with_policy(config.consumer.on_missing_update)
            .with_read_options(config.consumer.batch_size, config.consumer.block_ms);

        consumers.push((kind, consumer.stats()));

        let consumer_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(consumer_shutdown).await {
                error!(kind = %kind, error = %e, "Consumer terminated");
            }
        }));
    }

    let state = Arc::new(AppState {
        index,
        broker,
        consumers,
        started: Instant::now(),
    });

    let app = Router::new()
        .route("/search", get(search))
        .route("/search/similar-titles", get(similar_titles))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server.port)
        .parse()
        .expect("Invalid listen address");

    info!(%addr, "Search service listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listen address");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.wait().await })
        .await
        .expect("Server error");

    // wait() has already notified the consumers; let them finish their
    // current batch and exit.
    for handle in handles {
        let _ = handle.await;
    }
    info!("Search service stopped");
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
}

type ProblemResponse = (StatusCode, Json<Value>);

/// Generic problem document: the underlying message text and nothing else.
fn problem(title: &str, detail: impl std::fmt::Display) -> ProblemResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "title": title, "detail": detail.to_string() })),
    )
}

/// `GET /search?query=<text>` — free text with an optional `[tag]` filter.
async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchDocument>>, ProblemResponse> {
    let parsed = parse_query(&params.query);
    let query = SearchQuery::new(parsed.text).with_tag(parsed.tag);

    match state.index.search(&query).await {
        Ok(documents) => Ok(Json(documents)),
        Err(e) => {
            error!(error = %e, "Search failed");
            Err(problem("Search failed", e))
        }
    }
}

/// `GET /search/similar-titles?query=<text>` — title-only match, no tag
/// parsing.
async fn similar_titles(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchDocument>>, ProblemResponse> {
    let query = SearchQuery::new(params.query).titles_only();

    match state.index.search(&query).await {
        Ok(documents) => Ok(Json(documents)),
        Err(e) => {
            error!(error = %e, "Similar-title search failed");
            Err(problem("Search failed", e))
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    state.broker.ping().await.map_err(|e| {
        error!(error = %e, "Health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(json!({ "status": "ok", "broker": "connected" })))
}

/// Indexing failures are invisible to searchers; these counters are where
/// they become observable.
async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let consumers: serde_json::Map<String, Value> = state
        .consumers
        .iter()
        .map(|(kind, stats)| {
            (
                kind.as_str().to_string(),
                json!({
                    "processed": stats.processed(),
                    "failed": stats.failed(),
                }),
            )
        })
        .collect();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started.elapsed().as_secs(),
        "consumers": consumers,
    }))
}
