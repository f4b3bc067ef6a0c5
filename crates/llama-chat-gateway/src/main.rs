use anyhow::Result;
use llama_chat_gateway::{
    config::Settings,
    routes::build_router,
    security::ApiKeyValidator,
    services::{
        session::{JsonFileStore, SessionLocks},
        ChatService, InferenceStreamer,
    },
    state::AppState,
    utils::{Limiters, Metrics},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,llama_chat_gateway=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting LLM chat gateway...");

    // Load configuration
    let settings = Settings::load()?;
    info!("Configuration loaded");

    if settings.security.uses_default_key() {
        warn!("security.api_key is the placeholder value; API key checks are disabled");
    }

    // Initialize session storage
    let store = Arc::new(JsonFileStore::open(&settings.history.dir)?);
    info!(
        "History directory: {} (window={}, max_sessions={})",
        store.dir().display(),
        settings.history.context_window,
        settings.history.max_sessions
    );

    let metrics = Metrics::new()?;

    // Initialize services
    let streamer = InferenceStreamer::new(settings.llm.clone());
    let chat_service = Arc::new(
        ChatService::new(store, SessionLocks::new(), streamer, settings.history.clone())
            .with_metrics(metrics.clone()),
    );

    let state = AppState {
        chat_service,
        api_key: Arc::new(ApiKeyValidator::new(&settings.security)),
        limiters: Limiters::new(&settings.limits)?,
        metrics,
    };

    let app = build_router(state);

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
