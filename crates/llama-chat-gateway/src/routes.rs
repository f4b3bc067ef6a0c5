use axum::{
    http::{HeaderName, HeaderValue},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::security::{api_key_middleware, chat_rate_limit_middleware};
use crate::state::AppState;
use crate::utils::metrics::track_metrics;

/// Attribution header carried on every response
pub const CREATOR_HEADER: &str = "x-creator";
pub const CREATOR_VALUE: &str = "Made With <3 By SAHABAJ";

pub fn build_router(state: AppState) -> Router {
    // Public routes (no security)
    let public_routes = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler));

    let chat_routes = Router::new()
        .route("/chat", post(handlers::chat::chat_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            chat_rate_limit_middleware,
        ));

    // Protected routes (API key)
    let protected_routes = Router::new()
        .route("/chats", get(handlers::history::list_chats_handler))
        .route(
            "/history/{chat_id}",
            get(handlers::history::get_history_handler)
                .delete(handlers::history::delete_history_handler),
        )
        .merge(chat_routes)
        .layer(middleware::from_fn_with_state(state.clone(), api_key_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(CREATOR_HEADER),
            HeaderValue::from_static(CREATOR_VALUE),
        ))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(state)
}
