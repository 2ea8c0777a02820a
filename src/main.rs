//! Recipe Extractor - turns pasted recipe text or supported recipe pages into
//! structured recipes via an LLM, with per-user daily quotas and an audit log.

mod auth;
mod config;
mod error;
mod extractor;
mod fetch;
mod limiter;
mod openrouter;
mod pipeline;
mod reducer;
mod schema;
mod sites;
mod supabase;
mod validator;

#[cfg(test)]
mod testing;

use anyhow::Context;
use auth::{AuthUser, SessionVerifier};
use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    response::Json,
    routing::{get, post},
    Router,
};
use config::AppConfig;
use error::ApiError;
use extractor::RecipeExtractor;
use fetch::HttpFetcher;
use limiter::{DailyUsage, RateLimiter};
use openrouter::{ChatCompletion, OpenRouterClient};
use pipeline::{ExtractionResponse, ExtractionService};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use supabase::SupabaseClient;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    service: ExtractionService,
    chat: Arc<dyn ChatCompletion>,
    sessions: Arc<dyn SessionVerifier>,
}

impl FromRef<AppState> for Arc<dyn SessionVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "recipe_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    info!("Using model {} via {}", config.gateway.default_model, config.gateway.base_url);

    let chat: Arc<dyn ChatCompletion> = Arc::new(OpenRouterClient::new(config.gateway.clone())?);
    let fetcher = Arc::new(HttpFetcher::new()?);
    let supabase = Arc::new(SupabaseClient::new(&config.supabase));
    info!("Supabase client initialized for {}", config.supabase.url);

    let extractor = Arc::new(RecipeExtractor::new(chat.clone(), fetcher));
    let limiter = RateLimiter::new(supabase.clone());

    let state = AppState {
        service: ExtractionService::new(extractor, limiter),
        chat,
        sessions: supabase,
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/extract/text", post(extract_text))
        .route("/api/extract/url", post(extract_url))
        .route("/api/extract/usage", get(usage))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "model_gateway_connected": state.chat.is_connected(),
    }))
}

#[derive(Debug, Deserialize)]
struct TextRequest {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct UrlRequest {
    #[serde(default)]
    url: String,
}

async fn extract_text(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<ExtractionResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let response = state.service.extract_from_text(&user_id, &request.text).await?;
    Ok(Json(response))
}

async fn extract_url(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> Result<Json<ExtractionResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let response = state.service.extract_from_url(&user_id, &request.url).await?;
    Ok(Json(response))
}

/// Today's quota for the caller.
async fn usage(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<DailyUsage>, ApiError> {
    let usage = state
        .service
        .limiter()
        .usage(&user_id)
        .await
        .map_err(|e| ApiError::storage(&e))?;
    Ok(Json(usage))
}
