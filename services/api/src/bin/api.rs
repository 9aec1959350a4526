//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, FunctionCompletionAdapter, OpenAiSocraticAdapter, PgMessageFeed},
    config::{CompletionBackend, Config, StoreBackend},
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        dialogue_page, end_dialogue_handler, get_dialogue_handler, landing_page,
        list_topics_handler, require_auth,
        rest::ApiDoc,
        start_dialogue_handler,
        state::AppState,
        topics_page, ws_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use socratic_core::{
    Backend, CompletionService, DatabaseService, MemoryBackend, RealtimeService,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Store & Change Feed ---
    let (db, realtime): (Arc<dyn DatabaseService>, Arc<dyn RealtimeService>) =
        match config.store_backend {
            StoreBackend::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
                info!("Connecting to database...");
                let db_pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await?;
                let db_adapter = DbAdapter::new(db_pool);
                info!("Running database migrations...");
                db_adapter.run_migrations().await?;
                info!("Database migrations complete.");
                if config.seed_topics {
                    warn!("SEED_TOPICS is ignored for Postgres; the migrations seed the catalog.");
                }
                // The feed keeps its own connection so subscriptions never hold pool slots.
                let feed =
                    Arc::new(PgMessageFeed::connect(db_adapter.clone(), database_url).await?);
                (Arc::new(db_adapter), feed)
            }
            StoreBackend::Memory => {
                warn!("Using the in-process store; nothing survives a restart.");
                let memory = Arc::new(if config.seed_topics {
                    MemoryBackend::with_topics(MemoryBackend::sample_topics())
                } else {
                    MemoryBackend::new()
                });
                (memory.clone(), memory)
            }
        };

    // --- 3. Completion ---
    let completion: Arc<dyn CompletionService> = match config.completion_backend {
        CompletionBackend::Function => {
            let url = config.completion_function_url.clone().ok_or_else(|| {
                ApiError::Internal("COMPLETION_FUNCTION_URL is required".to_string())
            })?;
            info!("Replies come from the completion function at {}.", url);
            Arc::new(FunctionCompletionAdapter::new(
                reqwest::Client::new(),
                url,
                config.completion_function_key.clone(),
            ))
        }
        CompletionBackend::OpenAi => {
            let openai_config = OpenAIConfig::new().with_api_key(
                config
                    .openai_api_key
                    .as_ref()
                    .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
            );
            info!("Replies come from OpenAI model {}.", config.completion_model);
            Arc::new(OpenAiSocraticAdapter::new(
                Client::with_config(openai_config),
                config.completion_model.clone(),
            ))
        }
    };

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        Backend::new(db, realtime, completion),
        config.clone(),
    ));

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/", get(landing_page))
        .route("/topics", get(topics_page))
        .route("/dialogue/{id}", get(dialogue_page))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/api/topics", get(list_topics_handler))
        // Anonymous callers get a 401 with a notice from the handler itself.
        .route("/api/dialogues", post(start_dialogue_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/api/dialogues/{id}", get(get_dialogue_handler))
        .route("/api/dialogues/{id}/end", post(end_dialogue_handler))
        .route("/api/dialogues/{id}/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
