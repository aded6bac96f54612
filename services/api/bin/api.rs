//! Main Entrypoint for the LingoCast API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Initializing the text and speech backends and the lesson service.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use lingocast_api::{
    config::{Config, Provider},
    db::PgStore,
    router::create_router,
    state::AppState,
};
use lingocast_core::{
    LessonService,
    audio::AudioAssembler,
    curriculum::FileCurriculumStore,
    llm_client::OpenAICompatibleClient,
    script::{ScriptGenerator, prompt::PromptTemplates},
    service::ServiceSettings,
    speech::OpenAISpeechClient,
};
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1/";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts directory {}", prompts_path.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

/// Client configuration for the selected text provider.
fn text_backend_config(config: &Config) -> anyhow::Result<OpenAIConfig> {
    let (api_key, api_base) = match config.provider {
        Provider::OpenAI => (config.openai_api_key.as_deref(), OPENAI_API_BASE),
        Provider::Gemini => (config.gemini_api_key.as_deref(), GEMINI_API_BASE),
    };
    let api_key = api_key.context("API key for the text provider is not set")?;
    Ok(OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(api_base))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgStore::new(pool));
    store.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize Backends and the Lesson Service ---
    let prompts = load_prompts(&config.prompts_path)?;
    let templates = PromptTemplates::from_map(&prompts)?;
    let timeout = Duration::from_secs(config.generation_timeout_secs);

    info!(provider = ?config.provider, "Using text provider.");
    let text_backend = Arc::new(OpenAICompatibleClient::new(
        text_backend_config(&config)?,
        config.chat_model.clone(),
        timeout,
    ));

    let speech_key = config
        .openai_api_key
        .as_deref()
        .context("OPENAI_API_KEY is required for speech synthesis")?;
    let speech_backend = Arc::new(OpenAISpeechClient::new(
        OpenAIConfig::new()
            .with_api_key(speech_key)
            .with_api_base(OPENAI_API_BASE),
        config.tts_model.clone(),
        timeout,
    ));

    let service = LessonService::new(
        Arc::new(FileCurriculumStore::new(&config.curriculum_path)),
        ScriptGenerator::new(text_backend, templates),
        AudioAssembler::new(speech_backend, config.synthesis_concurrency),
        store,
        ServiceSettings {
            max_custom_text_length: config.max_custom_text_length,
            ..ServiceSettings::default()
        },
    );

    let app_state = Arc::new(AppState { service });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        tts_model = %config.tts_model,
        curriculum = %config.curriculum_path.display(),
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
