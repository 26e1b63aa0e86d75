//! Trivia Back binary entrypoint wiring REST, SSE and the question generator.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trivia_back::{
    config::AppConfig,
    questions::{GenerationPrompt, QuestionGenerator, QuestionSupply},
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let generator = build_generator()?;
    let supply = QuestionSupply::new(
        generator,
        GenerationPrompt::batch(config.system_prompt()),
        config.cache_ttl(),
    );

    let app_state = AppState::new(Arc::new(supply), config);
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3001);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

#[cfg(feature = "http-generator")]
fn build_generator() -> anyhow::Result<Arc<dyn QuestionGenerator>> {
    use trivia_back::questions::chat_completions::{ChatCompletionsGenerator, ChatGeneratorConfig};

    let config = ChatGeneratorConfig::from_env().context("reading generator configuration")?;
    info!(model = %config.model, base_url = %config.base_url, "question generator configured");
    let generator = ChatCompletionsGenerator::new(config).context("building generator client")?;
    Ok(Arc::new(generator))
}

#[cfg(not(feature = "http-generator"))]
fn build_generator() -> anyhow::Result<Arc<dyn QuestionGenerator>> {
    anyhow::bail!("built without a question generator; enable the `http-generator` feature")
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
