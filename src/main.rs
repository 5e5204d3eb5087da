//! Drift Back binary entrypoint wiring the session host, WebSocket fan-out,
//! and collaborator engines.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drift_back::{
    config::AppConfig,
    engine::{
        Paraphraser, SpeechToText, paraphrase::AnthropicParaphraser, transcribe::HttpTranscriber,
    },
    routes, services,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::load());

    let api_key = env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        warn!("ANTHROPIC_API_KEY is not set; lines will be delivered unaltered");
    }

    let transcriber: Arc<dyn SpeechToText> = Arc::new(
        HttpTranscriber::new(config.collaborators.transcriber_url.clone())
            .context("building transcriber client")?,
    );
    let paraphraser: Arc<dyn Paraphraser> = Arc::new(
        AnthropicParaphraser::new(api_key, &config.collaborators)
            .context("building paraphraser client")?,
    );

    let (state, events) = AppState::new(config, transcriber, paraphraser);
    services::fanout::spawn_event_fanout(state.clone(), events);

    let app = build_router(state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8888);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
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

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
