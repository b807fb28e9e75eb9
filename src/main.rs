//! Quiz Duel Back binary entrypoint wiring REST, WebSocket rooms, the session store, the question
//! bank and the AI provider.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_duel_back::{
    config::AppConfig,
    dao::{
        question_bank::{MemoryQuestionBank, QuestionBank},
        session_store::{MemorySessionStore, SessionStore},
        storage::StorageError,
    },
    routes,
    services::ai_provider::HttpChatProvider,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let chat = HttpChatProvider::new(&config.ai, env::var("AI_API_KEY").ok())
        .context("building AI provider client")?;
    if env::var_os("AI_API_KEY").is_none() {
        warn!("AI_API_KEY is not set; AI requests are sent without credentials");
    }

    let app_state = AppState::new(config, Arc::new(chat));

    start_session_store(&app_state).await;
    start_question_bank(&app_state).await;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

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

/// Supervise CouchDB when it is configured, otherwise keep matches in memory.
async fn start_session_store(state: &SharedState) {
    #[cfg(feature = "couch-store")]
    if let Some(config) = quiz_duel_back::dao::session_store::couchdb::CouchConfig::from_env() {
        use quiz_duel_back::{
            dao::session_store::couchdb::CouchSessionStore, services::storage_supervisor,
        };

        info!(base_url = %config.base_url, database = %config.database, "using CouchDB session store");
        tokio::spawn(storage_supervisor::run(
            state.clone(),
            "couchdb",
            AppState::session_store_slot,
            move || {
                let config = config.clone();
                async move {
                    let store = CouchSessionStore::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn SessionStore>)
                }
            },
        ));
        return;
    }

    warn!("no session store configured; matches are kept in memory");
    state
        .install_session_store(Arc::new(MemorySessionStore::new()))
        .await;
}

/// Supervise MongoDB when `MONGO_URI` is set, otherwise keep the bank in memory.
async fn start_question_bank(state: &SharedState) {
    #[cfg(feature = "mongo-store")]
    if let Ok(uri) = env::var("MONGO_URI") {
        use quiz_duel_back::{
            dao::question_bank::mongodb::{MongoConfig, MongoQuestionBank},
            services::storage_supervisor,
        };

        let db_name = env::var("MONGO_DB").ok();
        info!("using MongoDB question bank");
        tokio::spawn(storage_supervisor::run(
            state.clone(),
            "mongodb",
            AppState::question_bank_slot,
            move || {
                let uri = uri.clone();
                let db_name = db_name.clone();
                async move {
                    let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
                    let bank = MongoQuestionBank::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(bank) as Arc<dyn QuestionBank>)
                }
            },
        ));
        return;
    }

    warn!("no question bank configured; questions and contests are kept in memory");
    state
        .install_question_bank(Arc::new(MemoryQuestionBank::new()))
        .await;
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
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
