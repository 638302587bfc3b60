use anyhow::{Context, Result};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::graphql::{self, RolloutSchema};
use crate::api::rest::{self, AppState};
use crate::cluster::kubectl::KubectlCluster;
use crate::config::Config;
use crate::domain::state::StateHolder;
use crate::domain::state_store::StateStore;
use crate::domain::update_manager::{Settings, UpdateManager};
use crate::exec::ShellExecutor;
use crate::releases::HttpReleaseChannel;

pub async fn run(config: Config) -> Result<()> {
    // Init tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.daemon.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Rollout daemon starting");

    // Load persisted state (an interrupted rollout comes back as Error)
    let store = StateStore::new(config.daemon.state_file.clone());
    let state = Arc::new(StateHolder::load(store, config.rollout.log_capacity).await);
    info!(
        path = %config.daemon.state_file.display(),
        status = ?state.snapshot().await.status,
        "update state loaded"
    );

    let updates = UpdateManager::new(
        state,
        Arc::new(KubectlCluster::new(&config.cluster)),
        Arc::new(ShellExecutor::new(&config.ssh)),
        Arc::new(HttpReleaseChannel::new(&config.runtime)?),
        Settings {
            rollout: config.rollout.clone(),
            runtime: config.runtime.clone(),
        },
    );

    let app_state = AppState {
        updates: updates.clone(),
        started: Instant::now(),
    };

    // Build GraphQL schema
    let schema = graphql::build_schema(updates);

    // Build GraphQL sub-router with its own state
    let graphql_router = Router::new()
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .with_state(schema);

    // Build Axum router: REST (with AppState) + GraphQL (with schema state)
    let app = rest::router(app_state)
        .merge(graphql_router)
        .layer(TraceLayer::new_for_http());

    // Bind HTTP listener
    let http_addr = &config.daemon.http_addr;
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding to {}", http_addr))?;

    info!(addr = %http_addr, "HTTP server listening");

    // Run HTTP server with graceful shutdown. A rollout still in flight is
    // abandoned and reclassified as failed on the next start.
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Rollout daemon stopped");
    Ok(())
}

async fn graphql_playground() -> Html<String> {
    Html(
        async_graphql::http::playground_source(
            async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
        ),
    )
}

async fn graphql_handler(
    State(schema): State<RolloutSchema>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down"); },
        _ = terminate => { info!("Received SIGTERM, shutting down"); },
    }
}
