#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
pub mod aggregator;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod media;
pub mod store;
pub mod structs;

use std::sync::Arc;

use anyhow::Context;
use axum::{extract::DefaultBodyLimit, Router};
use tokio::signal;
use tower_http::{
    classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::PgPermissionGate;
use config::Config;
use database::AppState;
use store::PgMediaStore;

fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_url.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            traces_sample_rate: 0.2,
            max_breadcrumbs: 50,
            send_default_pii: false,
            before_send: Some(Arc::new(|mut event| {
                if let Some(user) = &mut event.user {
                    user.ip_address = None;
                    user.email = None;
                    user.username = None;
                    if let Some(id) = &user.id {
                        if !id.starts_with("hash_") {
                            user.id = None;
                        }
                    }
                }
                Some(event)
            })),
            ..Default::default()
        },
    )))
}

fn init_tracing() {
    let env_filter = if cfg!(debug_assertions) {
        // Debug build
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "{}=debug,tower_http=debug,axum=trace",
                env!("CARGO_CRATE_NAME")
            )
            .into()
        })
    } else {
        // Release build
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "{}=info,tower_http=info,axum=info",
                env!("CARGO_CRATE_NAME")
            )
            .into()
        })
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn app(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        .merge(media::routes())
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(
            TraceLayer::new_for_http().on_failure(
                |error: ServerErrorsFailureClass, latency: std::time::Duration, _span: &tracing::Span| {
                    match &error {
                        ServerErrorsFailureClass::StatusCode(code) => {
                            // Handled failures also answer 500; MediaError reports those itself.
                            tracing::debug!(status = %code, latency_ms = %latency.as_millis(), "request failed");
                        }
                        ServerErrorsFailureClass::Error(msg) => {
                            tracing::warn!(
                                error = %msg,
                                latency_ms = %latency.as_millis(),
                                "Connection/protocol issue"
                            );
                        }
                    }
                },
            ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be populated.
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("invalid configuration")?;
    let _guard = init_sentry(&config);
    init_tracing();

    if config.media_path.is_none() {
        tracing::warn!("MEDIA_PATH is not set; uploads will be refused");
    }

    let pool = Arc::new(
        database::establish_pool_connection(&config)
            .await
            .context("failed to establish database connection pool")?,
    );

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        store: Arc::new(PgMediaStore::new(pool.clone())),
        permissions: Arc::new(PgPermissionGate::new(pool)),
        config,
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
