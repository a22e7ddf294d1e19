use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yorival::api::{self, AppState};
use yorival::backend::{SupabaseAuth, SupabaseConfig, SupabaseProfiles};
use yorival::llm::LlmConfig;
use yorival::session::{AuthController, ControllerConfig};
use yorival::smack::SmackGenerator;

/// Build and start the session controller against the hosted backend, if configured.
/// Also returns the background token refresh task.
async fn start_controller() -> Option<(Arc<AuthController>, JoinHandle<()>)> {
    let config = SupabaseConfig::from_env()?;

    let auth = match SupabaseAuth::new(config.clone()) {
        Ok(auth) => Arc::new(auth),
        Err(e) => {
            tracing::warn!("Failed to create auth client: {}", e);
            return None;
        }
    };
    let profiles = match SupabaseProfiles::new(config) {
        Ok(profiles) => profiles.with_auth(auth.clone()),
        Err(e) => {
            tracing::warn!("Failed to create profile client: {}", e);
            return None;
        }
    };

    let refresher = auth.start_auto_refresh();
    let controller = Arc::new(AuthController::new(
        auth,
        Arc::new(profiles),
        ControllerConfig::from_env(),
    ));
    if let Err(e) = controller.start().await {
        tracing::warn!("Auth controller did not start: {}", e);
        refresher.abort();
        return None;
    }

    // Log every published snapshot
    let mut updates = controller.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            tracing::debug!("Auth snapshot: {:?}", snapshot);
        }
    });

    Some((controller, refresher))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yorival=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting YoRival...");

    let llm_config = LlmConfig::from_env();
    let provider = match llm_config.build_provider() {
        Ok(provider) => {
            tracing::info!("LLM provider {} initialized", provider.name());
            Some(provider)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize LLM provider: {}. Zingers will use fallback lines.",
                e
            );
            None
        }
    };

    let controller = start_controller().await;
    if controller.is_none() {
        tracing::info!("Hosted backend not configured, session controller disabled");
    }

    let state = Arc::new(AppState::new(SmackGenerator::new(provider, llm_config)));
    let app = api::router(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(8787);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    if let Some((controller, refresher)) = controller {
        refresher.abort();
        controller.shutdown().await;
    }
}
