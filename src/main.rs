//! Service entry point.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Wire Postgres stores into the services
//! 4. Build the HTTP router with routes and middleware
//! 5. Serve on the configured port until ctrl-c

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use url::Url;

use paygate::services::access_service::TelegramNotifier;
use paygate::services::signature::SignatureValidator;
use paygate::store::postgres::{PgPaymentStore, PgUserStore};
use paygate::store::{PaymentStore, UserStore};
use paygate::{AppState, config, db, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let checkout_base = Url::parse(&config.gateway_checkout_url)?;

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let payment_store: Arc<dyn PaymentStore> = Arc::new(PgPaymentStore::new(pool.clone()));
    let user_store: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool));

    // Without a token the grant still lands, the buyer just gets no message
    let telegram = match config.telegram_bot_token.as_deref() {
        Some(token) => Some(TelegramNotifier::new(&config.telegram_api_base, token)?),
        None => {
            tracing::info!("TELEGRAM_BOT_TOKEN not set, paid notifications disabled");
            None
        }
    };

    let state = AppState::new(
        payment_store,
        user_store,
        SignatureValidator::new(
            config.gateway_secret_key.as_str(),
            config.gateway_service_id,
        ),
        checkout_base,
        &config.api_key,
        telegram,
    );
    let app = router(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // In-flight callbacks finish before the process exits; anything the
    // gateway could not deliver it will retry against the next process
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves when the process should stop accepting connections.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install the shutdown handler");
        // keep serving rather than shutting down on the spot
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
