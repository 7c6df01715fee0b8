//! Payment Gateway Callback Service
//!
//! HTTP service that sells access through a hosted payment gateway: a chat
//! dispatcher initiates payments over a small authenticated API, the buyer
//! pays on the gateway's checkout page, and the gateway reports progress
//! through signed prepare/complete callbacks. This crate owns the order
//! records, drives each one through its state machine, and flips the
//! buyer's access flag when the money lands.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx behind narrow store traits
//! - **Callback trust**: per-request HMAC-SHA256 signatures
//! - **Internal API trust**: configured key with SHA-256 digest compare
//! - **Format**: JSON requests/responses
//!
//! # Callback guarantees
//!
//! Callbacks may arrive out of order, duplicated, or forged. The engine
//! answers every delivery with a numeric gateway code, replays settled
//! outcomes byte-identically, and never moves a payment out of a terminal
//! status.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::services::access_service::{AccessGrantNotifier, TelegramNotifier};
use crate::services::gateway_service::GatewayService;
use crate::services::payment_service::PaymentService;
use crate::services::signature::SignatureValidator;
use crate::store::{PaymentStore, UserStore};

/// Shared application state handed to every handler.
///
/// Built once at startup over the Postgres stores; tests build it over the
/// in-memory stores instead.
#[derive(Clone)]
pub struct AppState {
    /// Callback protocol engine
    pub gateway: Arc<GatewayService>,
    /// Payment initiation and status lookup
    pub payments: Arc<PaymentService>,
    /// Kept directly for the health check's `ping`
    pub payment_store: Arc<dyn PaymentStore>,
    /// Hex SHA-256 digest of the internal API key
    pub api_key_hash: String,
}

impl AppState {
    /// Wire up services over the given stores.
    ///
    /// Spawns the access grant retry worker, so this must run inside a
    /// tokio runtime.
    pub fn new(
        payment_store: Arc<dyn PaymentStore>,
        user_store: Arc<dyn UserStore>,
        validator: SignatureValidator,
        checkout_base: Url,
        api_key: &str,
        telegram: Option<TelegramNotifier>,
    ) -> Self {
        let service_id = validator.service_id();
        let notifier = Arc::new(AccessGrantNotifier::new(Arc::clone(&user_store), telegram));
        let gateway = Arc::new(GatewayService::new(
            Arc::clone(&payment_store),
            validator,
            notifier,
        ));
        let payments = Arc::new(PaymentService::new(
            Arc::clone(&payment_store),
            user_store,
            checkout_base,
            service_id,
        ));

        Self {
            gateway,
            payments,
            payment_store,
            api_key_hash: middleware::auth::digest(api_key),
        }
    }
}

/// Build the application router.
///
/// # Routes
///
/// - `GET /health` - public
/// - `POST /webhook/gateway` and `POST /api/gateway` - gateway callbacks,
///   authenticated by the callback signature itself
/// - `POST /api/v1/payments`, `GET /api/v1/payments/{id}` - internal API
///   behind bearer-key auth
pub fn router(state: AppState) -> Router {
    // Internal routes for the chat dispatcher
    let authenticated_routes = Router::new()
        .route("/api/v1/payments", post(handlers::payments::create_payment))
        .route(
            "/api/v1/payments/{id}",
            get(handlers::payments::get_payment),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        // Public routes (no bearer auth)
        .route("/health", get(handlers::health::health_check))
        .route(
            "/webhook/gateway",
            post(handlers::gateway::gateway_callback),
        )
        .route("/api/gateway", post(handlers::gateway::gateway_callback))
        // Merge authenticated routes
        .merge(authenticated_routes)
        // Request tracing for observability
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
