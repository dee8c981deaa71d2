//! PikaQuick ordering backend.
//!
//! Food ordering with M-Pesa STK push checkout. Customers browse the menu,
//! build a cart, and pay from their phone; the money side is asynchronous
//! end to end.
//!
//!
//!
//! # Payment lifecycle
//!
//! - Client POSTs `/payments/initiate` with a phone number
//! - We validate the active cart, fetch a Daraja token, and submit the push
//! - On gateway accept we persist a `pending` record carrying the cart id and
//!   the checkout request id, and hand the record id back for polling
//! - Safaricom prompts the customer on their handset
//! - The provider POSTs `/payments/callback` with the result; we finalize the
//!   record, close the cart on success, and ack so it stops retrying
//! - The client polls `/payments/{id}/status` until `should_refresh` flips
//!
//! The callback can arrive before the initiating request returns, can be
//! redelivered, or can never arrive at all. Reconciliation works purely off
//! the persisted record and the checkout request id, so ordering between the
//! three drivers does not matter.
//!
//!
//!
//! # Notes
//!
//! - Carts are closed, never deleted; a closed cart is the order record
//! - The webhook acks success even for unknown correlation ids, otherwise
//!   the provider retries indefinitely
//! - A push with no callback leaves its record `pending`; expiring those is
//!   an operational policy this service does not set

use std::{sync::Arc, time::Duration};

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, patch, post},
    Router,
};

use signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod payments;
pub mod routes;
pub mod state;
pub mod user;
pub mod utils;

use config::Config;
use routes::{
    add_to_cart, browse_foods, check_payment_status, clear_cart, initiate_payment,
    mpesa_callback, remove_cart_item, update_cart_item, view_cart,
};
use state::State;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new(Config::load());

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = router().layer(cors).with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

pub fn router() -> Router<Arc<State>> {
    Router::new()
        .route("/foods", get(browse_foods))
        .route("/cart", get(view_cart))
        .route("/cart/add/{food_id}", post(add_to_cart))
        .route(
            "/cart/items/{item_id}",
            patch(update_cart_item).delete(remove_cart_item),
        )
        .route("/cart/clear", post(clear_cart))
        .route("/payments/initiate", post(initiate_payment))
        .route("/payments/callback", post(mpesa_callback))
        .route("/payments/{payment_id}/status", get(check_payment_status))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
