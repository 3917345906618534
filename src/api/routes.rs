//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_handler))
        // Raffle catalog
        .route("/raffles", post(create_raffle_handler))
        .route("/raffles/:raffle_id/status", post(set_raffle_status_handler))
        .route(
            "/raffles/:raffle_id/numbers/available",
            get(available_numbers_handler),
        )
        // Purchases
        .route("/purchases", post(create_purchase_handler))
        .route("/purchases/:purchase_id", get(get_purchase_handler))
        .route("/purchases/:purchase_id/cancel", post(cancel_purchase_handler))
        .route("/purchases/:purchase_id/fulfill", post(fulfill_purchase_handler))
        // Payment provider webhook
        .route("/payments/confirm", post(confirm_payment_handler))
        // Scratch cards
        .route("/users/:user_id/scratchcards", get(user_cards_handler))
        .route("/scratchcards/:card_id/reveal", post(reveal_card_handler))
        .route("/scratchcards/:card_id/claim", post(claim_card_handler))
        // Attach shared state
        .with_state(state)
}
