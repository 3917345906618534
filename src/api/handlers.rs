//! Request handlers for the fulfillment API.

use super::{errors::ApiError, middleware::RequestId};
use crate::{
    fulfillment::FulfillmentEngine,
    ledger,
    model::{
        FulfillmentReceipt, NewPurchase, NewRaffle, PaymentConfirmation, Purchase, Raffle,
        RaffleStatus, ScratchCard,
    },
    store,
};
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state
pub struct AppState {
    pub engine: Arc<FulfillmentEngine>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RaffleStatusRequest {
    pub status: RaffleStatus,
}

#[derive(Debug, Serialize)]
pub struct AvailableNumbersResponse {
    pub raffle_id: u64,
    pub available: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CardActionRequest {
    pub user_id: String,
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
    })
}

/// POST /raffles — create a raffle with its full number inventory.
pub async fn create_raffle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewRaffle>,
) -> Result<Json<Raffle>, ApiError> {
    store::create_raffle(state.engine.storage(), &req)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// POST /raffles/:id/status — admin status transition.
pub async fn set_raffle_status_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<u64>,
    Json(req): Json<RaffleStatusRequest>,
) -> Result<Json<Raffle>, ApiError> {
    state
        .engine
        .set_raffle_status(raffle_id, req.status)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// GET /raffles/:id/numbers/available
pub async fn available_numbers_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<u64>,
) -> Result<Json<AvailableNumbersResponse>, ApiError> {
    let storage = state.engine.storage();

    if store::load_raffle(storage, raffle_id)
        .map_err(|e| ApiError::from_engine(request_id.0.clone(), e))?
        .is_none()
    {
        return Err(ApiError::not_found(
            request_id.0,
            format!("Raffle {} not found", raffle_id),
        ));
    }

    let available = store::available_numbers(storage, raffle_id)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(AvailableNumbersResponse { raffle_id, available }))
}

/// POST /purchases — record purchase intent (idempotent on the key).
pub async fn create_purchase_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewPurchase>,
) -> Result<Json<Purchase>, ApiError> {
    state
        .engine
        .create_purchase(&req)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// POST /purchases/:id/cancel — pending purchases only.
pub async fn cancel_purchase_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<Purchase>, ApiError> {
    ledger::cancel_purchase(state.engine.storage(), purchase_id)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// GET /purchases/:id
pub async fn get_purchase_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<Purchase>, ApiError> {
    store::load_purchase(state.engine.storage(), purchase_id)
        .map_err(|e| ApiError::from_engine(request_id.0.clone(), e))?
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(request_id.0, format!("Purchase {} not found", purchase_id))
        })
}

/// POST /payments/confirm — at-least-once payment webhook.
pub async fn confirm_payment_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(event): Json<PaymentConfirmation>,
) -> Result<Json<FulfillmentReceipt>, ApiError> {
    state
        .engine
        .confirm_payment(&event)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// POST /purchases/:id/fulfill — operator retry of a failed fulfillment.
pub async fn fulfill_purchase_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<FulfillmentReceipt>, ApiError> {
    state
        .engine
        .fulfill_purchase(purchase_id)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// GET /users/:user_id/scratchcards
pub async fn user_cards_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ScratchCard>>, ApiError> {
    store::load_user_cards(state.engine.storage(), &user_id)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// POST /scratchcards/:id/reveal
pub async fn reveal_card_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(card_id): Path<Uuid>,
    Json(req): Json<CardActionRequest>,
) -> Result<Json<ScratchCard>, ApiError> {
    state
        .engine
        .reveal_card(card_id, &req.user_id)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// POST /scratchcards/:id/claim
pub async fn claim_card_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(card_id): Path<Uuid>,
    Json(req): Json<CardActionRequest>,
) -> Result<Json<ScratchCard>, ApiError> {
    state
        .engine
        .claim_card_prize(card_id, &req.user_id)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}
