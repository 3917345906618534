//! Purchase ledger: intent records and the paid-state transition.
//!
//! The ledger owns purchase state. Creation is de-duplicated on the
//! idempotency key, and `paid_at` is set exactly once, on the transition
//! into paid; duplicate payment confirmations are no-ops.

use crate::{
    errors::{FulfillmentError, RifaResult},
    model::{NewPurchase, Purchase, PurchaseStatus, RaffleStatus},
    storage::Storage,
    store,
};
use chrono::Utc;
use uuid::Uuid;

/// Record purchase intent.
///
/// Validates quantity, snapshots the raffle's unit price, and
/// de-duplicates on the idempotency key: a replayed request returns the
/// purchase created the first time. Concurrent callers with the same key
/// must serialize; `FulfillmentEngine::create_purchase` holds a per-key
/// lock around this.
pub fn create_purchase(storage: &Storage, req: &NewPurchase) -> RifaResult<Purchase> {
    if req.quantity == 0 {
        return Err(FulfillmentError::InvalidQuantity(0).into());
    }

    let raffle = store::load_raffle(storage, req.raffle_id)?
        .ok_or(FulfillmentError::RaffleNotFound(req.raffle_id))?;
    if raffle.status != RaffleStatus::Selling {
        return Err(FulfillmentError::RaffleNotSelling {
            raffle_id: raffle.id,
            status: raffle.status,
        }
        .into());
    }

    let idempotency_key = req.idempotency_key.unwrap_or_else(Uuid::new_v4);
    if let Some(existing) = store::load_purchase_by_idempotency_key(storage, idempotency_key)? {
        tracing::debug!(
            purchase_id = %existing.id,
            %idempotency_key,
            "Purchase creation replayed, returning existing record"
        );
        return Ok(existing);
    }

    let total_price_cents = raffle
        .price_per_number_cents
        .checked_mul(req.quantity as u64)
        .ok_or(FulfillmentError::InvalidQuantity(req.quantity))?;

    let purchase = Purchase {
        id: Uuid::new_v4(),
        idempotency_key,
        user_id: req.user_id.clone(),
        raffle_id: req.raffle_id,
        quantity: req.quantity,
        unit_price_cents: raffle.price_per_number_cents,
        total_price_cents,
        status: PurchaseStatus::Pending,
        payment_provider: String::new(),
        payment_ref: String::new(),
        created_at: Utc::now(),
        paid_at: None,
        chosen_numbers: Vec::new(),
        scratch_card_ids: Vec::new(),
    };

    store::store_new_purchase(storage, &purchase)?;
    tracing::info!(
        purchase_id = %purchase.id,
        raffle_id = purchase.raffle_id,
        quantity = purchase.quantity,
        total_cents = purchase.total_price_cents,
        "Purchase created"
    );

    Ok(purchase)
}

/// Transition a purchase into paid.
///
/// Sets `paid_at` exactly once. Re-delivery of the payment event for an
/// already-paid (or already-fulfilled) purchase is a no-op returning the
/// current record, so at-least-once webhooks are safe.
///
/// This is a load-modify-store; concurrent callers for the same purchase
/// must serialize, otherwise a stale write can clobber a later status.
/// `FulfillmentEngine::confirm_payment` holds its per-purchase lock
/// across this transition and the fulfillment that follows.
pub fn mark_paid(
    storage: &Storage,
    purchase_id: Uuid,
    provider: &str,
    payment_ref: &str,
) -> RifaResult<Purchase> {
    let mut purchase = store::load_purchase(storage, purchase_id)?
        .ok_or(FulfillmentError::PurchaseNotFound(purchase_id))?;

    match purchase.status {
        PurchaseStatus::Pending => {
            purchase.status = PurchaseStatus::Paid;
            purchase.paid_at = Some(Utc::now());
            purchase.payment_provider = provider.to_string();
            purchase.payment_ref = payment_ref.to_string();
            store::store_purchase(storage, &purchase)?;
            tracing::info!(
                %purchase_id,
                provider,
                payment_ref,
                "Purchase marked paid"
            );
            Ok(purchase)
        }
        PurchaseStatus::Paid
        | PurchaseStatus::Fulfilled
        | PurchaseStatus::FulfillmentFailed => {
            tracing::debug!(%purchase_id, "Duplicate payment confirmation ignored");
            Ok(purchase)
        }
        PurchaseStatus::Canceled => Err(FulfillmentError::InvalidPurchaseState {
            purchase_id,
            status: purchase.status,
            action: "be paid",
        }
        .into()),
    }
}

/// Cancel a purchase that never reached paid.
pub fn cancel_purchase(storage: &Storage, purchase_id: Uuid) -> RifaResult<Purchase> {
    let mut purchase = store::load_purchase(storage, purchase_id)?
        .ok_or(FulfillmentError::PurchaseNotFound(purchase_id))?;

    if purchase.status != PurchaseStatus::Pending {
        return Err(FulfillmentError::InvalidPurchaseState {
            purchase_id,
            status: purchase.status,
            action: "be canceled",
        }
        .into());
    }

    purchase.status = PurchaseStatus::Canceled;
    store::store_purchase(storage, &purchase)?;
    tracing::info!(%purchase_id, "Purchase canceled");
    Ok(purchase)
}
