//! Fulfillment orchestrator.
//!
//! Reacts to a purchase's transition into paid: claims numbers from the
//! pool, draws one scratch card per unit, and persists everything as one
//! atomic storage batch. Re-delivery of the paid event is a no-op that
//! returns the original receipt.
//!
//! Failure discipline is full rollback: nothing is persisted until the
//! single batch write, and the claim guard releases the pinned numbers
//! when the batch never happens, so a retry re-runs the whole step from
//! scratch. Partial fulfillment cannot be observed.
//!
//! All purchase-record writes on the payment/fulfillment path happen
//! under a per-purchase lock, including the paid transition itself: a
//! duplicate webhook delivery serializes behind the first one and lands
//! on the idempotent path instead of racing the record.

use crate::{
    config::ScratchCardSettings,
    errors::{FulfillmentError, RifaError, RifaResult},
    ledger,
    model::{
        FulfillmentReceipt, NewPurchase, PaymentConfirmation, Purchase, PurchaseStatus, Raffle,
        RaffleStatus, ScratchCard, ScratchCardStatus,
    },
    pool::NumberPool,
    prize::PrizeTable,
    storage::Storage,
    store,
};
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub struct FulfillmentEngine {
    storage: Storage,
    pool: NumberPool,
    prize_table: PrizeTable,
    code_length: usize,
    /// Serializes payment confirmation and fulfillment for one purchase.
    purchase_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    /// Serializes purchase creation per idempotency key.
    creation_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl FulfillmentEngine {
    pub fn new(storage: Storage, settings: &ScratchCardSettings) -> Self {
        let prize_table = PrizeTable::from_entries(&settings.prize_table);
        if prize_table.is_empty() {
            tracing::warn!(
                "Scratch-card prize table has no valid entries; all cards will draw zero"
            );
        }

        Self {
            pool: NumberPool::new(storage.clone()),
            storage,
            prize_table,
            code_length: settings.code_length,
            purchase_locks: DashMap::new(),
            creation_locks: DashMap::new(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Record purchase intent, serialized per idempotency key.
    ///
    /// Two concurrent requests carrying the same key cannot both miss the
    /// index: the second one waits and gets the replay path.
    pub fn create_purchase(&self, req: &NewPurchase) -> RifaResult<Purchase> {
        let mut req = req.clone();
        let key = *req.idempotency_key.get_or_insert_with(Uuid::new_v4);

        let lock = lock_entry(&self.creation_locks, key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            ledger::create_purchase(&self.storage, &req)
        };
        drop_lock_entry(&self.creation_locks, key, &lock);
        result
    }

    /// Admin raffle status transition, serialized against claim commits.
    pub fn set_raffle_status(&self, raffle_id: u64, status: RaffleStatus) -> RifaResult<Raffle> {
        self.pool.set_raffle_status(raffle_id, status)
    }

    /// Entry point for the external payment-confirmation event.
    ///
    /// At-least-once delivery: the paid transition and the fulfillment
    /// run under the same per-purchase lock, so a duplicate delivery
    /// cannot interleave a stale purchase write with the first one's
    /// commit; it serializes behind it and replays the stored receipt.
    pub fn confirm_payment(&self, event: &PaymentConfirmation) -> RifaResult<FulfillmentReceipt> {
        let lock = lock_entry(&self.purchase_locks, event.purchase_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            ledger::mark_paid(
                &self.storage,
                event.purchase_id,
                &event.provider,
                &event.payment_ref,
            )
            .and_then(|_| self.fulfill_locked(event.purchase_id))
        };
        drop_lock_entry(&self.purchase_locks, event.purchase_id, &lock);
        result
    }

    /// Fulfill a paid purchase: claim numbers, draw scratch cards, commit.
    ///
    /// Idempotent: an already-fulfilled purchase returns its stored
    /// receipt with `newly_fulfilled` false and no further mutation.
    pub fn fulfill_purchase(&self, purchase_id: Uuid) -> RifaResult<FulfillmentReceipt> {
        let lock = lock_entry(&self.purchase_locks, purchase_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.fulfill_locked(purchase_id)
        };
        drop_lock_entry(&self.purchase_locks, purchase_id, &lock);
        result
    }

    /// Fulfillment body; caller holds the purchase lock.
    fn fulfill_locked(&self, purchase_id: Uuid) -> RifaResult<FulfillmentReceipt> {
        let purchase = store::load_purchase(&self.storage, purchase_id)?
            .ok_or(FulfillmentError::PurchaseNotFound(purchase_id))?;

        match purchase.status {
            PurchaseStatus::Fulfilled => {
                tracing::debug!(%purchase_id, "Fulfillment replayed, returning stored receipt");
                return Ok(FulfillmentReceipt {
                    purchase_id: purchase.id,
                    raffle_id: purchase.raffle_id,
                    claimed_numbers: purchase.chosen_numbers,
                    scratch_card_ids: purchase.scratch_card_ids,
                    newly_fulfilled: false,
                });
            }
            PurchaseStatus::Paid | PurchaseStatus::FulfillmentFailed => {}
            PurchaseStatus::Pending | PurchaseStatus::Canceled => {
                return Err(FulfillmentError::InvalidPurchaseState {
                    purchase_id,
                    status: purchase.status,
                    action: "be fulfilled",
                }
                .into());
            }
        }

        match self.run_fulfillment(&purchase) {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                self.mark_fulfillment_failed(&purchase, &err);
                Err(err)
            }
        }
    }

    /// One logical unit of work, committed as one batch.
    fn run_fulfillment(&self, purchase: &Purchase) -> RifaResult<FulfillmentReceipt> {
        let claim = self.pool.claim(
            purchase.raffle_id,
            purchase.quantity,
            purchase.id,
            &purchase.user_id,
        )?;
        let claimed_numbers = claim.number_values();

        let mut rng = rand::thread_rng();
        let mut cards = Vec::with_capacity(purchase.quantity as usize);
        for _ in 0..purchase.quantity {
            let prize_cents = self.prize_table.draw(&mut rng);
            let code = generate_card_code(&mut rng, self.code_length);
            cards.push(ScratchCard::issue(purchase, code, prize_cents));
        }

        let mut fulfilled = purchase.clone();
        fulfilled.status = PurchaseStatus::Fulfilled;
        fulfilled.chosen_numbers = claimed_numbers.clone();
        fulfilled.scratch_card_ids = cards.iter().map(|c| c.id).collect();

        let mut items = Vec::with_capacity(1 + cards.len() * 2);
        items.push(store::purchase_item(&fulfilled)?);
        for card in &cards {
            items.push(store::card_item(card)?);
            items.push(store::user_card_index_item(card));
        }

        // The single point of persistence: numbers, cards and the
        // purchase update land together or not at all.
        self.pool.commit_claim(claim, items)?;

        tracing::info!(
            purchase_id = %purchase.id,
            raffle_id = purchase.raffle_id,
            numbers = ?claimed_numbers,
            cards = cards.len(),
            "Purchase fulfilled"
        );

        Ok(FulfillmentReceipt {
            purchase_id: purchase.id,
            raffle_id: purchase.raffle_id,
            claimed_numbers,
            scratch_card_ids: fulfilled.scratch_card_ids,
            newly_fulfilled: true,
        })
    }

    /// Surface a failed fulfillment for operator retry. The purchase is
    /// still paid; it must never look successfully fulfilled.
    fn mark_fulfillment_failed(&self, purchase: &Purchase, err: &RifaError) {
        tracing::warn!(
            purchase_id = %purchase.id,
            raffle_id = purchase.raffle_id,
            error = %err,
            retryable = err.is_retryable(),
            "Fulfillment failed"
        );

        if purchase.status == PurchaseStatus::FulfillmentFailed {
            return;
        }

        let mut failed = purchase.clone();
        failed.status = PurchaseStatus::FulfillmentFailed;
        if let Err(store_err) = store::store_purchase(&self.storage, &failed) {
            // Best effort: the purchase stays Paid, which is also retryable.
            tracing::warn!(
                purchase_id = %purchase.id,
                error = %store_err,
                "Could not record fulfillment failure"
            );
        }
    }

    /// Reveal a scratch card's outcome to its owner. Repeat reveals are
    /// no-ops returning the card unchanged.
    pub fn reveal_card(&self, card_id: Uuid, user_id: &str) -> RifaResult<ScratchCard> {
        let mut card = store::load_card(&self.storage, card_id)?
            .ok_or(FulfillmentError::CardNotFound(card_id))?;
        if card.user_id != user_id {
            // Not leaking other users' cards
            return Err(FulfillmentError::CardNotFound(card_id).into());
        }

        if card.revealed_at.is_none() {
            card.revealed_at = Some(Utc::now());
            store::store_card(&self.storage, &card)?;
            tracing::debug!(%card_id, status = %card.status, "Scratch card revealed");
        }

        Ok(card)
    }

    /// Claim the prize of a revealed, winning card.
    pub fn claim_card_prize(&self, card_id: Uuid, user_id: &str) -> RifaResult<ScratchCard> {
        let mut card = store::load_card(&self.storage, card_id)?
            .ok_or(FulfillmentError::CardNotFound(card_id))?;
        if card.user_id != user_id {
            return Err(FulfillmentError::CardNotFound(card_id).into());
        }

        if card.status != ScratchCardStatus::Won || card.revealed_at.is_none() {
            return Err(FulfillmentError::InvalidCardState {
                card_id,
                status: card.status,
            }
            .into());
        }

        card.status = ScratchCardStatus::Claimed;
        card.claimed_at = Some(Utc::now());
        store::store_card(&self.storage, &card)?;
        tracing::info!(%card_id, prize_cents = card.prize_cents, "Scratch card prize claimed");

        Ok(card)
    }
}

fn lock_entry(locks: &DashMap<Uuid, Arc<Mutex<()>>>, key: Uuid) -> Arc<Mutex<()>> {
    locks
        .entry(key)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Drop a lock registry entry once no other thread holds a clone (the
/// registry's copy plus the caller's), so the maps do not grow with every
/// purchase ever seen.
fn drop_lock_entry(locks: &DashMap<Uuid, Arc<Mutex<()>>>, key: Uuid, lock: &Arc<Mutex<()>>) {
    let _ = lock;
    locks.remove_if(&key, |_, entry| Arc::strong_count(entry) <= 2);
}

/// Uppercase hex display code for a scratch card.
fn generate_card_code<R: Rng>(rng: &mut R, length: usize) -> String {
    let mut bytes = vec![0u8; (length + 1) / 2];
    rng.fill(bytes.as_mut_slice());
    let mut code = hex::encode(bytes).to_uppercase();
    code.truncate(length);
    code
}
