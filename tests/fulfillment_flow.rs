//! End-to-end fulfillment tests over a real (temporary) database.
//!
//! Exercise the whole pipeline: purchase intent, payment confirmation,
//! number allocation, scratch-card issuance and the reveal/claim
//! lifecycle, including the concurrency and idempotency guarantees.

use rifa::{
    config::{PrizeTableEntry, ScratchCardSettings},
    errors::{FulfillmentError, RifaError},
    fulfillment::FulfillmentEngine,
    model::{
        NewPurchase, NewRaffle, PaymentConfirmation, Purchase, PurchaseStatus, RaffleStatus,
        ScratchCardStatus,
    },
    storage::Storage,
    store,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use uuid::Uuid;

fn engine_with_table(prize_table: Vec<PrizeTableEntry>) -> (TempDir, Arc<FulfillmentEngine>) {
    let dir = TempDir::new().unwrap();
    let storage = Storage::open(dir.path()).unwrap();
    let settings = ScratchCardSettings {
        code_length: 8,
        prize_table,
    };
    (dir, Arc::new(FulfillmentEngine::new(storage, &settings)))
}

fn always_winning() -> Vec<PrizeTableEntry> {
    vec![PrizeTableEntry { prize_cents: 1000, weight: 1 }]
}

fn always_losing() -> Vec<PrizeTableEntry> {
    vec![PrizeTableEntry { prize_cents: 0, weight: 1 }]
}

fn selling_raffle(engine: &FulfillmentEngine, total: u32) -> u64 {
    let raffle = store::create_raffle(
        engine.storage(),
        &NewRaffle {
            title: "Integration raffle".to_string(),
            description: String::new(),
            total_numbers: total,
            price_per_number_cents: 100,
        },
    )
    .unwrap();
    engine
        .set_raffle_status(raffle.id, RaffleStatus::Selling)
        .unwrap();
    raffle.id
}

fn pending_purchase(engine: &FulfillmentEngine, raffle_id: u64, user: &str, qty: u32) -> Purchase {
    engine
        .create_purchase(&NewPurchase {
            idempotency_key: Some(Uuid::new_v4()),
            user_id: user.to_string(),
            raffle_id,
            quantity: qty,
        })
        .unwrap()
}

fn confirmation(purchase_id: Uuid) -> PaymentConfirmation {
    PaymentConfirmation {
        purchase_id,
        provider: "pix".to_string(),
        payment_ref: format!("tx-{}", purchase_id),
    }
}

#[test]
fn paid_purchase_gets_numbers_and_cards() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 3);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 2);

    let receipt = engine.confirm_payment(&confirmation(purchase.id)).unwrap();

    assert!(receipt.newly_fulfilled);
    assert_eq!(receipt.claimed_numbers, vec![1, 2]);
    assert_eq!(receipt.scratch_card_ids.len(), 2);

    let stored = store::load_purchase(engine.storage(), purchase.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PurchaseStatus::Fulfilled);
    assert!(stored.paid_at.is_some());
    assert_eq!(stored.chosen_numbers, vec![1, 2]);

    assert_eq!(
        store::available_numbers(engine.storage(), raffle_id).unwrap(),
        vec![3]
    );

    let cards = store::load_user_cards(engine.storage(), "alice").unwrap();
    assert_eq!(cards.len(), 2);
    assert!(cards.iter().all(|c| c.status == ScratchCardStatus::Won));
    assert!(cards.iter().all(|c| c.purchase_id == purchase.id));
}

#[test]
fn refulfillment_replays_the_original_receipt() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 5);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 2);

    let first = engine.confirm_payment(&confirmation(purchase.id)).unwrap();
    let replay = engine.fulfill_purchase(purchase.id).unwrap();

    assert!(first.newly_fulfilled);
    assert!(!replay.newly_fulfilled);
    assert_eq!(replay.claimed_numbers, first.claimed_numbers);
    assert_eq!(replay.scratch_card_ids, first.scratch_card_ids);

    // No extra numbers were consumed, no extra cards minted.
    assert_eq!(
        store::available_numbers(engine.storage(), raffle_id).unwrap(),
        vec![3, 4, 5]
    );
    assert_eq!(
        store::load_user_cards(engine.storage(), "alice").unwrap().len(),
        2
    );
}

#[test]
fn duplicate_payment_webhook_is_harmless() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 5);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 1);

    let event = confirmation(purchase.id);
    let first = engine.confirm_payment(&event).unwrap();
    let second = engine.confirm_payment(&event).unwrap();

    assert!(first.newly_fulfilled);
    assert!(!second.newly_fulfilled);
    assert_eq!(second.claimed_numbers, first.claimed_numbers);

    let stored = store::load_purchase(engine.storage(), purchase.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_ref, event.payment_ref);
}

#[test]
fn concurrent_webhook_deliveries_fulfill_once() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 10);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 2);

    // The same payment event delivered twice, in parallel. The paid
    // transition and the fulfillment serialize per purchase, so neither
    // delivery can clobber the other's record and re-run the claim.
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let purchase_id = purchase.id;
            thread::spawn(move || engine.confirm_payment(&confirmation(purchase_id)))
        })
        .collect();

    let receipts: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    let fresh = receipts.iter().filter(|r| r.newly_fulfilled).count();
    assert_eq!(fresh, 1);
    assert_eq!(receipts[0].claimed_numbers, receipts[1].claimed_numbers);
    assert_eq!(receipts[0].scratch_card_ids, receipts[1].scratch_card_ids);

    // Exactly one claim's worth of inventory and cards, and the record
    // kept its fulfillment data.
    assert_eq!(
        store::available_numbers(engine.storage(), raffle_id).unwrap(),
        vec![3, 4, 5, 6, 7, 8, 9, 10]
    );
    assert_eq!(
        store::load_user_cards(engine.storage(), "alice").unwrap().len(),
        2
    );
    let stored = store::load_purchase(engine.storage(), purchase.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PurchaseStatus::Fulfilled);
    assert_eq!(stored.chosen_numbers, vec![1, 2]);
}

#[test]
fn concurrent_creations_with_same_key_make_one_purchase() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 10);

    let key = Uuid::new_v4();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine.create_purchase(&NewPurchase {
                    idempotency_key: Some(key),
                    user_id: "alice".to_string(),
                    raffle_id,
                    quantity: 1,
                })
            })
        })
        .collect();

    let purchases: Vec<Purchase> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(purchases[0].id, purchases[1].id);

    let indexed = store::load_purchase_by_idempotency_key(engine.storage(), key)
        .unwrap()
        .unwrap();
    assert_eq!(indexed.id, purchases[0].id);
}

#[test]
fn oversell_rolls_back_completely() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 2);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 3);

    let err = engine.confirm_payment(&confirmation(purchase.id)).unwrap_err();
    assert!(matches!(
        err,
        RifaError::Fulfillment(FulfillmentError::InsufficientInventory {
            requested: 3,
            available: 2,
        })
    ));

    // Nothing was delivered: inventory intact, no cards, failure surfaced.
    assert_eq!(
        store::available_numbers(engine.storage(), raffle_id).unwrap(),
        vec![1, 2]
    );
    assert!(store::load_user_cards(engine.storage(), "alice")
        .unwrap()
        .is_empty());

    let stored = store::load_purchase(engine.storage(), purchase.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PurchaseStatus::FulfillmentFailed);
    assert!(stored.chosen_numbers.is_empty());
}

#[test]
fn failed_fulfillment_can_be_retried() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 3);

    let winner = pending_purchase(&engine, raffle_id, "alice", 2);
    engine.confirm_payment(&confirmation(winner.id)).unwrap();

    let loser = pending_purchase(&engine, raffle_id, "bob", 2);
    assert!(engine.confirm_payment(&confirmation(loser.id)).is_err());

    // The retry runs the whole step again; with still only one number
    // left it fails the same way instead of half-delivering.
    let retry = engine.fulfill_purchase(loser.id).unwrap_err();
    assert!(matches!(
        retry,
        RifaError::Fulfillment(FulfillmentError::InsufficientInventory { .. })
    ));
    assert_eq!(
        store::available_numbers(engine.storage(), raffle_id).unwrap(),
        vec![3]
    );
}

#[test]
fn unpaid_purchase_cannot_be_fulfilled() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 3);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 1);

    let err = engine.fulfill_purchase(purchase.id).unwrap_err();
    assert!(matches!(
        err,
        RifaError::Fulfillment(FulfillmentError::InvalidPurchaseState { .. })
    ));
}

#[test]
fn concurrent_purchases_get_disjoint_numbers() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 20);

    let purchases: Vec<Purchase> = (0..4)
        .map(|i| pending_purchase(&engine, raffle_id, &format!("user-{}", i), 5))
        .collect();

    let handles: Vec<_> = purchases
        .iter()
        .map(|p| {
            let engine = Arc::clone(&engine);
            let purchase_id = p.id;
            thread::spawn(move || engine.confirm_payment(&confirmation(purchase_id)))
        })
        .collect();

    let mut all_numbers = Vec::new();
    for handle in handles {
        let receipt = handle.join().unwrap().unwrap();
        assert_eq!(receipt.claimed_numbers.len(), 5);
        all_numbers.extend(receipt.claimed_numbers);
    }

    // Every number delivered exactly once, the whole raffle sold out.
    let unique: HashSet<u32> = all_numbers.iter().copied().collect();
    assert_eq!(unique.len(), 20);
    assert_eq!(unique, (1..=20).collect::<HashSet<u32>>());
    assert!(store::available_numbers(engine.storage(), raffle_id)
        .unwrap()
        .is_empty());
}

#[test]
fn last_number_goes_to_exactly_one_buyer() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 1);

    let a = pending_purchase(&engine, raffle_id, "alice", 1);
    let b = pending_purchase(&engine, raffle_id, "bob", 1);

    let handles: Vec<_> = [a.id, b.id]
        .into_iter()
        .map(|purchase_id| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.confirm_payment(&confirmation(purchase_id)))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    let sold = store::load_number(engine.storage(), raffle_id, 1)
        .unwrap()
        .unwrap();
    let winning_receipt = results.into_iter().find_map(|r| r.ok()).unwrap();
    assert_eq!(sold.purchase_id, Some(winning_receipt.purchase_id));
}

#[test]
fn winning_card_reveal_and_claim_lifecycle() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 3);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 1);
    let receipt = engine.confirm_payment(&confirmation(purchase.id)).unwrap();
    let card_id = receipt.scratch_card_ids[0];

    // Claiming before reveal is rejected.
    assert!(engine.claim_card_prize(card_id, "alice").is_err());

    let revealed = engine.reveal_card(card_id, "alice").unwrap();
    assert_eq!(revealed.status, ScratchCardStatus::Won);
    assert_eq!(revealed.prize_cents, 1000);
    let revealed_at = revealed.revealed_at.expect("reveal sets timestamp");

    // Repeat reveal keeps the original timestamp.
    let again = engine.reveal_card(card_id, "alice").unwrap();
    assert_eq!(again.revealed_at, Some(revealed_at));

    let claimed = engine.claim_card_prize(card_id, "alice").unwrap();
    assert_eq!(claimed.status, ScratchCardStatus::Claimed);
    assert!(claimed.claimed_at.is_some());

    // A claimed card cannot be claimed twice.
    let err = engine.claim_card_prize(card_id, "alice").unwrap_err();
    assert!(matches!(
        err,
        RifaError::Fulfillment(FulfillmentError::InvalidCardState { .. })
    ));
}

#[test]
fn losing_card_has_no_prize_to_claim() {
    let (_dir, engine) = engine_with_table(always_losing());
    let raffle_id = selling_raffle(&engine, 3);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 1);
    let receipt = engine.confirm_payment(&confirmation(purchase.id)).unwrap();
    let card_id = receipt.scratch_card_ids[0];

    let revealed = engine.reveal_card(card_id, "alice").unwrap();
    assert_eq!(revealed.status, ScratchCardStatus::Lost);
    assert_eq!(revealed.prize_cents, 0);

    assert!(engine.claim_card_prize(card_id, "alice").is_err());
}

#[test]
fn cards_are_invisible_to_other_users() {
    let (_dir, engine) = engine_with_table(always_winning());
    let raffle_id = selling_raffle(&engine, 3);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 1);
    let receipt = engine.confirm_payment(&confirmation(purchase.id)).unwrap();
    let card_id = receipt.scratch_card_ids[0];

    let err = engine.reveal_card(card_id, "mallory").unwrap_err();
    assert!(matches!(
        err,
        RifaError::Fulfillment(FulfillmentError::CardNotFound(_))
    ));
    assert!(store::load_user_cards(engine.storage(), "mallory")
        .unwrap()
        .is_empty());
}

#[test]
fn empty_prize_table_issues_losing_cards() {
    let (_dir, engine) = engine_with_table(vec![]);
    let raffle_id = selling_raffle(&engine, 3);
    let purchase = pending_purchase(&engine, raffle_id, "alice", 2);

    let receipt = engine.confirm_payment(&confirmation(purchase.id)).unwrap();
    assert!(receipt.newly_fulfilled);

    // A malformed table never blocks fulfillment; cards just win nothing.
    let cards = store::load_user_cards(engine.storage(), "alice").unwrap();
    assert_eq!(cards.len(), 2);
    assert!(cards
        .iter()
        .all(|c| c.status == ScratchCardStatus::Lost && c.prize_cents == 0));
}
