//! Persistent raffle/purchase/card records and their key layout.
//!
//! Keys use fixed prefixes plus big-endian id components so per-raffle
//! number scans iterate in ascending numeric order. Records are encoded
//! as JSON. Every index entry is written in the same batch as the record
//! it points at.

use crate::{
    errors::{FulfillmentError, RifaResult, StorageError},
    model::{NewRaffle, Raffle, RaffleNumber, RaffleStatus, Purchase, ScratchCard},
    storage::Storage,
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

const RAFFLE_PREFIX: &[u8] = b"raffle:meta:";
const RAFFLE_SEQ_KEY: &[u8] = b"raffle:seq";
const NUMBER_PREFIX: &[u8] = b"raffle:number:";
const PURCHASE_PREFIX: &[u8] = b"purchase:rec:";
const IDEMPOTENCY_PREFIX: &[u8] = b"purchase:idem:";
const CARD_PREFIX: &[u8] = b"card:rec:";
const USER_CARDS_PREFIX: &[u8] = b"card:index:user:";

const NUMBER_SCAN_PAGE: usize = 512;

fn raffle_key(raffle_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(RAFFLE_PREFIX.len() + 8);
    key.extend_from_slice(RAFFLE_PREFIX);
    key.extend_from_slice(&raffle_id.to_be_bytes());
    key
}

pub(crate) fn number_key(raffle_id: u64, number: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(NUMBER_PREFIX.len() + 12);
    key.extend_from_slice(NUMBER_PREFIX);
    key.extend_from_slice(&raffle_id.to_be_bytes());
    key.extend_from_slice(&number.to_be_bytes());
    key
}

pub(crate) fn number_prefix(raffle_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(NUMBER_PREFIX.len() + 8);
    key.extend_from_slice(NUMBER_PREFIX);
    key.extend_from_slice(&raffle_id.to_be_bytes());
    key
}

fn purchase_key(purchase_id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(PURCHASE_PREFIX.len() + 16);
    key.extend_from_slice(PURCHASE_PREFIX);
    key.extend_from_slice(purchase_id.as_bytes());
    key
}

fn idempotency_key(idem: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(IDEMPOTENCY_PREFIX.len() + 16);
    key.extend_from_slice(IDEMPOTENCY_PREFIX);
    key.extend_from_slice(idem.as_bytes());
    key
}

fn card_key(card_id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(CARD_PREFIX.len() + 16);
    key.extend_from_slice(CARD_PREFIX);
    key.extend_from_slice(card_id.as_bytes());
    key
}

fn user_card_key(user_id: &str, card_id: Uuid) -> Vec<u8> {
    let mut key = user_cards_prefix(user_id);
    key.extend_from_slice(card_id.as_bytes());
    key
}

fn user_cards_prefix(user_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(USER_CARDS_PREFIX.len() + user_id.len() + 1);
    key.extend_from_slice(USER_CARDS_PREFIX);
    key.extend_from_slice(user_id.as_bytes());
    key.push(b':');
    key
}

fn encode<T: Serialize>(value: &T, what: &str) -> RifaResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)).into())
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> RifaResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)).into())
}

// --- Batch item builders -----------------------------------------------
//
// Fulfillment composes a single batch from these so the purchase update,
// the sold numbers and the cards commit or fail together.

pub fn number_item(number: &RaffleNumber) -> RifaResult<(Vec<u8>, Vec<u8>)> {
    Ok((
        number_key(number.raffle_id, number.number),
        encode(number, "raffle number")?,
    ))
}

pub fn purchase_item(purchase: &Purchase) -> RifaResult<(Vec<u8>, Vec<u8>)> {
    Ok((purchase_key(purchase.id), encode(purchase, "purchase")?))
}

pub fn card_item(card: &ScratchCard) -> RifaResult<(Vec<u8>, Vec<u8>)> {
    Ok((card_key(card.id), encode(card, "scratch card")?))
}

pub fn user_card_index_item(card: &ScratchCard) -> (Vec<u8>, Vec<u8>) {
    (user_card_key(&card.user_id, card.id), Vec::new())
}

// --- Raffle catalog ----------------------------------------------------

/// Create a raffle and pre-create its full 1..=total number inventory in
/// one atomic batch, so a raffle can never exist half-populated.
pub fn create_raffle(storage: &Storage, req: &NewRaffle) -> RifaResult<Raffle> {
    if req.total_numbers == 0 {
        return Err(FulfillmentError::InvalidQuantity(0).into());
    }

    let raffle = Raffle {
        id: next_raffle_id(storage)?,
        title: req.title.clone(),
        description: req.description.clone(),
        total_numbers: req.total_numbers,
        price_per_number_cents: req.price_per_number_cents,
        status: RaffleStatus::Draft,
        created_at: Utc::now(),
    };

    let mut items = Vec::with_capacity(1 + req.total_numbers as usize);
    items.push((raffle_key(raffle.id), encode(&raffle, "raffle")?));
    for number in 1..=req.total_numbers {
        items.push(number_item(&RaffleNumber::available(raffle.id, number))?);
    }

    storage.batch_write(&items)?;
    tracing::info!(
        raffle_id = raffle.id,
        total_numbers = raffle.total_numbers,
        "Created raffle with pre-created number inventory"
    );

    Ok(raffle)
}

/// Allocate the next raffle id.
///
/// Raffle creation is an admin operation, not a contended path; a plain
/// read-increment-write on the sequence key is sufficient.
fn next_raffle_id(storage: &Storage) -> RifaResult<u64> {
    let current = storage
        .get(RAFFLE_SEQ_KEY)?
        .map(|bytes| decode::<u64>(&bytes, "raffle sequence"))
        .transpose()?
        .unwrap_or(0);
    let next = current + 1;
    storage.put(RAFFLE_SEQ_KEY, &encode(&next, "raffle sequence")?)?;
    Ok(next)
}

pub fn load_raffle(storage: &Storage, raffle_id: u64) -> RifaResult<Option<Raffle>> {
    let Some(bytes) = storage.get(&raffle_key(raffle_id))? else {
        return Ok(None);
    };
    decode(&bytes, "raffle").map(Some)
}

pub fn set_raffle_status(
    storage: &Storage,
    raffle_id: u64,
    status: RaffleStatus,
) -> RifaResult<Raffle> {
    let mut raffle =
        load_raffle(storage, raffle_id)?.ok_or(FulfillmentError::RaffleNotFound(raffle_id))?;
    let previous = raffle.status;
    raffle.status = status;
    storage.put(&raffle_key(raffle_id), &encode(&raffle, "raffle")?)?;
    tracing::info!(raffle_id, %previous, %status, "Raffle status changed");
    Ok(raffle)
}

/// Scan one page of a raffle's number records in ascending numeric order.
pub fn scan_numbers(
    storage: &Storage,
    raffle_id: u64,
    cursor: Option<&[u8]>,
    limit: usize,
) -> RifaResult<Vec<(Vec<u8>, RaffleNumber)>> {
    let prefix = number_prefix(raffle_id);
    let rows = storage.scan_prefix(&prefix, cursor, limit);

    let mut numbers = Vec::with_capacity(rows.len());
    for (key, value) in rows {
        numbers.push((key, decode(&value, "raffle number")?));
    }
    Ok(numbers)
}

/// Ascending list of the currently claimable number values of a raffle.
pub fn available_numbers(storage: &Storage, raffle_id: u64) -> RifaResult<Vec<u32>> {
    let now = Utc::now();
    let mut values = Vec::new();
    let mut cursor: Option<Vec<u8>> = None;

    loop {
        let page = scan_numbers(storage, raffle_id, cursor.as_deref(), NUMBER_SCAN_PAGE)?;
        if page.is_empty() {
            break;
        }
        cursor = page.last().map(|(key, _)| key.clone());
        for (_, number) in page {
            if number.is_claimable(now) {
                values.push(number.number);
            }
        }
    }

    Ok(values)
}

pub fn load_number(
    storage: &Storage,
    raffle_id: u64,
    number: u32,
) -> RifaResult<Option<RaffleNumber>> {
    let Some(bytes) = storage.get(&number_key(raffle_id, number))? else {
        return Ok(None);
    };
    decode(&bytes, "raffle number").map(Some)
}

// --- Purchases ---------------------------------------------------------

/// Store a freshly created purchase together with its idempotency-key
/// index entry, atomically.
pub fn store_new_purchase(storage: &Storage, purchase: &Purchase) -> RifaResult<()> {
    let items = vec![
        purchase_item(purchase)?,
        (
            idempotency_key(purchase.idempotency_key),
            encode(&purchase.id, "idempotency index")?,
        ),
    ];
    storage.batch_write(&items)
}

pub fn store_purchase(storage: &Storage, purchase: &Purchase) -> RifaResult<()> {
    let (key, value) = purchase_item(purchase)?;
    storage.put(&key, &value)
}

pub fn load_purchase(storage: &Storage, purchase_id: Uuid) -> RifaResult<Option<Purchase>> {
    let Some(bytes) = storage.get(&purchase_key(purchase_id))? else {
        return Ok(None);
    };
    decode(&bytes, "purchase").map(Some)
}

pub fn load_purchase_by_idempotency_key(
    storage: &Storage,
    idem: Uuid,
) -> RifaResult<Option<Purchase>> {
    let Some(bytes) = storage.get(&idempotency_key(idem))? else {
        return Ok(None);
    };
    let purchase_id: Uuid = decode(&bytes, "idempotency index")?;
    load_purchase(storage, purchase_id)
}

// --- Scratch cards -----------------------------------------------------

pub fn store_card(storage: &Storage, card: &ScratchCard) -> RifaResult<()> {
    let (key, value) = card_item(card)?;
    storage.put(&key, &value)
}

pub fn load_card(storage: &Storage, card_id: Uuid) -> RifaResult<Option<ScratchCard>> {
    let Some(bytes) = storage.get(&card_key(card_id))? else {
        return Ok(None);
    };
    decode(&bytes, "scratch card").map(Some)
}

/// All scratch cards belonging to a user, via the per-user index.
pub fn load_user_cards(storage: &Storage, user_id: &str) -> RifaResult<Vec<ScratchCard>> {
    let prefix = user_cards_prefix(user_id);
    let mut cards = Vec::new();
    let mut cursor: Option<Vec<u8>> = None;

    loop {
        let rows = storage.scan_prefix(&prefix, cursor.as_deref(), NUMBER_SCAN_PAGE);
        if rows.is_empty() {
            break;
        }
        cursor = rows.last().map(|(key, _)| key.clone());
        for (key, _) in rows {
            let id_bytes = &key[prefix.len()..];
            let Ok(card_id) = Uuid::from_slice(id_bytes) else {
                tracing::warn!("Malformed user card index key, skipping");
                continue;
            };
            match load_card(storage, card_id)? {
                Some(card) => cards.push(card),
                None => tracing::warn!(%card_id, "User card index points at missing card"),
            }
        }
    }

    Ok(cards)
}
