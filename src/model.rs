//! Domain model for raffles, numbers, purchases and scratch cards.
//!
//! All monetary values are integer cents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a raffle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RaffleStatus {
    Draft,
    Selling,
    Closed,
    Drawn,
}

impl fmt::Display for RaffleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaffleStatus::Draft => write!(f, "draft"),
            RaffleStatus::Selling => write!(f, "selling"),
            RaffleStatus::Closed => write!(f, "closed"),
            RaffleStatus::Drawn => write!(f, "drawn"),
        }
    }
}

/// A raffle selling numbers 1..=total_numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raffle {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub total_numbers: u32,
    pub price_per_number_cents: u64,
    pub status: RaffleStatus,
    pub created_at: DateTime<Utc>,
}

/// State of one number inside a raffle's inventory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NumberStatus {
    Available,
    Reserved,
    Sold,
    Winner,
}

impl fmt::Display for NumberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberStatus::Available => write!(f, "available"),
            NumberStatus::Reserved => write!(f, "reserved"),
            NumberStatus::Sold => write!(f, "sold"),
            NumberStatus::Winner => write!(f, "winner"),
        }
    }
}

/// One number of a raffle's inventory.
///
/// Transitions only move forward: available -> reserved -> sold, or
/// available -> sold directly. A reservation whose expiry has passed is
/// treated as available again; sold -> winner happens at draw time and is
/// outside this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaffleNumber {
    pub raffle_id: u64,
    pub number: u32,
    pub status: NumberStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<Uuid>,
}

impl RaffleNumber {
    /// A fresh, unowned number as created alongside its raffle.
    pub fn available(raffle_id: u64, number: u32) -> Self {
        Self {
            raffle_id,
            number,
            status: NumberStatus::Available,
            owner: None,
            reserved_until: None,
            purchase_id: None,
        }
    }

    /// Whether this number can be claimed right now.
    ///
    /// Expired reservations count as available; the stale reservation is
    /// cleared when the number is sold.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            NumberStatus::Available => true,
            NumberStatus::Reserved => self.reserved_until.map_or(true, |until| until <= now),
            NumberStatus::Sold | NumberStatus::Winner => false,
        }
    }

    /// Transition into sold state for the given purchase.
    pub fn mark_sold(&mut self, owner: &str, purchase_id: Uuid) {
        self.status = NumberStatus::Sold;
        self.owner = Some(owner.to_string());
        self.purchase_id = Some(purchase_id);
        self.reserved_until = None;
    }
}

/// Lifecycle of a purchase.
///
/// `Fulfilled` and `FulfillmentFailed` extend the basic pending/paid/
/// canceled record: a paid purchase whose fulfillment failed stays visible
/// for operator retry instead of pretending to be complete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    Paid,
    Fulfilled,
    FulfillmentFailed,
    Canceled,
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseStatus::Pending => write!(f, "pending"),
            PurchaseStatus::Paid => write!(f, "paid"),
            PurchaseStatus::Fulfilled => write!(f, "fulfilled"),
            PurchaseStatus::FulfillmentFailed => write!(f, "fulfillment_failed"),
            PurchaseStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// A purchase of raffle numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: Uuid,
    /// De-duplicates retried payment callbacks and replayed creation
    /// requests. Unique across all purchases.
    pub idempotency_key: Uuid,
    pub user_id: String,
    pub raffle_id: u64,
    pub quantity: u32,
    pub unit_price_cents: u64,
    pub total_price_cents: u64,
    pub status: PurchaseStatus,
    #[serde(default)]
    pub payment_provider: String,
    #[serde(default)]
    pub payment_ref: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    /// Auditable list of the numbers this purchase ended up owning.
    #[serde(default)]
    pub chosen_numbers: Vec<u32>,
    #[serde(default)]
    pub scratch_card_ids: Vec<Uuid>,
}

/// Lifecycle of a scratch card
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScratchCardStatus {
    Unused,
    Won,
    Lost,
    Claimed,
}

impl fmt::Display for ScratchCardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScratchCardStatus::Unused => write!(f, "unused"),
            ScratchCardStatus::Won => write!(f, "won"),
            ScratchCardStatus::Lost => write!(f, "lost"),
            ScratchCardStatus::Claimed => write!(f, "claimed"),
        }
    }
}

/// Bonus scratch card attached to a purchase.
///
/// The prize and the won/lost outcome are fixed at creation and never
/// re-rolled; revealing only makes the outcome visible to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchCard {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub user_id: String,
    pub raffle_id: u64,
    /// Unique display code shown to the user.
    pub code: String,
    pub status: ScratchCardStatus,
    pub prize_cents: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScratchCard {
    /// Issue a card for one unit of a purchase with an already-drawn prize.
    pub fn issue(purchase: &Purchase, code: String, prize_cents: u64) -> Self {
        let status = if prize_cents > 0 {
            ScratchCardStatus::Won
        } else {
            ScratchCardStatus::Lost
        };

        Self {
            id: Uuid::new_v4(),
            purchase_id: purchase.id,
            user_id: purchase.user_id.clone(),
            raffle_id: purchase.raffle_id,
            code,
            status,
            prize_cents,
            revealed_at: None,
            claimed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Result of a successful (or replayed) fulfillment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentReceipt {
    pub purchase_id: Uuid,
    pub raffle_id: u64,
    pub claimed_numbers: Vec<u32>,
    pub scratch_card_ids: Vec<Uuid>,
    /// False when this receipt comes from the idempotent replay path.
    pub newly_fulfilled: bool,
}

/// Request to create a raffle (admin boundary)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRaffle {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub total_numbers: u32,
    pub price_per_number_cents: u64,
}

/// Request to create a purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPurchase {
    /// Client-supplied idempotency key; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<Uuid>,
    pub user_id: String,
    pub raffle_id: u64,
    pub quantity: u32,
}

/// Payment confirmation event from the external payment subsystem.
///
/// Delivered at-least-once; duplicates hit the idempotent path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub purchase_id: Uuid,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub payment_ref: String,
}
