//! Error types for the rifa fulfillment engine
//!
//! One root error wrapping the configuration, storage and fulfillment
//! error families, with explicit conversions at the boundaries.

use crate::model::{PurchaseStatus, RaffleStatus, ScratchCardStatus};
use std::fmt;
use uuid::Uuid;

/// Root error type for all rifa operations
#[derive(Debug)]
pub enum RifaError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Storage system errors
    Storage(StorageError),

    /// Fulfillment pipeline errors (number pool, ledger, orchestrator)
    Fulfillment(FulfillmentError),
}

/// Configuration and validation errors
#[derive(Debug)]
pub enum ConfigurationError {
    MissingRequired(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
}

/// Storage system errors
///
/// All of these are considered transient from the orchestrator's point of
/// view: the fulfillment batch is all-or-nothing, so a retry is safe.
#[derive(Debug)]
pub enum StorageError {
    DatabaseOpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    CorruptedData(String),
}

/// Fulfillment errors, covering the number pool, the purchase ledger and
/// the orchestrator itself
#[derive(Debug)]
pub enum FulfillmentError {
    /// Fewer available numbers than requested; nothing was mutated.
    InsufficientInventory { requested: u32, available: u32 },

    /// Claim attempted outside the selling window. Indicates an upstream
    /// sequencing bug and is surfaced, never swallowed.
    RaffleNotSelling { raffle_id: u64, status: RaffleStatus },

    RaffleNotFound(u64),
    PurchaseNotFound(Uuid),

    /// The purchase is not in a state that allows the attempted action
    /// (e.g. fulfilling a pending purchase, paying a canceled one).
    InvalidPurchaseState {
        purchase_id: Uuid,
        status: PurchaseStatus,
        action: &'static str,
    },

    /// Quantity must be at least 1.
    InvalidQuantity(u32),

    CardNotFound(Uuid),

    /// The scratch card is not in a state that allows the attempted
    /// transition (claiming requires a revealed, winning card).
    InvalidCardState { card_id: Uuid, status: ScratchCardStatus },
}

impl fmt::Display for RifaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RifaError::Configuration(e) => write!(f, "Configuration error: {}", e),
            RifaError::Storage(e) => write!(f, "Storage error: {}", e),
            RifaError::Fulfillment(e) => write!(f, "Fulfillment error: {}", e),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingRequired(field) => {
                write!(f, "Missing required field: {}", field)
            }
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => {
                write!(f, "Failed to load configuration: {}", msg)
            }
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DatabaseOpenFailed(msg) => write!(f, "Database open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedData(msg) => write!(f, "Corrupted data: {}", msg),
        }
    }
}

impl fmt::Display for FulfillmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FulfillmentError::InsufficientInventory { requested, available } => {
                write!(
                    f,
                    "Insufficient inventory: requested {}, only {} available",
                    requested, available
                )
            }
            FulfillmentError::RaffleNotSelling { raffle_id, status } => {
                write!(f, "Raffle {} is not selling (status: {})", raffle_id, status)
            }
            FulfillmentError::RaffleNotFound(id) => write!(f, "Raffle {} not found", id),
            FulfillmentError::PurchaseNotFound(id) => write!(f, "Purchase {} not found", id),
            FulfillmentError::InvalidPurchaseState { purchase_id, status, action } => {
                write!(
                    f,
                    "Purchase {} cannot {} from status {}",
                    purchase_id, action, status
                )
            }
            FulfillmentError::InvalidQuantity(q) => {
                write!(f, "Invalid quantity: {} (must be at least 1)", q)
            }
            FulfillmentError::CardNotFound(id) => write!(f, "Scratch card {} not found", id),
            FulfillmentError::InvalidCardState { card_id, status } => {
                write!(f, "Scratch card {} cannot transition from status {}", card_id, status)
            }
        }
    }
}

impl std::error::Error for RifaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RifaError::Configuration(e) => Some(e),
            RifaError::Storage(e) => Some(e),
            RifaError::Fulfillment(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigurationError {}
impl std::error::Error for StorageError {}
impl std::error::Error for FulfillmentError {}

impl From<ConfigurationError> for RifaError {
    fn from(e: ConfigurationError) -> Self {
        RifaError::Configuration(e)
    }
}

impl From<StorageError> for RifaError {
    fn from(e: StorageError) -> Self {
        RifaError::Storage(e)
    }
}

impl From<FulfillmentError> for RifaError {
    fn from(e: FulfillmentError) -> Self {
        RifaError::Fulfillment(e)
    }
}

impl From<rocksdb::Error> for RifaError {
    fn from(e: rocksdb::Error) -> Self {
        RifaError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

/// Convenience type alias for Results
pub type RifaResult<T> = Result<T, RifaError>;

impl RifaError {
    /// True when retrying the whole fulfillment operation is safe.
    ///
    /// Storage failures are retryable because the fulfillment effect is a
    /// single all-or-nothing batch. Inventory and sequencing errors need
    /// operator action first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RifaError::Storage(_))
    }
}
