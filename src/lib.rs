//! Rifa - Raffle Fulfillment Engine
//!
//! Turns paid raffle purchases into delivered goods: sequentially
//! allocated raffle numbers plus scratch cards with weighted random
//! prizes, with exactly-once fulfillment under concurrent load.

pub mod api;
pub mod config;
pub mod errors;
pub mod fulfillment;
pub mod ledger;
pub mod model;
pub mod pool;
pub mod prize;
pub mod storage;
pub mod store;

pub use config::{ConfigLoader, RifaConfig};
pub use errors::{FulfillmentError, RifaError, RifaResult};
pub use fulfillment::FulfillmentEngine;
pub use model::{FulfillmentReceipt, Purchase, Raffle, ScratchCard};
pub use pool::NumberPool;
pub use prize::PrizeTable;
pub use storage::Storage;
