//! Per-raffle number inventory with an atomic claim operation.
//!
//! Claims scan a raffle's numbers in ascending order and acquire each
//! candidate through an in-flight registry keyed by (raffle, number):
//! a number another purchase is currently claiming is skipped, not waited
//! on, so concurrent claims for disjoint numbers proceed in parallel and
//! only contend on the shared tail of the available list.
//!
//! Nothing is persisted by `claim` itself. The returned guard pins the
//! acquired numbers until the orchestrator commits them as part of its
//! fulfillment batch; dropping the guard without committing releases the
//! numbers, which is the whole rollback story since storage was never
//! touched.

use crate::{
    errors::{FulfillmentError, RifaResult},
    model::{Raffle, RaffleNumber, RaffleStatus},
    storage::Storage,
    store,
};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const CLAIM_SCAN_PAGE: usize = 256;

/// Inventory of raffle numbers; the only component allowed to move a
/// number's state.
pub struct NumberPool {
    storage: Storage,
    in_flight: Arc<DashMap<(u64, u32), Uuid>>,
    /// Serializes claim commits against raffle status changes, so a close
    /// cannot interleave between the commit-time status check and the
    /// batch write.
    raffle_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl NumberPool {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            in_flight: Arc::new(DashMap::new()),
            raffle_locks: DashMap::new(),
        }
    }

    /// Claim `quantity` numbers of a raffle for a purchase.
    ///
    /// Numbers are taken in ascending order among those currently
    /// claimable. All-or-nothing: when fewer than `quantity` numbers can
    /// be acquired every acquisition is released and
    /// `InsufficientInventory` is returned with no mutation anywhere.
    pub fn claim(
        &self,
        raffle_id: u64,
        quantity: u32,
        purchase_id: Uuid,
        owner: &str,
    ) -> RifaResult<ClaimGuard> {
        if quantity == 0 {
            return Err(FulfillmentError::InvalidQuantity(0).into());
        }

        let raffle = store::load_raffle(&self.storage, raffle_id)?
            .ok_or(FulfillmentError::RaffleNotFound(raffle_id))?;
        if raffle.status != RaffleStatus::Selling {
            return Err(FulfillmentError::RaffleNotSelling {
                raffle_id,
                status: raffle.status,
            }
            .into());
        }

        let now = Utc::now();
        let mut acquired: Vec<RaffleNumber> = Vec::with_capacity(quantity as usize);
        let mut cursor: Option<Vec<u8>> = None;

        'scan: loop {
            let page =
                store::scan_numbers(&self.storage, raffle_id, cursor.as_deref(), CLAIM_SCAN_PAGE)?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|(key, _)| key.clone());

            for (_, record) in page {
                if !record.is_claimable(now) {
                    continue;
                }
                match self.in_flight.entry((raffle_id, record.number)) {
                    // Another purchase is mid-claim on this number: skip
                    // it instead of blocking.
                    Entry::Occupied(_) => continue,
                    Entry::Vacant(slot) => {
                        slot.insert(purchase_id);
                        acquired.push(record);
                    }
                }
                if acquired.len() == quantity as usize {
                    break 'scan;
                }
            }
        }

        let mut guard = ClaimGuard {
            in_flight: Arc::clone(&self.in_flight),
            raffle_id,
            numbers: acquired,
            released: false,
        };

        if guard.numbers.len() < quantity as usize {
            let available = guard.numbers.len() as u32;
            tracing::warn!(
                raffle_id,
                %purchase_id,
                requested = quantity,
                available,
                "Claim failed: insufficient inventory"
            );
            // Guard drop releases the partial acquisition.
            return Err(FulfillmentError::InsufficientInventory {
                requested: quantity,
                available,
            }
            .into());
        }

        for number in &mut guard.numbers {
            number.mark_sold(owner, purchase_id);
        }

        tracing::debug!(
            raffle_id,
            %purchase_id,
            numbers = ?guard.number_values(),
            "Numbers acquired for purchase"
        );

        Ok(guard)
    }

    /// Persist a claim together with the caller's batch items.
    ///
    /// The raffle's status is re-checked under the same per-raffle lock
    /// that `set_raffle_status` takes, making the selling check atomic
    /// with the batch write: a close either lands before the check (the
    /// commit fails, the guard releases, nothing was persisted) or after
    /// the whole batch.
    pub fn commit_claim(
        &self,
        claim: ClaimGuard,
        mut items: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> RifaResult<()> {
        let raffle_id = claim.raffle_id;
        let lock = self.raffle_lock(raffle_id);
        let result = (|| {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

            let raffle = store::load_raffle(&self.storage, raffle_id)?
                .ok_or(FulfillmentError::RaffleNotFound(raffle_id))?;
            if raffle.status != RaffleStatus::Selling {
                return Err(FulfillmentError::RaffleNotSelling {
                    raffle_id,
                    status: raffle.status,
                }
                .into());
            }

            items.extend(claim.sold_items()?);
            self.storage.batch_write(&items)?;
            claim.commit();
            Ok(())
        })();
        self.drop_raffle_lock(raffle_id, &lock);
        result
    }

    /// Change a raffle's status, serialized against claim commits on the
    /// same raffle.
    pub fn set_raffle_status(&self, raffle_id: u64, status: RaffleStatus) -> RifaResult<Raffle> {
        let lock = self.raffle_lock(raffle_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            store::set_raffle_status(&self.storage, raffle_id, status)
        };
        self.drop_raffle_lock(raffle_id, &lock);
        result
    }

    fn raffle_lock(&self, raffle_id: u64) -> Arc<Mutex<()>> {
        self.raffle_locks
            .entry(raffle_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the registry entry once no other thread holds a clone, so the
    /// map does not grow with every raffle ever touched.
    fn drop_raffle_lock(&self, raffle_id: u64, lock: &Arc<Mutex<()>>) {
        let _ = lock;
        self.raffle_locks
            .remove_if(&raffle_id, |_, entry| Arc::strong_count(entry) <= 2);
    }
}

/// Numbers pinned for one purchase between claim and commit.
#[derive(Debug)]
pub struct ClaimGuard {
    in_flight: Arc<DashMap<(u64, u32), Uuid>>,
    raffle_id: u64,
    numbers: Vec<RaffleNumber>,
    released: bool,
}

impl ClaimGuard {
    pub fn numbers(&self) -> &[RaffleNumber] {
        &self.numbers
    }

    /// The claimed number values, ascending.
    pub fn number_values(&self) -> Vec<u32> {
        self.numbers.iter().map(|n| n.number).collect()
    }

    /// Storage items marking every claimed number as sold. Persisting
    /// goes through `NumberPool::commit_claim`, which re-checks the
    /// raffle status under the per-raffle lock.
    fn sold_items(&self) -> RifaResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.numbers.iter().map(store::number_item).collect()
    }

    /// Unpin the numbers after the fulfillment batch has been persisted;
    /// from here on the storage records themselves mark them sold.
    fn commit(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        for number in &self.numbers {
            self.in_flight.remove(&(self.raffle_id, number.number));
        }
        self.released = true;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(
                raffle_id = self.raffle_id,
                numbers = ?self.number_values(),
                "Claim released without commit"
            );
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewRaffle, NumberStatus};
    use tempfile::TempDir;

    fn selling_raffle(storage: &Storage, total: u32) -> u64 {
        let raffle = store::create_raffle(
            storage,
            &NewRaffle {
                title: "Pool test".to_string(),
                description: String::new(),
                total_numbers: total,
                price_per_number_cents: 100,
            },
        )
        .unwrap();
        store::set_raffle_status(storage, raffle.id, RaffleStatus::Selling).unwrap();
        raffle.id
    }

    fn setup(total: u32) -> (TempDir, Storage, NumberPool, u64) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let raffle_id = selling_raffle(&storage, total);
        let pool = NumberPool::new(storage.clone());
        (dir, storage, pool, raffle_id)
    }

    #[test]
    fn test_claim_takes_lowest_numbers_first() {
        let (_dir, _storage, pool, raffle_id) = setup(5);

        let guard = pool.claim(raffle_id, 3, Uuid::new_v4(), "user-1").unwrap();
        assert_eq!(guard.number_values(), vec![1, 2, 3]);
        assert!(guard
            .numbers()
            .iter()
            .all(|n| n.status == NumberStatus::Sold));
    }

    #[test]
    fn test_concurrent_claims_skip_pinned_numbers() {
        let (_dir, _storage, pool, raffle_id) = setup(5);

        let first = pool.claim(raffle_id, 2, Uuid::new_v4(), "user-1").unwrap();
        // First guard still held: its numbers are skipped, not waited on.
        let second = pool.claim(raffle_id, 2, Uuid::new_v4(), "user-2").unwrap();

        assert_eq!(first.number_values(), vec![1, 2]);
        assert_eq!(second.number_values(), vec![3, 4]);

        // Only one number is left for a third claim of two.
        let err = pool
            .claim(raffle_id, 2, Uuid::new_v4(), "user-3")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::RifaError::Fulfillment(FulfillmentError::InsufficientInventory {
                requested: 2,
                available: 1,
            })
        ));
    }

    #[test]
    fn test_dropped_guard_releases_numbers() {
        let (_dir, storage, pool, raffle_id) = setup(3);

        {
            let guard = pool.claim(raffle_id, 3, Uuid::new_v4(), "user-1").unwrap();
            assert_eq!(guard.number_values(), vec![1, 2, 3]);
            // Dropped without commit
        }

        // Nothing was persisted; the same numbers come back.
        let guard = pool.claim(raffle_id, 3, Uuid::new_v4(), "user-2").unwrap();
        assert_eq!(guard.number_values(), vec![1, 2, 3]);
        assert_eq!(store::available_numbers(&storage, raffle_id).unwrap().len(), 3);
    }

    #[test]
    fn test_committed_claim_is_permanent() {
        let (_dir, storage, pool, raffle_id) = setup(3);

        let purchase_id = Uuid::new_v4();
        let guard = pool.claim(raffle_id, 2, purchase_id, "user-1").unwrap();
        pool.commit_claim(guard, Vec::new()).unwrap();

        assert_eq!(store::available_numbers(&storage, raffle_id).unwrap(), vec![3]);

        let sold = store::load_number(&storage, raffle_id, 1).unwrap().unwrap();
        assert_eq!(sold.status, NumberStatus::Sold);
        assert_eq!(sold.purchase_id, Some(purchase_id));
        assert_eq!(sold.owner.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_close_between_claim_and_commit_blocks_sale() {
        let (_dir, storage, pool, raffle_id) = setup(3);

        let guard = pool.claim(raffle_id, 2, Uuid::new_v4(), "user-1").unwrap();
        // Admin closes the raffle while the claim is still pinned.
        pool.set_raffle_status(raffle_id, RaffleStatus::Closed).unwrap();

        let err = pool.commit_claim(guard, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::RifaError::Fulfillment(FulfillmentError::RaffleNotSelling { .. })
        ));

        // Nothing was sold and the pinned numbers were released.
        assert_eq!(
            store::available_numbers(&storage, raffle_id).unwrap(),
            vec![1, 2, 3]
        );
        pool.set_raffle_status(raffle_id, RaffleStatus::Selling).unwrap();
        let retry = pool.claim(raffle_id, 2, Uuid::new_v4(), "user-2").unwrap();
        assert_eq!(retry.number_values(), vec![1, 2]);
    }

    #[test]
    fn test_claim_requires_selling_raffle() {
        let (_dir, storage, pool, raffle_id) = setup(3);
        store::set_raffle_status(&storage, raffle_id, RaffleStatus::Closed).unwrap();

        let err = pool.claim(raffle_id, 1, Uuid::new_v4(), "user-1").unwrap_err();
        assert!(matches!(
            err,
            crate::errors::RifaError::Fulfillment(FulfillmentError::RaffleNotSelling { .. })
        ));
    }

    #[test]
    fn test_claim_rejects_zero_quantity() {
        let (_dir, _storage, pool, raffle_id) = setup(3);
        assert!(pool.claim(raffle_id, 0, Uuid::new_v4(), "user-1").is_err());
    }

    #[test]
    fn test_claim_unknown_raffle() {
        let (_dir, _storage, pool, _raffle_id) = setup(1);
        let err = pool.claim(999, 1, Uuid::new_v4(), "user-1").unwrap_err();
        assert!(matches!(
            err,
            crate::errors::RifaError::Fulfillment(FulfillmentError::RaffleNotFound(999))
        ));
    }
}
