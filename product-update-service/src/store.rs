//! In-memory product storage.
//!
//! Workers write here, the query endpoint reads from here. The map is split
//! into independently locked shards so that reads and writes for different
//! products rarely touch the same lock.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::product::Product;
use crate::worker::EventSink;

pub const DEFAULT_SHARDS: usize = 16;

type Shard = RwLock<HashMap<String, Product>>;

/// Thread-safe map from product id to the latest applied record.
///
/// Each shard is guarded by an `RwLock`: concurrent `get`s share the lock,
/// an `update` takes it exclusively for a single whole-record assignment.
/// A reader therefore sees either the old record or the new one, never a mix.
pub struct ProductStore {
    shards: Box<[Shard]>,
    hasher: RandomState,
}

impl Default for ProductStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a store with `shards` partitions (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Replaces the stored record for `product.product_id`.
    pub fn update(&self, product: Product) {
        let mut shard = write(self.shard_for(&product.product_id));
        shard.insert(product.product_id.clone(), product);
    }

    /// Returns an owned copy of the current record, if any.
    ///
    /// The copy is detached from the store: later updates do not change it.
    pub fn get(&self, product_id: &str) -> Option<Product> {
        read(self.shard_for(product_id)).get(product_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| read(shard).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every record into an ordered map.
    ///
    /// Shards are locked one at a time, so the result is consistent per
    /// product but not a single point-in-time view across all products.
    pub fn snapshot(&self) -> BTreeMap<String, Product> {
        let mut snapshot = BTreeMap::new();
        for shard in self.shards.iter() {
            snapshot.extend(
                read(shard)
                    .iter()
                    .map(|(id, product)| (id.clone(), product.clone())),
            );
        }
        snapshot
    }

    fn shard_for(&self, product_id: &str) -> &Shard {
        let index = self.hasher.hash_one(product_id) as usize % self.shards.len();
        &self.shards[index]
    }
}

impl EventSink for ProductStore {
    type Event = Product;

    fn apply(&self, product: Product) -> anyhow::Result<()> {
        debug!(
            product_id = %product.product_id,
            price = product.price,
            stock = product.stock,
            "applied product update"
        );
        self.update(product);
        Ok(())
    }
}

// Writers only ever insert a complete record, so a poisoned shard still holds
// consistent data and can be used as-is.
fn read(shard: &Shard) -> RwLockReadGuard<'_, HashMap<String, Product>> {
    shard.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(shard: &Shard) -> RwLockWriteGuard<'_, HashMap<String, Product>> {
    shard.write().unwrap_or_else(PoisonError::into_inner)
}
