//! TTL cache for chain lookups.
//!
//! Height is a single slot; block hashes and block timestamps are keyed by
//! height. Every entry carries its own expiry and stale entries read as
//! absent. When a map outgrows its capacity the entry with the earliest
//! expiry is evicted, which under steady polling is the oldest one.

use std::hash::Hash;
use std::sync::RwLock;
use std::time::Duration;

use bitcoin::BlockHash;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V: Copy> Entry<V> {
    fn live(&self, now: Instant) -> Option<V> {
        (now < self.expires_at).then_some(self.value)
    }
}

/// Cache of recent chain lookups.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    height: RwLock<Option<Entry<u32>>>,
    hashes: DashMap<u32, Entry<BlockHash>>,
    timestamps: DashMap<u32, Entry<u32>>,
    hash_capacity: usize,
    timestamp_capacity: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, hash_capacity: usize, timestamp_capacity: usize) -> Self {
        Self {
            ttl,
            height: RwLock::new(None),
            hashes: DashMap::new(),
            timestamps: DashMap::new(),
            hash_capacity: hash_capacity.max(1),
            timestamp_capacity: timestamp_capacity.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn height(&self) -> Option<u32> {
        let slot = self.height.read().expect("height cache lock poisoned");
        let hit = slot.and_then(|e| e.live(Instant::now()));
        metrics::record_cache_lookup("height", hit.is_some());
        hit
    }

    pub fn set_height(&self, height: u32) {
        let mut slot = self.height.write().expect("height cache lock poisoned");
        *slot = Some(Entry {
            value: height,
            expires_at: Instant::now() + self.ttl,
        });
    }

    pub fn block_hash(&self, height: u32) -> Option<BlockHash> {
        let hit = lookup(&self.hashes, &height);
        metrics::record_cache_lookup("block_hash", hit.is_some());
        hit
    }

    pub fn set_block_hash(&self, height: u32, hash: BlockHash) {
        insert_bounded(&self.hashes, height, hash, self.ttl, self.hash_capacity);
    }

    pub fn block_timestamp(&self, height: u32) -> Option<u32> {
        let hit = lookup(&self.timestamps, &height);
        metrics::record_cache_lookup("block_timestamp", hit.is_some());
        hit
    }

    pub fn set_block_timestamp(&self, height: u32, timestamp: u32) {
        insert_bounded(
            &self.timestamps,
            height,
            timestamp,
            self.ttl,
            self.timestamp_capacity,
        );
    }

    /// Record the hash seen at `height`.
    ///
    /// If a different live hash was cached the block at that height was
    /// replaced, so its timestamp is dropped too. Returns `true` in that case.
    pub fn observe_block(&self, height: u32, hash: BlockHash) -> bool {
        let replaced = matches!(lookup(&self.hashes, &height), Some(cached) if cached != hash);
        if replaced {
            tracing::warn!(height, %hash, "Cached block hash replaced");
            self.timestamps.remove(&height);
        }
        self.set_block_hash(height, hash);
        replaced
    }

    /// Forget everything cached for `height`.
    pub fn invalidate(&self, height: u32) {
        self.hashes.remove(&height);
        self.timestamps.remove(&height);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.hashes.len() + self.timestamps.len();
        self.hashes.retain(|_, e| now < e.expires_at);
        self.timestamps.retain(|_, e| now < e.expires_at);

        let mut slot = self.height.write().expect("height cache lock poisoned");
        if slot.is_some_and(|e| e.live(now).is_none()) {
            *slot = None;
        }

        before.saturating_sub(self.hashes.len() + self.timestamps.len())
    }

    /// Number of entries in the hash and timestamp maps, stale ones included.
    pub fn len(&self) -> (usize, usize) {
        (self.hashes.len(), self.timestamps.len())
    }
}

fn lookup<K, V>(map: &DashMap<K, Entry<V>>, key: &K) -> Option<V>
where
    K: Eq + Hash,
    V: Copy,
{
    map.get(key).and_then(|e| e.live(Instant::now()))
}

fn insert_bounded<K, V>(map: &DashMap<K, Entry<V>>, key: K, value: V, ttl: Duration, capacity: usize)
where
    K: Eq + Hash + Copy,
{
    map.insert(
        key,
        Entry {
            value,
            expires_at: Instant::now() + ttl,
        },
    );

    while map.len() > capacity {
        let oldest = map
            .iter()
            .min_by_key(|e| e.value().expires_at)
            .map(|e| *e.key());
        match oldest {
            Some(k) => {
                map.remove(&k);
            }
            None => break,
        }
    }
}
