use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

/// Per-client bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bucket {
    /// Remaining allowance. Negative values are debt left by denied attempts.
    pub(crate) tokens: i64,
    pub(crate) last_update: SystemTime,
}

type Shard = HashMap<Vec<u8>, Bucket>;

/// In-memory bucket map split into independently locked shards.
///
/// A key always maps to the same shard, so every read-modify-write of one bucket is
/// serialized by that shard's mutex while unrelated keys mostly take different locks.
#[derive(Debug)]
pub(crate) struct BucketStore {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
}

impl BucketStore {
    /// `shards` must be > 0; the builder validates it.
    pub(crate) fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        (self.hasher.hash_one(key) % self.shards.len() as u64) as usize
    }

    fn lock(&self, index: usize) -> MutexGuard<'_, Shard> {
        // Buckets are plain values written in one assignment, so a poisoned shard is still
        // consistent.
        self.shards[index].lock().unwrap_or_else(|poisoned| {
            tracing::warn!(shard = index, "bucket shard lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Atomically replace the bucket for `key` with the one computed by `f`.
    ///
    /// `f` sees the current bucket (`None` if the key is untracked) and returns the bucket
    /// to store plus a value handed back to the caller.
    pub(crate) fn update<R>(&self, key: &[u8], f: impl FnOnce(Option<Bucket>) -> (Bucket, R)) -> R {
        let mut shard = self.lock(self.shard_index(key));
        match shard.get_mut(key) {
            Some(bucket) => {
                let (next, out) = f(Some(*bucket));
                *bucket = next;
                out
            }
            None => {
                let (next, out) = f(None);
                shard.insert(key.to_vec(), next);
                out
            }
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Bucket> {
        self.lock(self.shard_index(key)).get(key).copied()
    }

    pub(crate) fn len(&self) -> usize {
        (0..self.shards.len()).map(|i| self.lock(i).len()).sum()
    }

    /// Keep only buckets for which `keep` returns true. Returns `(evicted, retained)`.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&Bucket) -> bool) -> (usize, usize) {
        let mut evicted = 0;
        let mut retained = 0;
        for index in 0..self.shards.len() {
            let mut shard = self.lock(index);
            let before = shard.len();
            shard.retain(|_, bucket| keep(bucket));
            evicted += before - shard.len();
            retained += shard.len();
        }
        (evicted, retained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bucket(tokens: i64, secs: u64) -> Bucket {
        Bucket { tokens, last_update: SystemTime::UNIX_EPOCH + Duration::from_secs(secs) }
    }

    #[test]
    fn update_inserts_then_replaces() {
        let store = BucketStore::new(4);
        let seen = store.update(b"a", |prev| (bucket(5, 0), prev));
        assert_eq!(seen, None);
        let seen = store.update(b"a", |prev| (bucket(4, 1), prev));
        assert_eq!(seen, Some(bucket(5, 0)));
        assert_eq!(store.get(b"a"), Some(bucket(4, 1)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn len_counts_across_shards() {
        let store = BucketStore::new(8);
        for i in 0..100u32 {
            store.update(&i.to_be_bytes(), |_| (bucket(1, 0), ()));
        }
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn retain_reports_counts() {
        let store = BucketStore::new(3);
        for i in 0..10u64 {
            store.update(&i.to_be_bytes(), |_| (bucket(0, i), ()));
        }
        let (evicted, retained) = store.retain(|b| b.last_update >= SystemTime::UNIX_EPOCH + Duration::from_secs(6));
        assert_eq!((evicted, retained), (6, 4));
        assert_eq!(store.len(), 4);
        assert!(store.get(&2u64.to_be_bytes()).is_none());
        assert!(store.get(&7u64.to_be_bytes()).is_some());
    }

    #[test]
    fn zero_shards_falls_back_to_one() {
        let store = BucketStore::new(0);
        store.update(b"k", |_| (bucket(1, 0), ()));
        assert_eq!(store.len(), 1);
    }
}
