//! Keyed result cache with single-flight computation.
//!
//! Concurrent callers asking for the same key share one computation: the
//! first caller runs the initializer and the others wait on the same cell.
//! Failed computations are not cached, so the next waiter retries.
//!
//! Entries expire after their TTL and carry tags (document content
//! hashes) so everything derived from a changed document can be dropped in
//! one call. When the cache is full, expired entries go first, then the
//! oldest ones.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;

use docfence_core::{Error, Result};

struct Slot<V> {
    cell: OnceCell<(V, Instant)>,
    created: Instant,
    ttl: Duration,
    tags: Vec<String>,
}

impl<V> Slot<V> {
    fn new(ttl: Duration, tags: &[String]) -> Self {
        Self {
            cell: OnceCell::new(),
            created: Instant::now(),
            ttl,
            tags: tags.to_vec(),
        }
    }

    fn filled(value: V, ttl: Duration, tags: &[String]) -> Self {
        let now = Instant::now();
        Self {
            cell: OnceCell::new_with(Some((value, now))),
            created: now,
            ttl,
            tags: tags.to_vec(),
        }
    }

    fn expired(&self, now: Instant) -> bool {
        match self.cell.get() {
            Some((_, at)) => now.duration_since(*at) >= self.ttl,
            None => false,
        }
    }
}

pub struct Cache<V> {
    slots: Mutex<HashMap<String, Arc<Slot<V>>>>,
    /// TTL for entries stored with [`Cache::insert`].
    ttl: Duration,
    max_entries: usize,
    wait_timeout: Duration,
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    pub fn new(ttl: Duration, max_entries: usize, wait_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            wait_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot<V>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh value for `key`, if any. Never waits on in-flight work.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut slots = self.lock();
        let slot = slots.get(key)?;
        if slot.expired(Instant::now()) {
            slots.remove(key);
            return None;
        }
        slot.cell.get().map(|(v, _)| v.clone())
    }

    /// Store a computed value under the default TTL, replacing any existing entry.
    pub fn insert(&self, key: &str, value: V, tags: &[String]) {
        let mut slots = self.lock();
        slots.remove(key);
        self.make_room(&mut slots);
        slots.insert(key.to_string(), Arc::new(Slot::filled(value, self.ttl, tags)));
    }

    /// Return the cached value or compute it once for all concurrent callers.
    ///
    /// The boolean is `true` when the value came from the cache without this
    /// call (or a call it waited on) doing the work. Waiting longer than the
    /// configured wait timeout fails with [`Error::Timeout`].
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        tags: &[String],
        ttl: Duration,
        init: F,
    ) -> Result<(V, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = {
            let mut slots = self.lock();
            let now = Instant::now();
            let stale = slots
                .get(key)
                .is_some_and(|s| s.expired(now));
            if stale {
                slots.remove(key);
            }
            match slots.get(key) {
                Some(slot) => {
                    if let Some((v, _)) = slot.cell.get() {
                        return Ok((v.clone(), true));
                    }
                    Arc::clone(slot)
                }
                None => {
                    self.make_room(&mut slots);
                    let slot = Arc::new(Slot::new(ttl, tags));
                    slots.insert(key.to_string(), Arc::clone(&slot));
                    slot
                }
            }
        };

        let mut computed = false;
        let fill = slot.cell.get_or_try_init(|| {
            computed = true;
            async {
                let value = init().await?;
                Ok::<_, Error>((value, Instant::now()))
            }
        });
        let filled = tokio::time::timeout(self.wait_timeout, fill)
            .await
            .map_err(|_| Error::Timeout {
                operation: "cache wait",
                after: self.wait_timeout,
            })
            .and_then(|r| r);
        match filled {
            Ok((value, _)) => Ok((value.clone(), !computed)),
            Err(e) => {
                self.forget_unfilled(key, &slot);
                Err(e)
            }
        }
    }

    /// Remove `slot` from the map if it is still the entry for `key` and was
    /// never filled.
    fn forget_unfilled(&self, key: &str, slot: &Arc<Slot<V>>) {
        let mut slots = self.lock();
        let same = slots
            .get(key)
            .is_some_and(|s| Arc::ptr_eq(s, slot) && !s.cell.initialized());
        if same {
            slots.remove(key);
        }
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry carrying `tag`. Returns how many were removed.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|_, s| !s.tags.iter().any(|t| t == tag));
        before - slots.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_room(&self, slots: &mut HashMap<String, Arc<Slot<V>>>) {
        if slots.len() < self.max_entries {
            return;
        }
        let now = Instant::now();
        slots.retain(|_, s| !s.expired(now));
        while slots.len() >= self.max_entries {
            // In-flight slots are not evicted; their waiters still need them.
            let oldest = slots
                .iter()
                .filter(|(_, s)| s.cell.initialized())
                .min_by_key(|(_, s)| s.created)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    slots.remove(&k);
                }
                None => break,
            }
        }
    }
}
