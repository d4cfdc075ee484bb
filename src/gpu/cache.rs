//! Reference-counted, frame-aged cache shared by every resource kind.

use std::hash::Hash;

use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct CacheEntry<H> {
    pub handle: H,
    pub ref_count: u32,
    pub last_used_frame: u64,
}

/// Map of native handles with leases and last-use stamps.
///
/// An entry becomes evictable once nobody holds a lease on it and it has
/// gone unused for more than the retention window.
#[derive(Debug)]
pub struct ResourceCache<K, H> {
    entries: FxHashMap<K, CacheEntry<H>>,
}

impl<K, H> Default for ResourceCache<K, H> {
    fn default() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }
}

impl<K: Eq + Hash + Clone, H> ResourceCache<K, H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, creating it with `create` on a miss.
    /// New entries start without leases; callers acquire explicitly.
    pub fn get_or_try_insert<E>(
        &mut self,
        key: K,
        frame: u64,
        create: impl FnOnce() -> Result<H, E>,
    ) -> Result<&mut CacheEntry<H>, E> {
        use std::collections::hash_map::Entry;
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.last_used_frame = frame;
                Ok(entry)
            }
            Entry::Vacant(vacant) => Ok(vacant.insert(CacheEntry {
                handle: create()?,
                ref_count: 0,
                last_used_frame: frame,
            })),
        }
    }

    pub fn insert(&mut self, key: K, handle: H, frame: u64) -> Option<CacheEntry<H>> {
        self.entries.insert(
            key,
            CacheEntry {
                handle,
                ref_count: 0,
                last_used_frame: frame,
            },
        )
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&H> {
        self.entries.get(key).map(|e| &e.handle)
    }

    #[inline]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut H> {
        self.entries.get_mut(key).map(|e| &mut e.handle)
    }

    #[inline]
    #[must_use]
    pub fn entry(&self, key: &K) -> Option<&CacheEntry<H>> {
        self.entries.get(key)
    }

    #[inline]
    pub fn entry_mut(&mut self, key: &K) -> Option<&mut CacheEntry<H>> {
        self.entries.get_mut(key)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Stamps the entry with `frame`. Returns `false` if absent.
    pub fn mark_used(&mut self, key: &K, frame: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used_frame = frame;
                true
            }
            None => false,
        }
    }

    /// Adds a lease. Returns the new count, or `None` if absent.
    pub fn acquire(&mut self, key: &K, frame: u64) -> Option<u32> {
        let entry = self.entries.get_mut(key)?;
        entry.ref_count += 1;
        entry.last_used_frame = frame;
        Some(entry.ref_count)
    }

    /// Drops a lease, saturating at zero. Returns the new count, or `None`
    /// if absent.
    pub fn release(&mut self, key: &K) -> Option<u32> {
        let entry = self.entries.get_mut(key)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        Some(entry.ref_count)
    }

    #[must_use]
    pub fn ref_count(&self, key: &K) -> Option<u32> {
        self.entries.get(key).map(|e| e.ref_count)
    }

    pub fn remove(&mut self, key: &K) -> Option<H> {
        self.entries.remove(key).map(|e| e.handle)
    }

    /// Removes and returns every entry without leases that has not been
    /// used for more than `retention` frames.
    pub fn sweep(&mut self, frame: u64, retention: u64) -> Vec<(K, H)> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.ref_count == 0 && frame.saturating_sub(e.last_used_frame) > retention)
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| {
                let entry = self.entries.remove(&key)?;
                Some((key, entry.handle))
            })
            .collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &CacheEntry<H>)> {
        self.entries.iter()
    }
}
