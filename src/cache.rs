//! Per-thread rendered page cache.
//!
//! A thread's entry is `fresh` once a render has been produced since its
//! last mutation, `stale` right after a mutation (bytes cleared, to be
//! regenerated on next read), or absent entirely (never rendered, or
//! deleted). `get` must not hold the cache lock while asking the sequencer
//! to render, since the sequencer may itself be blocked waiting to mark
//! this same entry stale from a concurrent command — so it releases the
//! lock, awaits the render, then reacquires to store the result. Two
//! concurrent stale reads can each trigger a render; both renders are pure
//! functions of hive state, so the duplication is wasted work, not a
//! correctness bug.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use crate::ids::ThreadId;

#[derive(Clone)]
struct Entry {
    bytes: Bytes,
    hidden: bool,
    fresh: bool,
}

pub struct PageCache {
    entries: RwLock<HashMap<ThreadId, Entry>>,
}

/// Outcome of a cache lookup that doesn't (yet) have fresh bytes to serve.
pub enum CacheMiss {
    /// No entry exists, or it exists but is hidden and the requester may not
    /// see hidden threads.
    NotServable,
    /// An entry exists but is stale: the caller must render fresh bytes and
    /// call [`PageCache::store`].
    Stale,
}

impl PageCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Marks `id`'s entry stale (clearing its bytes), creating a hidden- or
    /// visible-flagged placeholder if none exists yet. Called synchronously
    /// from inside a sequencer command, so this never awaits.
    pub fn set_stale(&self, id: &ThreadId, hidden: bool) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            id.clone(),
            Entry { bytes: Bytes::new(), hidden, fresh: false },
        );
    }

    pub fn purge(&self, id: &ThreadId) {
        self.entries.write().unwrap().remove(id);
    }

    /// Returns fresh bytes if available, `Ok(None)`-equivalent otherwise via
    /// [`CacheMiss`]. On [`CacheMiss::Stale`], the caller should render
    /// (typically via `SequencerHandle::render`) and call [`Self::store`]
    /// before retrying. The lock is released before returning in every case,
    /// so a caller is free to await a render without holding it.
    pub fn get(&self, id: &ThreadId, can_see_hidden: bool) -> Result<Bytes, CacheMiss> {
        let entries = self.entries.read().unwrap();
        let Some(entry) = entries.get(id) else { return Err(CacheMiss::NotServable) };

        if entry.hidden && !can_see_hidden {
            return Err(CacheMiss::NotServable);
        }
        if entry.fresh {
            return Ok(entry.bytes.clone());
        }
        Err(CacheMiss::Stale)
    }

    /// Stores freshly rendered bytes for `id`, marking the entry fresh. The
    /// `hidden` flag is re-supplied because the entry may have been purged
    /// or changed state while the render was in flight.
    pub fn store(&self, id: &ThreadId, hidden: bool, bytes: Bytes) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(id.clone(), Entry { bytes, hidden, fresh: true });
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedPageCache = Arc<PageCache>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_after_set_stale_until_stored() {
        let cache = PageCache::new();
        let id = ThreadId::from("0");
        cache.set_stale(&id, false);
        assert!(matches!(cache.get(&id, false), Err(CacheMiss::Stale)));
        cache.store(&id, false, Bytes::from_static(b"page"));
        assert_eq!(cache.get(&id, false).unwrap(), Bytes::from_static(b"page"));
    }

    #[test]
    fn hidden_entry_not_servable_without_role() {
        let cache = PageCache::new();
        let id = ThreadId::from("0");
        cache.set_stale(&id, true);
        cache.store(&id, true, Bytes::from_static(b"page"));
        assert!(matches!(cache.get(&id, false), Err(CacheMiss::NotServable)));
        assert_eq!(cache.get(&id, true).unwrap(), Bytes::from_static(b"page"));
    }
}
