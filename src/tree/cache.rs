//! time-bounded memo of structural relations over a [`TreeSource`]
//!
//! entries record parent, child-at-index, index-in-parent and child count.
//! every entry is validated against its TTL at read time. the TTL depends on
//! whether the node carries text (text-bearing nodes change faster, so they
//! expire sooner); nodes whose text was never read use the plain TTL.
//!
//! a partial change notification drops only the affected subtree; a
//! foreground change or any sign of inconsistency drops everything.
//!
//! [`TreeSource`]: super::TreeSource

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl_text_ms: i64,
    pub ttl_plain_ms: i64,
    /// a node first seen longer ago than this must be refreshed before use
    pub stale_ms: i64,
    /// wholesale clear once this many entries accumulate
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_text_ms: 1000,
            ttl_plain_ms: 3000,
            stale_ms: 5000,
            max_entries: 20_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub clears: u64,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    at: i64,
}

#[derive(Debug)]
struct Maps<N> {
    parents: HashMap<N, Entry<Option<N>>>,
    children: HashMap<(N, usize), Entry<Option<N>>>,
    indexes: HashMap<N, Entry<usize>>,
    counts: HashMap<N, Entry<usize>>,
    /// whether a node carries text, noted when its text is read
    text_bearing: HashMap<N, bool>,
    /// when a handle was first seen, for staleness
    seen: HashMap<N, i64>,
    root: Option<Entry<N>>,
    hits: u64,
    misses: u64,
    clears: u64,
}

impl<N> Default for Maps<N> {
    fn default() -> Self {
        Self {
            parents: HashMap::new(),
            children: HashMap::new(),
            indexes: HashMap::new(),
            counts: HashMap::new(),
            text_bearing: HashMap::new(),
            seen: HashMap::new(),
            root: None,
            hits: 0,
            misses: 0,
            clears: 0,
        }
    }
}

impl<N: Clone + Eq + Hash> Maps<N> {
    fn clear_entries(&mut self) {
        self.parents.clear();
        self.children.clear();
        self.indexes.clear();
        self.counts.clear();
        self.text_bearing.clear();
        self.seen.clear();
        self.root = None;
        self.clears += 1;
    }

    fn len(&self) -> usize {
        self.parents.len()
            + self.children.len()
            + self.indexes.len()
            + self.counts.len()
            + self.text_bearing.len()
            + self.seen.len()
    }

    fn ttl(&self, config: &CacheConfig, node: &N) -> i64 {
        match self.text_bearing.get(node) {
            Some(true) => config.ttl_text_ms,
            _ => config.ttl_plain_ms,
        }
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    /// every child and index entry agrees with the others
    fn is_consistent(&self) -> bool {
        self.children.iter().all(|((parent, i), entry)| match &entry.value {
            Some(child) => {
                let index_ok = self.indexes.get(child).map_or(true, |e| e.value == *i);
                let parent_ok = self
                    .parents
                    .get(child)
                    .map_or(true, |e| e.value.as_ref() == Some(parent));
                index_ok && parent_ok
            }
            None => true,
        })
    }
}

/// structural memo keyed by node handle
#[derive(Debug)]
pub struct NodeCache<N> {
    maps: Mutex<Maps<N>>,
    config: CacheConfig,
}

impl<N> NodeCache<N>
where
    N: Clone + Eq + Hash + std::fmt::Debug,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            maps: Mutex::new(Maps::default()),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// a poisoned lock means a writer panicked mid-update; the maps can't be
    /// trusted, so start over
    fn lock(&self) -> MutexGuard<'_, Maps<N>> {
        match self.maps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("node cache lock poisoned, discarding cache");
                self.maps.clear_poison();
                let mut guard = poisoned.into_inner();
                guard.clear_entries();
                guard
            }
        }
    }

    fn after_insert(&self, maps: &mut Maps<N>) {
        if maps.len() > self.config.max_entries {
            debug!(entries = maps.len(), "node cache full, clearing");
            maps.clear_entries();
        }
    }

    // ------------------------------------------------------------------
    // reads: `None` = not cached (or expired)
    // ------------------------------------------------------------------

    pub fn root(&self, now: i64) -> Option<N> {
        let mut maps = self.lock();
        let fresh = maps.root.as_ref().and_then(|e| {
            let ttl = maps.ttl(&self.config, &e.value);
            (now - e.at < ttl).then(|| e.value.clone())
        });
        if fresh.is_none() {
            maps.root = None;
        }
        maps.record(fresh.is_some());
        fresh
    }

    pub fn parent(&self, node: &N, now: i64) -> Option<Option<N>> {
        let mut maps = self.lock();
        let ttl = maps.ttl(&self.config, node);
        let fresh = match maps.parents.get(node) {
            Some(e) if now - e.at < ttl => Some(e.value.clone()),
            Some(_) => {
                maps.parents.remove(node);
                None
            }
            None => None,
        };
        maps.record(fresh.is_some());
        fresh
    }

    pub fn child(&self, node: &N, index: usize, now: i64) -> Option<Option<N>> {
        let mut maps = self.lock();
        let ttl = maps.ttl(&self.config, node);
        let key = (node.clone(), index);
        let fresh = match maps.children.get(&key) {
            Some(e) if now - e.at < ttl => Some(e.value.clone()),
            Some(_) => {
                maps.children.remove(&key);
                None
            }
            None => None,
        };
        maps.record(fresh.is_some());
        fresh
    }

    pub fn index(&self, node: &N, now: i64) -> Option<usize> {
        let mut maps = self.lock();
        let ttl = maps.ttl(&self.config, node);
        let fresh = match maps.indexes.get(node) {
            Some(e) if now - e.at < ttl => Some(e.value),
            Some(_) => {
                maps.indexes.remove(node);
                None
            }
            None => None,
        };
        maps.record(fresh.is_some());
        fresh
    }

    pub fn child_count(&self, node: &N, now: i64) -> Option<usize> {
        let mut maps = self.lock();
        let ttl = maps.ttl(&self.config, node);
        let fresh = match maps.counts.get(node) {
            Some(e) if now - e.at < ttl => Some(e.value),
            Some(_) => {
                maps.counts.remove(node);
                None
            }
            None => None,
        };
        maps.record(fresh.is_some());
        fresh
    }

    /// handle is older than the stale threshold and must be refreshed
    pub fn is_stale(&self, node: &N, now: i64) -> bool {
        let maps = self.lock();
        maps.seen
            .get(node)
            .is_some_and(|first| now - first > self.config.stale_ms)
    }

    // ------------------------------------------------------------------
    // writes
    // ------------------------------------------------------------------

    pub fn put_root(&self, root: &N, now: i64) {
        let mut maps = self.lock();
        maps.root = Some(Entry {
            value: root.clone(),
            at: now,
        });
        maps.parents.insert(root.clone(), Entry { value: None, at: now });
        maps.seen.entry(root.clone()).or_insert(now);
    }

    pub fn put_parent(&self, node: &N, parent: Option<&N>, now: i64) {
        let mut maps = self.lock();
        maps.parents.insert(
            node.clone(),
            Entry {
                value: parent.cloned(),
                at: now,
            },
        );
        maps.seen.entry(node.clone()).or_insert(now);
        self.after_insert(&mut maps);
    }

    /// records the child link plus the child's parent and index
    pub fn put_child(&self, node: &N, index: usize, child: Option<&N>, now: i64) {
        let mut maps = self.lock();
        maps.children.insert(
            (node.clone(), index),
            Entry {
                value: child.cloned(),
                at: now,
            },
        );
        if let Some(child) = child {
            maps.parents.insert(
                child.clone(),
                Entry {
                    value: Some(node.clone()),
                    at: now,
                },
            );
            maps.indexes.insert(child.clone(), Entry { value: index, at: now });
            maps.seen.entry(child.clone()).or_insert(now);
        }
        self.after_insert(&mut maps);
    }

    pub fn put_index(&self, node: &N, index: usize, now: i64) {
        let mut maps = self.lock();
        maps.indexes.insert(node.clone(), Entry { value: index, at: now });
        self.after_insert(&mut maps);
    }

    pub fn put_child_count(&self, node: &N, count: usize, now: i64) {
        let mut maps = self.lock();
        maps.counts.insert(node.clone(), Entry { value: count, at: now });
        self.after_insert(&mut maps);
    }

    pub fn note_text(&self, node: &N, has_text: bool) {
        let mut maps = self.lock();
        maps.text_bearing.insert(node.clone(), has_text);
    }

    /// a refreshed handle starts a new staleness window
    pub fn mark_fresh(&self, node: &N, now: i64) {
        let mut maps = self.lock();
        maps.seen.insert(node.clone(), now);
    }

    // ------------------------------------------------------------------
    // invalidation
    // ------------------------------------------------------------------

    /// drop every entry rooted in the subtree of `node`
    ///
    /// when the cached root survives, the node's own parent/index link is put
    /// back so the next query can climb from it without a miss.
    pub fn node_changed(&self, node: &N) {
        let mut maps = self.lock();

        let own_parent = maps.parents.get(node).cloned();
        let own_index = maps.indexes.get(node).cloned();

        // fixpoint: anything whose cached parent is affected is affected
        let mut affected: HashSet<N> = HashSet::new();
        affected.insert(node.clone());
        loop {
            let mut grew = false;
            for (child, entry) in maps.parents.iter() {
                if let Some(parent) = &entry.value {
                    if affected.contains(parent) && !affected.contains(child) {
                        affected.insert(child.clone());
                        grew = true;
                    }
                }
            }
            for ((parent, _), entry) in maps.children.iter() {
                if let Some(child) = &entry.value {
                    if affected.contains(parent) && !affected.contains(child) {
                        affected.insert(child.clone());
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
        }

        maps.parents.retain(|n, _| !affected.contains(n));
        maps.indexes.retain(|n, _| !affected.contains(n));
        maps.counts.retain(|n, _| !affected.contains(n));
        maps.text_bearing.retain(|n, _| !affected.contains(n));
        maps.seen.retain(|n, _| !affected.contains(n));
        maps.children.retain(|(n, _), _| !affected.contains(n));

        let root_affected = maps
            .root
            .as_ref()
            .is_some_and(|e| affected.contains(&e.value));
        if root_affected {
            maps.root = None;
        } else {
            if let Some(parent) = own_parent {
                maps.parents.insert(node.clone(), parent);
            }
            if let Some(index) = own_index {
                maps.indexes.insert(node.clone(), index);
            }
        }

        debug!(affected = affected.len(), root_affected, "node cache invalidated subtree");

        if !maps.is_consistent() {
            warn!("node cache inconsistent after invalidation, discarding");
            maps.clear_entries();
        }
    }

    /// wholesale clear, e.g. on foreground app change
    pub fn clear(&self) {
        self.lock().clear_entries();
    }

    pub fn stats(&self) -> CacheStats {
        let maps = self.lock();
        CacheStats {
            hits: maps.hits,
            misses: maps.misses,
            entries: maps.len(),
            clears: maps.clears,
        }
    }
}
