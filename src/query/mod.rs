//! query engine: runs compiled selectors against a [`TreeSource`]
//!
//! matching is depth-first with backtracking. every external read goes
//! through a [`Reader`], which checks the interrupt token first, consults
//! the node cache when the selector allows it, and turns read failures into
//! empty results (logged, never propagated).

mod engine;
pub mod eval;
pub mod reader;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::selector::Selector;
use crate::tree::cache::NodeCache;
use crate::tree::TreeSource;

pub use eval::{MatchContext, Value};
pub use reader::Reader;

/// evaluation was superseded by a newer event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("evaluation interrupted by a newer event")]
pub struct Interrupted;

/// cooperative cancellation token
///
/// captures the counter value at creation; any later bump aborts the
/// evaluation at its next read unless the evaluation is privileged.
#[derive(Debug, Clone, Copy)]
pub struct Interrupt<'a> {
    counter: Option<&'a AtomicU64>,
    epoch: u64,
    privileged: bool,
}

impl<'a> Interrupt<'a> {
    /// never fires
    pub fn none() -> Self {
        Self {
            counter: None,
            epoch: 0,
            privileged: false,
        }
    }

    pub fn new(counter: &'a AtomicU64, privileged: bool) -> Self {
        Self {
            counter: Some(counter),
            epoch: counter.load(Ordering::Acquire),
            privileged,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        match self.counter {
            Some(counter) if !self.privileged && counter.load(Ordering::Acquire) != self.epoch => {
                Err(Interrupted)
            }
            _ => Ok(()),
        }
    }
}

/// bounds on candidate enumeration for pathological trees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_children: usize,
    pub max_descendants: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_children: 512,
            max_descendants: 5000,
        }
    }
}

/// opt-in indexed fast paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub quick_find: bool,
    pub fast_query: bool,
}

/// tree + cache + limits, shared by every query of one lane
pub struct QueryEngine<'a, T: TreeSource> {
    tree: &'a T,
    cache: Option<&'a NodeCache<T::Node>>,
    limits: Limits,
}

impl<'a, T: TreeSource> QueryEngine<'a, T> {
    pub fn new(tree: &'a T, cache: Option<&'a NodeCache<T::Node>>, limits: Limits) -> Self {
        Self {
            tree,
            cache,
            limits,
        }
    }

    pub fn tree(&self) -> &'a T {
        self.tree
    }

    /// a reader that consults the cache only when the selector allows it
    pub fn reader(&self, use_cache: bool, interrupt: Interrupt<'a>, now: i64) -> Reader<'a, T> {
        let cache = if use_cache { self.cache } else { None };
        Reader::new(self.tree, cache, interrupt, now, self.limits)
    }

    /// match `selector` starting at `start` (or the tree root when `None`)
    /// and return the target segment's node
    pub fn query(
        &self,
        selector: &Selector,
        start: Option<&T::Node>,
        options: MatchOptions,
        interrupt: Interrupt<'a>,
        now: i64,
    ) -> Result<Option<T::Node>, Interrupted> {
        let reader = self.reader(selector.use_cache, interrupt, now);
        engine::Matcher::new(&reader, selector).run(start, options)
    }

    /// every matched segment's node, in segment order
    pub fn query_chain(
        &self,
        selector: &Selector,
        start: Option<&T::Node>,
        options: MatchOptions,
        interrupt: Interrupt<'a>,
        now: i64,
    ) -> Result<Option<Vec<T::Node>>, Interrupted> {
        let reader = self.reader(selector.use_cache, interrupt, now);
        engine::Matcher::new(&reader, selector).run_chain(start, options)
    }
}
