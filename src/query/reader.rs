//! interruptible, cache-aware view over a tree source

use tracing::debug;

use super::{Interrupt, Interrupted, Limits};
use crate::tree::cache::NodeCache;
use crate::tree::{Attr, AttrValue, ReadError, TreeSource};

/// reads against a tree, one evaluation's worth
///
/// every method checks the interrupt token before touching the source. read
/// failures are logged and surface as empty results.
pub struct Reader<'a, T: TreeSource> {
    tree: &'a T,
    cache: Option<&'a NodeCache<T::Node>>,
    interrupt: Interrupt<'a>,
    now: i64,
    limits: Limits,
}

fn swallow<V: Default>(what: &str, result: Result<V, ReadError>) -> V {
    match result {
        Ok(v) => v,
        Err(e) => {
            debug!(read = what, error = %e, "tree read failed");
            V::default()
        }
    }
}

impl<'a, T: TreeSource> Reader<'a, T> {
    pub fn new(
        tree: &'a T,
        cache: Option<&'a NodeCache<T::Node>>,
        interrupt: Interrupt<'a>,
        now: i64,
        limits: Limits,
    ) -> Self {
        Self {
            tree,
            cache,
            interrupt,
            now,
            limits,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        self.interrupt.check()
    }

    /// stale handles are revalidated before structural reads; a handle that
    /// no longer resolves reads as gone
    fn fresh(&self, node: &T::Node) -> Result<Option<T::Node>, Interrupted> {
        let Some(cache) = self.cache else {
            return Ok(Some(node.clone()));
        };
        if !cache.is_stale(node, self.now) {
            return Ok(Some(node.clone()));
        }
        self.check()?;
        let refreshed = swallow("refresh", self.tree.refresh(node));
        match &refreshed {
            Some(n) => cache.mark_fresh(n, self.now),
            None => cache.node_changed(node),
        }
        Ok(refreshed)
    }

    pub fn root(&self) -> Result<Option<T::Node>, Interrupted> {
        if let Some(root) = self.cache.and_then(|c| c.root(self.now)) {
            return Ok(Some(root));
        }
        self.check()?;
        let root = swallow("root", self.tree.root());
        if let (Some(cache), Some(root)) = (self.cache, &root) {
            cache.put_root(root, self.now);
        }
        Ok(root)
    }

    pub fn parent(&self, node: &T::Node) -> Result<Option<T::Node>, Interrupted> {
        if let Some(hit) = self.cache.and_then(|c| c.parent(node, self.now)) {
            return Ok(hit);
        }
        let Some(node) = self.fresh(node)? else {
            return Ok(None);
        };
        self.check()?;
        let parent = swallow("parent", self.tree.parent(&node));
        if let Some(cache) = self.cache {
            cache.put_parent(&node, parent.as_ref(), self.now);
        }
        Ok(parent)
    }

    pub fn child_count(&self, node: &T::Node) -> Result<usize, Interrupted> {
        if let Some(hit) = self.cache.and_then(|c| c.child_count(node, self.now)) {
            return Ok(hit);
        }
        let Some(node) = self.fresh(node)? else {
            return Ok(0);
        };
        self.check()?;
        let count = swallow("child_count", self.tree.child_count(&node));
        if let Some(cache) = self.cache {
            cache.put_child_count(&node, count, self.now);
        }
        Ok(count)
    }

    pub fn child(&self, node: &T::Node, index: usize) -> Result<Option<T::Node>, Interrupted> {
        if let Some(hit) = self.cache.and_then(|c| c.child(node, index, self.now)) {
            return Ok(hit);
        }
        let Some(node) = self.fresh(node)? else {
            return Ok(None);
        };
        self.check()?;
        let child = swallow("child", self.tree.child(&node, index));
        if let Some(cache) = self.cache {
            cache.put_child(&node, index, child.as_ref(), self.now);
        }
        Ok(child)
    }

    /// children in order, bounded by `max_children`
    pub fn children(&self, node: &T::Node) -> Result<Vec<T::Node>, Interrupted> {
        let count = self.child_count(node)?.min(self.limits.max_children);
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            if let Some(child) = self.child(node, i)? {
                out.push(child);
            }
        }
        Ok(out)
    }

    /// 0-based position among siblings; `None` for the root or a gone node
    pub fn index_of(&self, node: &T::Node) -> Result<Option<usize>, Interrupted> {
        if let Some(hit) = self.cache.and_then(|c| c.index(node, self.now)) {
            return Ok(Some(hit));
        }
        let Some(parent) = self.parent(node)? else {
            return Ok(None);
        };
        let count = self.child_count(&parent)?.min(self.limits.max_children);
        for i in 0..count {
            if self.child(&parent, i)?.as_ref() == Some(node) {
                if let Some(cache) = self.cache {
                    cache.put_index(node, i, self.now);
                }
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// distance to the root, root is 0
    pub fn depth(&self, node: &T::Node) -> Result<usize, Interrupted> {
        let mut depth = 0;
        let mut cur = node.clone();
        while let Some(parent) = self.parent(&cur)? {
            depth += 1;
            if depth > self.limits.max_descendants {
                break;
            }
            cur = parent;
        }
        Ok(depth)
    }

    /// attributes are never cached: they change without notice
    pub fn attr(&self, node: &T::Node, attr: Attr) -> Result<AttrValue, Interrupted> {
        self.check()?;
        let value = match self.tree.attr(node, attr) {
            Ok(v) => v,
            Err(e) => {
                debug!(attr = %attr, error = %e, "attribute read failed");
                AttrValue::Null
            }
        };
        if attr == Attr::Text {
            if let Some(cache) = self.cache {
                let has_text = value.as_str().is_some_and(|s| !s.is_empty());
                cache.note_text(node, has_text);
            }
        }
        Ok(value)
    }

    pub fn find_by_id(&self, scope: &T::Node, id: &str) -> Result<Vec<T::Node>, Interrupted> {
        self.check()?;
        Ok(swallow("find_by_id", self.tree.find_by_id(scope, id)))
    }

    pub fn find_by_text(&self, scope: &T::Node, text: &str) -> Result<Vec<T::Node>, Interrupted> {
        self.check()?;
        Ok(swallow("find_by_text", self.tree.find_by_text(scope, text)))
    }

    pub fn refresh(&self, node: &T::Node) -> Result<Option<T::Node>, Interrupted> {
        self.check()?;
        let refreshed = swallow("refresh", self.tree.refresh(node));
        if let (Some(cache), Some(n)) = (self.cache, &refreshed) {
            cache.mark_fresh(n, self.now);
        }
        Ok(refreshed)
    }

    /// true when `node` is `ancestor` or lies below it
    pub fn is_within(&self, node: &T::Node, ancestor: &T::Node) -> Result<bool, Interrupted> {
        let mut cur = node.clone();
        let mut steps = 0;
        loop {
            if &cur == ancestor {
                return Ok(true);
            }
            steps += 1;
            if steps > self.limits.max_descendants {
                return Ok(false);
            }
            match self.parent(&cur)? {
                Some(p) => cur = p,
                None => return Ok(false),
            }
        }
    }

    /// climb to the topmost ancestor of `node`
    pub fn root_of(&self, node: &T::Node) -> Result<T::Node, Interrupted> {
        let mut cur = node.clone();
        let mut steps = 0;
        while let Some(parent) = self.parent(&cur)? {
            cur = parent;
            steps += 1;
            if steps > self.limits.max_descendants {
                break;
            }
        }
        Ok(cur)
    }
}
