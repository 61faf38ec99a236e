//! deterministic in-memory tree used by tests and the CLI
//!
//! built from a JSON node description. nodes live in a generational arena,
//! so a handle to a removed node reads as [`ReadError::Vanished`] and never
//! aliases a newer node that reused its slot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Attr, AttrValue, ReadError, TreeSource};

/// serialized form of one node and its subtree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub focusable: bool,
    #[serde(default)]
    pub checkable: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub long_clickable: bool,
    #[serde(default = "default_visible")]
    pub visible_to_user: bool,
    /// `[left, top, right, bottom]`
    #[serde(default)]
    pub bounds: [i64; 4],
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

fn default_visible() -> bool {
    true
}

/// handle into a [`FixtureTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixtureNode {
    slot: usize,
    generation: u32,
}

#[derive(Debug)]
struct NodeData {
    spec: NodeSpec,
    parent: Option<usize>,
    children: Vec<usize>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: Option<usize>,
}

impl Arena {
    fn alloc(&mut self, mut spec: NodeSpec, parent: Option<usize>) -> usize {
        let children = std::mem::take(&mut spec.children);
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot].generation += 1;
                slot
            }
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        self.slots[slot].data = Some(NodeData {
            spec,
            parent,
            children: Vec::new(),
        });

        let ids: Vec<usize> = children
            .into_iter()
            .map(|child| self.alloc(child, Some(slot)))
            .collect();
        if let Some(data) = self.slots[slot].data.as_mut() {
            data.children = ids;
        }
        slot
    }

    fn release(&mut self, slot: usize) {
        let children = match self.slots[slot].data.take() {
            Some(data) => data.children,
            None => return,
        };
        self.free.push(slot);
        for child in children {
            self.release(child);
        }
    }

    fn handle(&self, slot: usize) -> FixtureNode {
        FixtureNode {
            slot,
            generation: self.slots[slot].generation,
        }
    }

    fn get(&self, node: &FixtureNode) -> Result<&NodeData, ReadError> {
        self.slots
            .get(node.slot)
            .filter(|s| s.generation == node.generation)
            .and_then(|s| s.data.as_ref())
            .ok_or(ReadError::Vanished)
    }

    fn get_mut(&mut self, node: &FixtureNode) -> Result<&mut NodeData, ReadError> {
        self.slots
            .get_mut(node.slot)
            .filter(|s| s.generation == node.generation)
            .and_then(|s| s.data.as_mut())
            .ok_or(ReadError::Vanished)
    }

    fn data(&self, slot: usize) -> Option<&NodeData> {
        self.slots.get(slot).and_then(|s| s.data.as_ref())
    }

    /// pre-order walk of the subtree at `slot`, including it
    fn subtree(&self, slot: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![slot];
        while let Some(s) = stack.pop() {
            if let Some(data) = self.data(s) {
                out.push(s);
                stack.extend(data.children.iter().rev());
            }
        }
        out
    }
}

/// short id: the part of an id after `:id/`
pub fn short_id(id: &str) -> &str {
    id.rsplit_once(":id/").map(|(_, short)| short).unwrap_or(id)
}

/// in-memory [`TreeSource`] with interior mutability and a read counter
#[derive(Debug, Default)]
pub struct FixtureTree {
    arena: RwLock<Arena>,
    reads: AtomicUsize,
    read_delay_us: AtomicU64,
}

impl FixtureTree {
    pub fn new(root: NodeSpec) -> Self {
        let mut arena = Arena::default();
        arena.root = Some(arena.alloc(root, None));
        Self {
            arena: RwLock::new(arena),
            reads: AtomicUsize::new(0),
            read_delay_us: AtomicU64::new(0),
        }
    }

    /// a tree with no active window
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_value(value)?))
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|e| e.into_inner())
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let delay = self.read_delay_us.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_micros(delay));
        }
    }

    /// number of adapter reads served so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn reset_reads(&self) {
        self.reads.store(0, Ordering::Relaxed);
    }

    /// slow every read down, to emulate an expensive live tree
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_us
            .store(delay.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn root_node(&self) -> Option<FixtureNode> {
        let arena = self.read();
        arena.root.map(|r| arena.handle(r))
    }

    fn find_first(&self, pred: impl Fn(&NodeSpec) -> bool) -> Option<FixtureNode> {
        let arena = self.read();
        let root = arena.root?;
        arena
            .subtree(root)
            .into_iter()
            .find(|s| arena.data(*s).is_some_and(|d| pred(&d.spec)))
            .map(|s| arena.handle(s))
    }

    /// first node in document order whose id or short id equals `id`
    pub fn node_by_id(&self, id: &str) -> Option<FixtureNode> {
        self.find_first(|spec| {
            spec.id
                .as_deref()
                .is_some_and(|v| v == id || short_id(v) == id)
        })
    }

    /// first node in document order whose text equals `text`
    pub fn node_by_text(&self, text: &str) -> Option<FixtureNode> {
        self.find_first(|spec| spec.text.as_deref() == Some(text))
    }

    /// one-line human description, e.g. `Button#confirm "OK"`
    pub fn describe(&self, node: &FixtureNode) -> String {
        let arena = self.read();
        let Ok(data) = arena.get(node) else {
            return "<vanished>".to_string();
        };
        let spec = &data.spec;
        let mut out = spec
            .name
            .as_deref()
            .map(|n| n.rsplit('.').next().unwrap_or(n).to_string())
            .unwrap_or_else(|| "*".to_string());
        if let Some(id) = &spec.id {
            out.push('#');
            out.push_str(short_id(id));
        }
        if let Some(text) = &spec.text {
            out.push_str(&format!(" {:?}", text));
        }
        out
    }

    // ------------------------------------------------------------------
    // mutation, emulating an external UI changing underneath the engine
    // ------------------------------------------------------------------

    pub fn set_text(&self, node: &FixtureNode, text: Option<&str>) -> Result<(), ReadError> {
        let mut arena = self.write();
        arena.get_mut(node)?.spec.text = text.map(str::to_string);
        Ok(())
    }

    /// remove the child at `index` with its subtree; old handles vanish
    pub fn remove_child(
        &self,
        parent: &FixtureNode,
        index: usize,
    ) -> Result<Option<FixtureNode>, ReadError> {
        let mut arena = self.write();
        let data = arena.get_mut(parent)?;
        if index >= data.children.len() {
            return Ok(None);
        }
        let slot = data.children.remove(index);
        let handle = arena.handle(slot);
        arena.release(slot);
        Ok(Some(handle))
    }

    /// insert a new subtree at `index` (clamped to the child count)
    pub fn insert_child(
        &self,
        parent: &FixtureNode,
        index: usize,
        spec: NodeSpec,
    ) -> Result<FixtureNode, ReadError> {
        let mut arena = self.write();
        arena.get(parent)?;
        let slot = arena.alloc(spec, Some(parent.slot));
        let data = arena.get_mut(parent)?;
        let index = index.min(data.children.len());
        data.children.insert(index, slot);
        Ok(arena.handle(slot))
    }

    pub fn swap_children(&self, parent: &FixtureNode, a: usize, b: usize) -> Result<(), ReadError> {
        let mut arena = self.write();
        let data = arena.get_mut(parent)?;
        if a < data.children.len() && b < data.children.len() {
            data.children.swap(a, b);
        }
        Ok(())
    }

    fn collect_subtree(
        &self,
        scope: &FixtureNode,
        pred: impl Fn(&NodeSpec) -> bool,
    ) -> Result<Vec<FixtureNode>, ReadError> {
        self.count_read();
        let arena = self.read();
        arena.get(scope)?;
        Ok(arena
            .subtree(scope.slot)
            .into_iter()
            .filter(|s| arena.data(*s).is_some_and(|d| pred(&d.spec)))
            .map(|s| arena.handle(s))
            .collect())
    }
}

impl TreeSource for FixtureTree {
    type Node = FixtureNode;

    fn root(&self) -> Result<Option<FixtureNode>, ReadError> {
        self.count_read();
        Ok(self.root_node())
    }

    fn parent(&self, node: &FixtureNode) -> Result<Option<FixtureNode>, ReadError> {
        self.count_read();
        let arena = self.read();
        Ok(arena.get(node)?.parent.map(|p| arena.handle(p)))
    }

    fn child_count(&self, node: &FixtureNode) -> Result<usize, ReadError> {
        self.count_read();
        Ok(self.read().get(node)?.children.len())
    }

    fn child(&self, node: &FixtureNode, index: usize) -> Result<Option<FixtureNode>, ReadError> {
        self.count_read();
        let arena = self.read();
        Ok(arena
            .get(node)?
            .children
            .get(index)
            .map(|c| arena.handle(*c)))
    }

    fn attr(&self, node: &FixtureNode, attr: Attr) -> Result<AttrValue, ReadError> {
        self.count_read();
        let arena = self.read();
        let spec = &arena.get(node)?.spec;
        let text = |v: &Option<String>| match v {
            Some(s) => AttrValue::Text(s.clone()),
            None => AttrValue::Null,
        };
        let [left, top, right, bottom] = spec.bounds;

        Ok(match attr {
            Attr::Id => text(&spec.id),
            Attr::Vid => match &spec.id {
                Some(id) => AttrValue::Text(short_id(id).to_string()),
                None => AttrValue::Null,
            },
            Attr::Text => text(&spec.text),
            Attr::Desc => text(&spec.desc),
            Attr::Name => text(&spec.name),
            Attr::Clickable => AttrValue::Bool(spec.clickable),
            Attr::Focusable => AttrValue::Bool(spec.focusable),
            Attr::Checkable => AttrValue::Bool(spec.checkable),
            Attr::Checked => AttrValue::Bool(spec.checked),
            Attr::Editable => AttrValue::Bool(spec.editable),
            Attr::LongClickable => AttrValue::Bool(spec.long_clickable),
            Attr::VisibleToUser => AttrValue::Bool(spec.visible_to_user),
            Attr::Left => AttrValue::Int(left),
            Attr::Top => AttrValue::Int(top),
            Attr::Right => AttrValue::Int(right),
            Attr::Bottom => AttrValue::Int(bottom),
            Attr::Width => AttrValue::Int(right - left),
            Attr::Height => AttrValue::Int(bottom - top),
        })
    }

    fn find_by_id(&self, scope: &FixtureNode, id: &str) -> Result<Vec<FixtureNode>, ReadError> {
        self.collect_subtree(scope, |spec| {
            spec.id
                .as_deref()
                .is_some_and(|v| v == id || short_id(v) == id)
        })
    }

    fn find_by_text(&self, scope: &FixtureNode, text: &str) -> Result<Vec<FixtureNode>, ReadError> {
        // substring, like platform text lookups
        self.collect_subtree(scope, |spec| {
            spec.text.as_deref().is_some_and(|v| v.contains(text))
        })
    }

    fn refresh(&self, node: &FixtureNode) -> Result<Option<FixtureNode>, ReadError> {
        self.count_read();
        Ok(self.read().get(node).ok().map(|_| *node))
    }
}
