//! tree adapter: the capability set every external UI tree must provide
//!
//! the live platform tree and the deterministic fixtures used by tests both
//! implement [`TreeSource`]. nodes are opaque handles owned by the source;
//! they may expire or be recycled at any time, so every read is fallible and
//! a failed read is never a logic error.

pub mod cache;
pub mod fixture;

use std::fmt;
use std::hash::Hash;

use thiserror::Error;

use crate::selector::expr::ValueType;

/// node attributes readable through the adapter
///
/// the set is closed: selector identifiers are resolved to these variants
/// once at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    Id,
    /// short id, the part of `id` after `:id/`
    Vid,
    Text,
    Desc,
    /// element kind, usually a class name
    Name,
    Clickable,
    Focusable,
    Checkable,
    Checked,
    Editable,
    LongClickable,
    VisibleToUser,
    Left,
    Top,
    Right,
    Bottom,
    Width,
    Height,
}

impl Attr {
    pub fn all() -> &'static [Attr] {
        &[
            Attr::Id,
            Attr::Vid,
            Attr::Text,
            Attr::Desc,
            Attr::Name,
            Attr::Clickable,
            Attr::Focusable,
            Attr::Checkable,
            Attr::Checked,
            Attr::Editable,
            Attr::LongClickable,
            Attr::VisibleToUser,
            Attr::Left,
            Attr::Top,
            Attr::Right,
            Attr::Bottom,
            Attr::Width,
            Attr::Height,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Attr::Id => "id",
            Attr::Vid => "vid",
            Attr::Text => "text",
            Attr::Desc => "desc",
            Attr::Name => "name",
            Attr::Clickable => "clickable",
            Attr::Focusable => "focusable",
            Attr::Checkable => "checkable",
            Attr::Checked => "checked",
            Attr::Editable => "editable",
            Attr::LongClickable => "longClickable",
            Attr::VisibleToUser => "visibleToUser",
            Attr::Left => "left",
            Attr::Top => "top",
            Attr::Right => "right",
            Attr::Bottom => "bottom",
            Attr::Width => "width",
            Attr::Height => "height",
        }
    }

    pub fn parse(s: &str) -> Option<Attr> {
        Attr::all().iter().copied().find(|a| a.name() == s)
    }

    /// declared type of the attribute value
    pub fn value_type(&self) -> ValueType {
        match self {
            Attr::Id | Attr::Vid | Attr::Text | Attr::Desc | Attr::Name => ValueType::Text,
            Attr::Clickable
            | Attr::Focusable
            | Attr::Checkable
            | Attr::Checked
            | Attr::Editable
            | Attr::LongClickable
            | Attr::VisibleToUser => ValueType::Bool,
            Attr::Left
            | Attr::Top
            | Attr::Right
            | Attr::Bottom
            | Attr::Width
            | Attr::Height => ValueType::Int,
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// attribute value as read from the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// a read against the external tree failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("node is no longer available")]
    Vanished,

    #[error("access denied: {0}")]
    Denied(String),

    #[error("tree read failed: {0}")]
    Failed(String),
}

/// read-only capability interface over an externally owned UI tree
pub trait TreeSource: Send + Sync + 'static {
    /// opaque node handle
    type Node: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// root of the active window, if any
    fn root(&self) -> Result<Option<Self::Node>, ReadError>;

    fn parent(&self, node: &Self::Node) -> Result<Option<Self::Node>, ReadError>;

    fn child_count(&self, node: &Self::Node) -> Result<usize, ReadError>;

    /// child at a 0-based index
    fn child(&self, node: &Self::Node, index: usize) -> Result<Option<Self::Node>, ReadError>;

    /// at most `limit` children, in order
    fn children(&self, node: &Self::Node, limit: usize) -> Result<Vec<Self::Node>, ReadError> {
        let count = self.child_count(node)?.min(limit);
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            if let Some(child) = self.child(node, i)? {
                out.push(child);
            }
        }
        Ok(out)
    }

    fn attr(&self, node: &Self::Node, attr: Attr) -> Result<AttrValue, ReadError>;

    /// indexed lookup by id within the subtree of `scope`
    ///
    /// implementations also match the short (vid) form of an id.
    fn find_by_id(&self, scope: &Self::Node, id: &str) -> Result<Vec<Self::Node>, ReadError>;

    /// indexed lookup by visible text within the subtree of `scope`
    ///
    /// may over-approximate (e.g. substring match); callers re-check.
    fn find_by_text(&self, scope: &Self::Node, text: &str)
        -> Result<Vec<Self::Node>, ReadError>;

    /// revalidate a possibly stale handle; `None` if the node is gone
    fn refresh(&self, node: &Self::Node) -> Result<Option<Self::Node>, ReadError> {
        Ok(Some(node.clone()))
    }
}
