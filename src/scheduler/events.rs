//! tree-change notifications and batch coalescing
//!
//! the event lane drains whatever queued up since the last batch and folds
//! it into one [`Batch`]. a homogeneous burst (same kind, app and page)
//! keeps its latest nodes as starting points; a mixed burst trusts none of
//! them and evaluates from the root.

use std::fmt;

use serde::Serialize;

// ============================================================================
// Event Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// a new window or page came to the foreground
    WindowStateChanged,
    /// something changed inside the current window
    ContentChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WindowStateChanged => "window_state_changed",
            EventKind::ContentChanged => "content_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// one raw notification from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEvent<N> {
    pub kind: EventKind,
    pub app: Option<String>,
    pub activity: Option<String>,
    /// the node the change originated at, if the platform reported one
    pub node: Option<N>,
}

impl<N> TreeEvent<N> {
    pub fn window_changed(app: &str, activity: Option<&str>) -> Self {
        Self {
            kind: EventKind::WindowStateChanged,
            app: Some(app.to_string()),
            activity: activity.map(str::to_string),
            node: None,
        }
    }

    pub fn content_changed(app: &str, node: Option<N>) -> Self {
        Self {
            kind: EventKind::ContentChanged,
            app: Some(app.to_string()),
            activity: None,
            node,
        }
    }

    fn same_source(&self, other: &TreeEvent<N>) -> bool {
        self.kind == other.kind && self.app == other.app && self.activity == other.activity
    }
}

// ============================================================================
// Coalescing
// ============================================================================

/// the unit of work handed to the query lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<N> {
    pub app: Option<String>,
    /// the page the batch reports, when any of its events named one
    pub activity: Option<String>,
    /// starting points, most recent first; empty means "from the root"
    pub starts: Vec<N>,
    /// every reported node, for cache invalidation
    pub changed: Vec<N>,
    pub events: usize,
}

/// fold a drained burst into one batch; `None` for an empty burst
pub fn coalesce<N: Clone + PartialEq>(events: Vec<TreeEvent<N>>, reuse: usize) -> Option<Batch<N>> {
    let last = events.last()?;
    let homogeneous = events.iter().all(|e| e.same_source(last));

    let app = last.app.clone();
    let activity = events.iter().rev().find_map(|e| e.activity.clone());

    let mut changed: Vec<N> = Vec::new();
    for node in events.iter().filter_map(|e| e.node.as_ref()) {
        if !changed.contains(node) {
            changed.push(node.clone());
        }
    }

    let mut starts: Vec<N> = Vec::new();
    if homogeneous {
        for node in events.iter().rev().filter_map(|e| e.node.as_ref()) {
            if starts.len() == reuse {
                break;
            }
            if !starts.contains(node) {
                starts.push(node.clone());
            }
        }
    }

    Some(Batch {
        app,
        activity,
        starts,
        changed,
        events: events.len(),
    })
}
