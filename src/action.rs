//! action descriptors and the executor seam
//!
//! the engine never touches the UI itself; a matched rule hands its node and
//! [`Action`] to an [`ActionExecutor`], which performs it on the live tree.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// what to do with a matched node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    #[default]
    Click,
    LongClick,
    SetText {
        text: String,
    },
    /// tap at a position relative to the node's top-left corner
    ClickPosition {
        x: i64,
        y: i64,
    },
    /// match only; count the trigger without touching the UI
    None,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Click => write!(f, "click"),
            Action::LongClick => write!(f, "longClick"),
            Action::SetText { text } => write!(f, "setText({:?})", text),
            Action::ClickPosition { x, y } => write!(f, "clickPosition({}, {})", x, y),
            Action::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("target node is gone")]
    NodeGone,

    #[error("action not supported by this node: {0}")]
    Unsupported(String),

    #[error("action failed: {0}")]
    Failed(String),
}

/// performs actions on the live tree
pub trait ActionExecutor<N>: Send + Sync + 'static {
    fn perform(&self, node: &N, action: &Action) -> Result<(), ActionError>;
}

/// records every action instead of performing it
#[derive(Debug)]
pub struct RecordingExecutor<N> {
    performed: Mutex<Vec<(N, Action)>>,
    fail: AtomicBool,
}

impl<N> Default for RecordingExecutor<N> {
    fn default() -> Self {
        Self {
            performed: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

impl<N: Clone> RecordingExecutor<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every following action fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn performed(&self) -> Vec<(N, Action)> {
        self.performed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.performed().len()
    }
}

impl<N> ActionExecutor<N> for RecordingExecutor<N>
where
    N: Clone + Send + Sync + 'static,
{
    fn perform(&self, node: &N, action: &Action) -> Result<(), ActionError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(ActionError::Failed("executor set to fail".to_string()));
        }
        let mut performed = self.performed.lock().unwrap_or_else(|e| e.into_inner());
        performed.push((node.clone(), action.clone()));
        Ok(())
    }
}
