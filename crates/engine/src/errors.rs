use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::scene::EntityId;

/// Recoverable problems found while parsing or rendering a replay. The viewer keeps
/// going after any of these; they are collected in an [`ErrorLog`].
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewerError {
    #[error("missing image '{name}'")]
    MissingImage { name: String },
    #[error("missing bitmap font '{font}'")]
    MissingBitmapFont { font: String },
    #[error("invalid player color token: no player at index {index}")]
    InvalidPlayerColorToken { index: i64 },
    #[error("entity {entity} received two sub-states at t={t} during turn {turn}")]
    DuplicateSubState { entity: EntityId, t: f64, turn: u32 },
    #[error("toggle '{name}' is not defined")]
    MissingToggle { name: String },
    #[error("failed to load asset '{asset}': {reason}")]
    AssetLoad { asset: String, reason: String },
    #[error("module '{module}' failed: {message}")]
    Module { module: String, message: String },
}

type Listener = Box<dyn FnMut(&ViewerError)>;

#[derive(Default)]
pub struct ErrorLog {
    entries: Vec<ViewerError>,
    listeners: Vec<Listener>,
}

impl ErrorLog {
    /// Records `error` unless an identical entry already exists.
    /// Returns whether the entry was new.
    pub fn push(&mut self, error: ViewerError) -> bool {
        if self.entries.contains(&error) {
            return false;
        }
        warn!(error = %error, "viewer_error_reported");
        for listener in &mut self.listeners {
            listener(&error);
        }
        self.entries.push(error);
        true
    }

    pub fn listen(&mut self, listener: impl FnMut(&ViewerError) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn entries(&self) -> &[ViewerError] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorLog")
            .field("entries", &self.entries)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
