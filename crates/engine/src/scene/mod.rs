mod entity;
mod extrapolation;
mod kinds;
mod module;
mod tree;

use std::fmt;

use serde::Serialize;

pub use entity::{Entity, SubState};
pub use kinds::{EntityKind, KindCapabilities, VisualContext};
pub use module::{EntityModule, FrameError, RenderOutcome, TurnRef};
pub use tree::DisplayTree;

/// Identifier handed out by `C` commands, starting at 1 and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
