use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod assets;
pub mod command;
pub mod context;
pub mod display;
pub mod errors;
pub mod modules;
pub mod properties;
pub mod replay;
pub mod scene;

pub use assets::{AssetCatalog, AssetError, Region, SpritesheetRequest, Texture};
pub use command::{parse_script, Command, ParseError, PropertyUpdate};
pub use context::{CanvasInfo, FrameInfo, GlobalConfig, PlayerInfo, SharedContext};
pub use display::{
    DisplayBackend, DisplayNode, DisplayTransform, DisplayUpdate, RecordingBackend, Visual,
};
pub use errors::{ErrorLog, ViewerError};
pub use modules::{ModuleFailure, ModuleHost, SceneAccess, ToggleModule, ViewerModule};
pub use properties::{describe, Curve, PropertyDescriptor, PropertyKind, PropertyMap, PropertyValue};
pub use replay::{FrameRecord, Replay, ViewerConfig, DEFAULT_FRAME_DURATION_MS};
pub use scene::{
    DisplayTree, Entity, EntityId, EntityKind, EntityModule, FrameError, RenderOutcome, SubState,
    TurnRef,
};

pub const ASSET_ROOT_ENV_VAR: &str = "REPLAY_ASSET_ROOT";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error(
        "REPLAY_ASSET_ROOT is set but does not point to a directory: {path}\n\
Unset it to load assets next to the replay file."
    )]
    InvalidEnvRoot { path: PathBuf },
    #[error("asset root is not a directory: {path}")]
    InvalidAssetRoot { path: PathBuf },
}

/// Directory image paths are resolved against. `REPLAY_ASSET_ROOT` wins over `fallback`.
pub fn resolve_asset_root(fallback: &Path) -> Result<PathBuf, StartupError> {
    match env::var(ASSET_ROOT_ENV_VAR) {
        Ok(value) => {
            let root = normalize_path(Path::new(&value));
            if root.is_dir() {
                Ok(root)
            } else {
                Err(StartupError::InvalidEnvRoot { path: root })
            }
        }
        Err(env::VarError::NotPresent) => {
            let root = normalize_path(fallback);
            if root.is_dir() {
                Ok(root)
            } else {
                Err(StartupError::InvalidAssetRoot { path: root })
            }
        }
        Err(source) => Err(StartupError::EnvVar {
            var: ASSET_ROOT_ENV_VAR,
            source,
        }),
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
