use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use replay_engine::{
    resolve_asset_root, AssetCatalog, AssetError, FrameRecord, GlobalConfig, PlayerInfo,
    StartupError,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// A recorded game, as written by the game server.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ReplayFile {
    #[serde(default)]
    pub(crate) players: Vec<PlayerInfo>,
    #[serde(default)]
    pub(crate) world: Option<GlobalConfig>,
    #[serde(default)]
    pub(crate) assets: AssetManifest,
    /// Global configuration per feature module.
    #[serde(default)]
    pub(crate) modules: BTreeMap<String, Value>,
    pub(crate) frames: Vec<FrameRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AssetManifest {
    /// Image name to path relative to the asset root.
    #[serde(default)]
    pub(crate) images: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) fonts: Vec<String>,
}

#[derive(Debug, Error)]
pub(crate) enum ReplayLoadError {
    #[error("failed to read replay '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse replay json at {at}: {source}")]
    Parse {
        at: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("image '{name}' has an invalid path: {source}")]
    ImagePath {
        name: String,
        #[source]
        source: AssetError,
    },
    #[error(transparent)]
    Startup(#[from] StartupError),
}

pub(crate) fn load_replay_file(path: &Path) -> Result<ReplayFile, ReplayLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| ReplayLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let replay = parse_replay_json(&raw)?;
    info!(
        path = %path.display(),
        frame_count = replay.frames.len(),
        player_count = replay.players.len(),
        "replay_file_loaded"
    );
    Ok(replay)
}

pub(crate) fn parse_replay_json(raw: &str) -> Result<ReplayFile, ReplayLoadError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, ReplayFile>(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        let at = if path.is_empty() || path == "." {
            "top level".to_string()
        } else {
            path
        };
        ReplayLoadError::Parse {
            at,
            source: error.into_inner(),
        }
    })
}

/// Assets load next to the replay file unless `REPLAY_ASSET_ROOT` says otherwise.
pub(crate) fn asset_root_for(replay_path: &Path) -> Result<PathBuf, ReplayLoadError> {
    let fallback = match replay_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(resolve_asset_root(&fallback)?)
}

pub(crate) fn register_assets(
    manifest: &AssetManifest,
    catalog: &mut AssetCatalog,
) -> Result<(), ReplayLoadError> {
    for (name, relative) in &manifest.images {
        catalog
            .register_image_file(name, relative)
            .map_err(|source| ReplayLoadError::ImagePath {
                name: name.clone(),
                source,
            })?;
    }
    for font in &manifest.fonts {
        catalog.register_font(font);
    }
    Ok(())
}

impl ReplayFile {
    pub(crate) fn world(&self) -> GlobalConfig {
        self.world.unwrap_or_default()
    }
}
