use std::ffi::OsString;
use std::path::PathBuf;

use replay_engine::CanvasInfo;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SAMPLES_PER_TURN_ENV_VAR: &str = "REPLAY_SAMPLES_PER_TURN";
pub(crate) const DEFAULT_SAMPLES_PER_TURN: u32 = 4;
const USAGE: &str = "usage: replay_player <replay.json>";

pub(crate) struct PlayerWiring {
    pub(crate) replay_path: PathBuf,
    pub(crate) samples_per_turn: u32,
    pub(crate) canvas: CanvasInfo,
}

pub(crate) fn build_app(args: impl IntoIterator<Item = OsString>) -> Option<PlayerWiring> {
    init_tracing();
    info!("=== Replay Player Startup ===");

    let Some(replay_path) = replay_path_from_args(args) else {
        error!(usage = USAGE, "missing_replay_path");
        return None;
    };
    let samples_per_turn =
        parse_samples_per_turn(std::env::var(SAMPLES_PER_TURN_ENV_VAR).ok().as_deref());
    info!(
        replay = %replay_path.display(),
        samples_per_turn,
        "player_configured"
    );

    Some(PlayerWiring {
        replay_path,
        samples_per_turn,
        canvas: CanvasInfo::new(1920.0, 1080.0),
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub(crate) fn replay_path_from_args(args: impl IntoIterator<Item = OsString>) -> Option<PathBuf> {
    args.into_iter()
        .find(|arg| !arg.is_empty())
        .map(PathBuf::from)
}

/// Render ticks per turn; the last one lands on progress 1. Invalid or zero values
/// fall back to the default.
pub(crate) fn parse_samples_per_turn(raw: Option<&str>) -> u32 {
    raw.map(str::trim)
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|samples| *samples > 0)
        .unwrap_or(DEFAULT_SAMPLES_PER_TURN)
}
