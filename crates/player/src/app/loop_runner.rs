use std::io::{self, Write};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use replay_engine::{
    EntityId, FrameError, RecordingBackend, RenderOutcome, Replay, ToggleModule, ViewerConfig,
    ViewerError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::bootstrap::PlayerWiring;
use super::replay_file::{asset_root_for, load_replay_file, register_assets, ReplayLoadError};

const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(5);
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub(crate) enum PlayerError {
    #[error(transparent)]
    Load(#[from] ReplayLoadError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("assets still loading after {waited:?} on turn {turn}")]
    LoadTimeout { turn: u32, waited: Duration },
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// One rendered tick as printed on stdout.
#[derive(Serialize)]
pub(crate) struct SampleLine<'a> {
    pub(crate) turn: u32,
    pub(crate) progress: f64,
    pub(crate) updated: &'a [EntityId],
    pub(crate) scene: &'a RecordingBackend,
}

#[derive(Serialize)]
struct ErrorLine<'a> {
    error: &'a ViewerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlaybackSummary {
    pub(crate) turns: u32,
    pub(crate) samples: u32,
    pub(crate) errors: usize,
}

pub(crate) fn run(app: PlayerWiring) -> ExitCode {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match play(&app, &mut out) {
        Ok(summary) => {
            info!(
                turns = summary.turns,
                samples = summary.samples,
                errors = summary.errors,
                "replay_finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "replay_failed");
            ExitCode::FAILURE
        }
    }
}

/// Loads the replay, applies every turn and prints sampled display state as JSON lines,
/// followed by one line per reported viewer error.
pub(crate) fn play(app: &PlayerWiring, out: &mut impl Write) -> Result<PlaybackSummary, PlayerError> {
    let file = load_replay_file(&app.replay_path)?;
    let config = ViewerConfig {
        world: file.world(),
        asset_root: asset_root_for(&app.replay_path)?,
        ..ViewerConfig::default()
    };
    let mut replay = Replay::new(config);
    register_assets(&file.assets, replay.catalog_mut())?;
    replay.register_module(Box::new(ToggleModule::default()));
    replay.handle_global_data(file.players.clone(), &file.modules);

    let mut backend = RecordingBackend::default();
    replay.reinit_scene(&app.canvas, &mut backend);

    let samples_per_turn = app.samples_per_turn.max(1);
    let mut samples = 0;
    for record in file.frames {
        let turn = replay.push_frame(record)?;
        for step in 1..=samples_per_turn {
            let progress = f64::from(step) / f64::from(samples_per_turn);
            let updated = render_when_loaded(&mut replay, turn.number, progress, &mut backend)?;
            let line = SampleLine {
                turn: turn.number,
                progress,
                updated: &updated,
                scene: &backend,
            };
            serde_json::to_writer(&mut *out, &line)?;
            writeln!(out)?;
            backend.clear_updates();
            samples += 1;
        }
    }

    for error in replay.errors().entries() {
        serde_json::to_writer(&mut *out, &ErrorLine { error })?;
        writeln!(out)?;
    }
    out.flush()?;

    Ok(PlaybackSummary {
        turns: replay.turn_count(),
        samples,
        errors: replay.errors().len(),
    })
}

/// Renders once no asset load is in flight, polling until the timeout.
fn render_when_loaded(
    replay: &mut Replay,
    turn: u32,
    progress: f64,
    backend: &mut RecordingBackend,
) -> Result<Vec<EntityId>, PlayerError> {
    let started = Instant::now();
    let mut announced = false;
    loop {
        match replay.render(turn, progress, backend)? {
            RenderOutcome::Rendered { updated } => return Ok(updated),
            RenderOutcome::StillLoading { in_flight } => {
                let waited = started.elapsed();
                if waited >= LOAD_TIMEOUT {
                    return Err(PlayerError::LoadTimeout { turn, waited });
                }
                if !announced {
                    warn!(turn, in_flight, "render_waiting_for_assets");
                    announced = true;
                }
                thread::sleep(LOAD_POLL_INTERVAL);
            }
        }
    }
}
