//! A replay session: the entity module, the feature modules and the turn clock.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::assets::AssetCatalog;
use crate::context::{CanvasInfo, FrameInfo, GlobalConfig, PlayerInfo};
use crate::display::DisplayBackend;
use crate::errors::{ErrorLog, ViewerError};
use crate::modules::{ModuleHost, SceneAccess, ViewerModule};
use crate::scene::{EntityModule, FrameError, RenderOutcome, TurnRef};

pub const DEFAULT_FRAME_DURATION_MS: f64 = 1000.0;

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub world: GlobalConfig,
    pub default_frame_duration_ms: f64,
    pub asset_root: PathBuf,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            world: GlobalConfig::default(),
            default_frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            asset_root: PathBuf::from("."),
        }
    }
}

/// One turn of replay data as the game produced it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameRecord {
    /// Milliseconds; the configured default applies when absent.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub entitymodule: Option<String>,
    /// Data for feature modules, keyed by module name.
    #[serde(default)]
    pub modules: BTreeMap<String, Value>,
}

pub struct Replay {
    config: ViewerConfig,
    entities: EntityModule,
    modules: ModuleHost,
    next_turn: u32,
    next_date_ms: f64,
    failed_turn: Option<u32>,
}

impl Replay {
    pub fn new(config: ViewerConfig) -> Self {
        let catalog = AssetCatalog::new(config.asset_root.clone());
        Self {
            config,
            entities: EntityModule::new(catalog),
            modules: ModuleHost::default(),
            next_turn: 0,
            next_date_ms: 0.0,
            failed_turn: None,
        }
    }

    pub fn register_module(&mut self, module: Box<dyn ViewerModule>) {
        self.modules.register(module);
    }

    pub fn handle_global_data(
        &mut self,
        players: Vec<PlayerInfo>,
        module_configs: &BTreeMap<String, Value>,
    ) {
        let errors = self.modules.handle_global_data(&players, module_configs);
        self.entities.handle_global_data(players, &self.config.world);
        self.report_all(errors);
    }

    /// Applies the next turn. Turns are numbered from 0 in the order they are pushed.
    ///
    /// A turn that fails to apply may leave part of its commands in the scene, so every
    /// later push is refused with [`FrameError::Halted`]. Turns pushed before the failure
    /// can still be rendered.
    pub fn push_frame(&mut self, record: FrameRecord) -> Result<TurnRef, FrameError> {
        if let Some(failed) = self.failed_turn {
            return Err(FrameError::Halted { failed });
        }
        let duration = record
            .duration
            .filter(|duration| duration.is_finite() && *duration >= 0.0)
            .unwrap_or(self.config.default_frame_duration_ms);
        let info = FrameInfo {
            number: self.next_turn,
            date_ms: self.next_date_ms,
            frame_duration_ms: duration,
        };

        let turn = match self
            .entities
            .handle_frame_data(info, record.entitymodule.as_deref())
        {
            Ok(turn) => turn,
            Err(err) => {
                warn!(turn = info.number, error = %err, "replay_halted");
                self.failed_turn = Some(info.number);
                return Err(err);
            }
        };
        let errors = self.modules.handle_frame_data(&info, &record.modules);
        self.report_all(errors);

        self.next_turn += 1;
        self.next_date_ms += duration;
        debug!(turn = turn.number, date_ms = info.date_ms, "replay_frame_pushed");
        Ok(turn)
    }

    pub fn reinit_scene(&mut self, canvas: &CanvasInfo, backend: &mut dyn DisplayBackend) {
        self.entities.reinit_scene(canvas, backend);
        let mut scene = SceneAccess::new(&mut self.entities, backend);
        let errors = self.modules.reinit_scene(canvas, &mut scene);
        self.report_all(errors);
        info!(
            width = canvas.width,
            height = canvas.height,
            "replay_scene_reinit"
        );
    }

    /// Renders `turn` at `progress`, then lets the feature modules adjust the scene.
    pub fn render(
        &mut self,
        turn: u32,
        progress: f64,
        backend: &mut dyn DisplayBackend,
    ) -> Result<RenderOutcome, FrameError> {
        let outcome = self.entities.update_scene(turn, progress, backend)?;
        if let RenderOutcome::StillLoading { .. } = outcome {
            return Ok(outcome);
        }
        let turn_ref = self
            .entities
            .turns()
            .find(|candidate| candidate.number == turn)
            .ok_or(FrameError::UnknownTurn { turn })?;
        let mut scene = SceneAccess::new(&mut self.entities, backend);
        let errors = self.modules.update_scene(turn_ref, progress, &mut scene);
        self.report_all(errors);
        Ok(outcome)
    }

    fn report_all(&mut self, errors: Vec<ViewerError>) {
        for error in errors {
            self.entities.errors_mut().push(error);
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn turn_count(&self) -> u32 {
        self.next_turn
    }

    /// Total length of the pushed turns, in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.next_date_ms
    }

    pub fn entities(&self) -> &EntityModule {
        &self.entities
    }

    pub fn catalog_mut(&mut self) -> &mut AssetCatalog {
        self.entities.catalog_mut()
    }

    pub fn modules(&self) -> &ModuleHost {
        &self.modules
    }

    pub fn errors(&self) -> &ErrorLog {
        self.entities.errors()
    }

    pub fn errors_mut(&mut self) -> &mut ErrorLog {
        self.entities.errors_mut()
    }
}
