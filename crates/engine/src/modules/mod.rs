//! Feature modules that run next to the entity module.
//!
//! Each module receives its own slice of the replay data per turn and may adjust the
//! scene through [`SceneAccess`]. A module that fails or panics is disabled for the
//! rest of the session; the viewer keeps running without it.

mod toggle;

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::context::{CanvasInfo, FrameInfo, PlayerInfo};
use crate::display::DisplayBackend;
use crate::errors::ViewerError;
use crate::scene::{Entity, EntityId, EntityModule, TurnRef};

pub use toggle::{ToggleModule, TOGGLE_MODULE_NAME};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ModuleFailure {
    pub message: String,
}

impl ModuleFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ModuleFailure {
    fn from(error: serde_json::Error) -> Self {
        Self::new(format!("invalid module data: {error}"))
    }
}

/// What a module may touch while it updates the scene.
pub struct SceneAccess<'a> {
    entities: &'a mut EntityModule,
    backend: &'a mut dyn DisplayBackend,
}

impl<'a> SceneAccess<'a> {
    pub fn new(entities: &'a mut EntityModule, backend: &'a mut dyn DisplayBackend) -> Self {
        Self { entities, backend }
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.entity(id)
    }

    /// Hides or shows an entity regardless of its `visible` property. Takes effect
    /// immediately. Returns `false` for unknown ids.
    pub fn set_hidden(&mut self, id: EntityId, hidden: bool) -> bool {
        if !self.entities.set_hidden(id, hidden) {
            return false;
        }
        self.entities.sync_visibility(id, &mut *self.backend);
        true
    }

    pub fn report(&mut self, error: ViewerError) -> bool {
        self.entities.errors_mut().push(error)
    }
}

pub trait ViewerModule {
    /// Key of this module's data in the replay.
    fn name(&self) -> &str;

    fn handle_global_data(
        &mut self,
        _players: &[PlayerInfo],
        _config: Option<&Value>,
    ) -> Result<(), ModuleFailure> {
        Ok(())
    }

    /// Digests the raw data of one turn. `None` means the module has nothing for it.
    fn handle_frame_data(
        &mut self,
        frame: &FrameInfo,
        raw: Option<&Value>,
    ) -> Result<Option<Value>, ModuleFailure>;

    fn update_scene(
        &mut self,
        previous: &Value,
        current: &Value,
        progress: f64,
        scene: &mut SceneAccess<'_>,
    ) -> Result<(), ModuleFailure>;

    fn reinit_scene(
        &mut self,
        _canvas: &CanvasInfo,
        _scene: &mut SceneAccess<'_>,
    ) -> Result<(), ModuleFailure> {
        Ok(())
    }
}

struct ModuleSlot {
    module: Box<dyn ViewerModule>,
    enabled: bool,
    frames: BTreeMap<u32, Value>,
}

impl ModuleSlot {
    /// Runs `call` with panics contained. Any failure disables the slot.
    fn run<T>(
        &mut self,
        call: impl FnOnce(&mut dyn ViewerModule) -> Result<T, ModuleFailure>,
    ) -> Result<T, ViewerError> {
        let module = self.module.as_mut();
        let outcome = catch_unwind(AssertUnwindSafe(|| call(module)));
        let message = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(failure)) => failure.message,
            Err(payload) => panic_message(payload.as_ref()),
        };
        self.enabled = false;
        let name = self.module.name().to_string();
        error!(module = %name, message = %message, "module_disabled");
        Err(ViewerError::Module {
            module: name,
            message,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "module panicked".to_string()
    }
}

/// Runs registered modules in registration order and isolates their failures.
/// Every method returns the errors of modules that were disabled during the call.
#[derive(Default)]
pub struct ModuleHost {
    slots: Vec<ModuleSlot>,
}

impl ModuleHost {
    pub fn register(&mut self, module: Box<dyn ViewerModule>) {
        debug!(module = module.name(), "module_registered");
        self.slots.push(ModuleSlot {
            module,
            enabled: true,
            frames: BTreeMap::new(),
        });
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.slots
            .iter()
            .find(|slot| slot.module.name() == name)
            .map(|slot| slot.enabled)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.module.name())
    }

    pub fn handle_global_data(
        &mut self,
        players: &[PlayerInfo],
        configs: &BTreeMap<String, Value>,
    ) -> Vec<ViewerError> {
        self.enabled_slots()
            .filter_map(|slot| {
                let config = configs.get(slot.module.name());
                slot.run(|module| module.handle_global_data(players, config))
                    .err()
            })
            .collect()
    }

    pub fn handle_frame_data(
        &mut self,
        frame: &FrameInfo,
        raw: &BTreeMap<String, Value>,
    ) -> Vec<ViewerError> {
        self.enabled_slots()
            .filter_map(|slot| {
                let data = raw.get(slot.module.name());
                match slot.run(|module| module.handle_frame_data(frame, data)) {
                    Ok(Some(derived)) => {
                        slot.frames.insert(frame.number, derived);
                        None
                    }
                    Ok(None) => None,
                    Err(error) => Some(error),
                }
            })
            .collect()
    }

    /// Updates every module that has data for `turn`.
    pub fn update_scene(
        &mut self,
        turn: TurnRef,
        progress: f64,
        scene: &mut SceneAccess<'_>,
    ) -> Vec<ViewerError> {
        self.enabled_slots()
            .filter_map(|slot| {
                let current = slot.frames.get(&turn.number)?.clone();
                let previous = turn
                    .previous
                    .and_then(|previous| slot.frames.get(&previous))
                    .cloned()
                    .unwrap_or(Value::Null);
                slot.run(|module| module.update_scene(&previous, &current, progress, scene))
                    .err()
            })
            .collect()
    }

    pub fn reinit_scene(
        &mut self,
        canvas: &CanvasInfo,
        scene: &mut SceneAccess<'_>,
    ) -> Vec<ViewerError> {
        self.enabled_slots()
            .filter_map(|slot| slot.run(|module| module.reinit_scene(canvas, scene)).err())
            .collect()
    }

    fn enabled_slots(&mut self) -> impl Iterator<Item = &mut ModuleSlot> {
        self.slots.iter_mut().filter(|slot| slot.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCatalog;
    use crate::display::RecordingBackend;

    struct Flaky {
        panic_on_update: bool,
    }

    impl ViewerModule for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn handle_frame_data(
            &mut self,
            frame: &FrameInfo,
            raw: Option<&Value>,
        ) -> Result<Option<Value>, ModuleFailure> {
            match raw {
                Some(Value::String(text)) if text == "bad" => Err(ModuleFailure::new("bad frame")),
                Some(value) => Ok(Some(value.clone())),
                None => Ok((frame.number == 0).then(|| Value::Bool(true))),
            }
        }

        fn update_scene(
            &mut self,
            _previous: &Value,
            _current: &Value,
            _progress: f64,
            _scene: &mut SceneAccess<'_>,
        ) -> Result<(), ModuleFailure> {
            if self.panic_on_update {
                panic!("boom");
            }
            Ok(())
        }
    }

    fn frame(number: u32) -> FrameInfo {
        FrameInfo {
            number,
            date_ms: 0.0,
            frame_duration_ms: 1000.0,
        }
    }

    fn turn(number: u32) -> TurnRef {
        TurnRef {
            number,
            previous: number.checked_sub(1),
        }
    }

    #[test]
    fn failing_frame_data_disables_the_module() {
        let mut host = ModuleHost::default();
        host.register(Box::new(Flaky {
            panic_on_update: false,
        }));
        let mut raw = BTreeMap::new();
        raw.insert("flaky".to_string(), Value::String("bad".to_string()));

        let errors = host.handle_frame_data(&frame(0), &raw);
        assert_eq!(
            errors,
            vec![ViewerError::Module {
                module: "flaky".to_string(),
                message: "bad frame".to_string()
            }]
        );
        assert_eq!(host.is_enabled("flaky"), Some(false));
        assert!(host.handle_frame_data(&frame(1), &raw).is_empty());
    }

    #[test]
    fn panicking_update_is_contained() {
        let mut host = ModuleHost::default();
        host.register(Box::new(Flaky {
            panic_on_update: true,
        }));
        host.handle_frame_data(&frame(0), &BTreeMap::new());

        let mut entities = EntityModule::new(AssetCatalog::default());
        let mut backend = RecordingBackend::default();
        let mut scene = SceneAccess::new(&mut entities, &mut backend);
        let errors = host.update_scene(turn(0), 1.0, &mut scene);

        assert_eq!(
            errors,
            vec![ViewerError::Module {
                module: "flaky".to_string(),
                message: "boom".to_string()
            }]
        );
        assert_eq!(host.is_enabled("flaky"), Some(false));
        assert!(host.update_scene(turn(0), 1.0, &mut scene).is_empty());
    }

    #[test]
    fn modules_without_data_for_a_turn_are_not_updated() {
        let mut host = ModuleHost::default();
        host.register(Box::new(Flaky {
            panic_on_update: true,
        }));
        host.handle_frame_data(&frame(0), &BTreeMap::new());
        host.handle_frame_data(&frame(1), &BTreeMap::new());

        let mut entities = EntityModule::new(AssetCatalog::default());
        let mut backend = RecordingBackend::default();
        let mut scene = SceneAccess::new(&mut entities, &mut backend);

        assert!(host.update_scene(turn(1), 1.0, &mut scene).is_empty());
        assert_eq!(host.is_enabled("flaky"), Some(true));
    }
}
