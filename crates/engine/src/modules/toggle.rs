use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::{FrameInfo, PlayerInfo};
use crate::errors::ViewerError;
use crate::scene::EntityId;

use super::{ModuleFailure, SceneAccess, ViewerModule};

pub const TOGGLE_MODULE_NAME: &str = "toggles";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Registration {
    name: String,
    state: Value,
}

/// Hides entities whose registered toggle state differs from the viewer's setting.
///
/// Registrations arrive per turn as `{entityId: {name, state}}` and accumulate, a
/// later turn overriding an earlier registration of the same entity.
#[derive(Debug, Default)]
pub struct ToggleModule {
    toggles: BTreeMap<String, Value>,
    registered: BTreeMap<u64, Registration>,
}

impl ToggleModule {
    pub fn new(toggles: BTreeMap<String, Value>) -> Self {
        Self {
            toggles,
            registered: BTreeMap::new(),
        }
    }
}

impl ViewerModule for ToggleModule {
    fn name(&self) -> &str {
        TOGGLE_MODULE_NAME
    }

    fn handle_global_data(
        &mut self,
        _players: &[PlayerInfo],
        config: Option<&Value>,
    ) -> Result<(), ModuleFailure> {
        if let Some(config) = config {
            let configured: BTreeMap<String, Value> = serde_json::from_value(config.clone())?;
            self.toggles.extend(configured);
        }
        Ok(())
    }

    fn handle_frame_data(
        &mut self,
        frame: &FrameInfo,
        raw: Option<&Value>,
    ) -> Result<Option<Value>, ModuleFailure> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let registrations: BTreeMap<u64, Registration> = serde_json::from_value(raw.clone())?;
        debug!(
            turn = frame.number,
            registration_count = registrations.len(),
            "toggle_registrations"
        );
        self.registered.extend(registrations);
        Ok(Some(serde_json::to_value(&self.registered)?))
    }

    fn update_scene(
        &mut self,
        _previous: &Value,
        current: &Value,
        _progress: f64,
        scene: &mut SceneAccess<'_>,
    ) -> Result<(), ModuleFailure> {
        let registered: BTreeMap<u64, Registration> = serde_json::from_value(current.clone())?;
        for (id, registration) in registered {
            let Some(setting) = self.toggles.get(&registration.name) else {
                // Keeps the current hide flag.
                scene.report(ViewerError::MissingToggle {
                    name: registration.name,
                });
                continue;
            };
            scene.set_hidden(EntityId(id), *setting != registration.state);
        }
        Ok(())
    }
}
