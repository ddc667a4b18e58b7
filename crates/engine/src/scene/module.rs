use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;
use tracing::{debug, info};

use crate::assets::{AssetCatalog, LoadHandle, LoadStatus};
use crate::command::{parse_script, Command, ParseError};
use crate::context::{CanvasInfo, FrameInfo, GlobalConfig, PlayerInfo, SharedContext, WORLD_HEIGHT, WORLD_WIDTH};
use crate::display::DisplayBackend;
use crate::errors::ErrorLog;
use crate::properties::{fit_aspect_ratio, number_in, PropertyMap};

use super::entity::{Entity, RenderRequest};
use super::extrapolation::extrapolate;
use super::tree::DisplayTree;
use super::EntityId;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("turn {turn}: {source}")]
    Parse {
        turn: u32,
        #[source]
        source: ParseError,
    },
    #[error("turn {turn}: update for unknown entity {entity}")]
    UnknownEntity { turn: u32, entity: EntityId },
    #[error("turn {turn} arrived after turn {last}")]
    OutOfOrder { turn: u32, last: u32 },
    #[error("turn {turn} has not been received")]
    UnknownTurn { turn: u32 },
    #[error("replay halted after turn {failed} failed to apply")]
    Halted { failed: u32 },
}

/// A turn as linked by the entity module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnRef {
    pub number: u32,
    /// `None` for the first turn.
    pub previous: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct ParsedFrame {
    info: FrameInfo,
    previous: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Asset loads are in flight; nothing was drawn.
    StillLoading { in_flight: usize },
    Rendered { updated: Vec<EntityId> },
}

/// Owns every entity of the replay and turns frame scripts into display updates.
#[derive(Debug, Default)]
pub struct EntityModule {
    entities: BTreeMap<EntityId, Entity>,
    frames: Vec<ParsedFrame>,
    accumulated: HashMap<EntityId, PropertyMap>,
    shared: SharedContext,
    catalog: AssetCatalog,
    pending_loads: Vec<LoadHandle>,
    tree: DisplayTree,
}

impl EntityModule {
    pub fn new(catalog: AssetCatalog) -> Self {
        Self {
            catalog,
            shared: SharedContext {
                must_reset_tree: true,
                ..SharedContext::default()
            },
            ..Self::default()
        }
    }

    pub fn handle_global_data(&mut self, players: Vec<PlayerInfo>, world: &GlobalConfig) {
        self.shared.players = players;
        self.shared.to_world_units =
            fit_aspect_ratio(world.width, world.height, WORLD_WIDTH, WORLD_HEIGHT);
        info!(
            player_count = self.shared.players.len(),
            to_world_units = self.shared.to_world_units,
            "entity_module_global_data"
        );
    }

    /// Parses and applies one turn, then extrapolates every entity through it.
    pub fn handle_frame_data(
        &mut self,
        info: FrameInfo,
        script: Option<&str>,
    ) -> Result<TurnRef, FrameError> {
        let turn = info.number;
        if let Some(last) = self.frames.last() {
            if turn <= last.info.number {
                return Err(FrameError::OutOfOrder {
                    turn,
                    last: last.info.number,
                });
            }
        }

        let commands = match script {
            Some(script) => parse_script(script, &info, &mut self.shared)
                .map_err(|source| FrameError::Parse { turn, source })?,
            None => Vec::new(),
        };
        let command_count = commands.len();
        for command in commands {
            self.apply(command, turn)?;
        }

        let previous = self.frames.last().map(|frame| frame.info.number);
        extrapolate(&mut self.entities, &mut self.accumulated, &info, previous);
        self.frames.push(ParsedFrame { info, previous });

        info!(
            turn,
            command_count,
            entity_count = self.entities.len(),
            loads_in_flight = self.pending_loads.len(),
            "frame_parsed"
        );
        Ok(TurnRef {
            number: turn,
            previous,
        })
    }

    fn apply(&mut self, command: Command, turn: u32) -> Result<(), FrameError> {
        match command {
            Command::Create { id, kind } => {
                debug!(entity = %id, ?kind, turn, "entity_created");
                self.entities.insert(id, Entity::new(id, kind, turn));
                self.shared.must_reset_tree = true;
            }
            Command::Update(update) => {
                let entity = self
                    .entities
                    .get_mut(&update.entity)
                    .ok_or(FrameError::UnknownEntity {
                        turn,
                        entity: update.entity,
                    })?;
                if let Some(conflict) = entity.add_state(turn, update.t, update.values, update.curves) {
                    self.shared.errors.push(conflict);
                }
            }
            Command::LoadAsset(request) => {
                if let Some(handle) = self.catalog.begin_load(request) {
                    self.pending_loads.push(handle);
                }
            }
            Command::WorldCommit { times } => {
                for entity in self.entities.values_mut() {
                    for t in &times {
                        entity.add_state(turn, *t, PropertyMap::new(), BTreeMap::new());
                    }
                }
            }
        }
        Ok(())
    }

    /// Recreates every backend node, as after the canvas was replaced.
    pub fn reinit_scene(&mut self, canvas: &CanvasInfo, backend: &mut dyn DisplayBackend) {
        self.shared.to_pixel = canvas.to_pixel();
        for entity in self.entities.values_mut() {
            entity.init_display(&mut self.shared, &mut self.catalog, backend);
        }
        self.shared.must_reset_tree = true;
        debug!(
            entity_count = self.entities.len(),
            to_pixel = self.shared.to_pixel,
            "entity_module_reinit"
        );
    }

    /// Draws `turn` at `progress` in `[0, 1]`. Nothing is drawn while assets are loading.
    pub fn update_scene(
        &mut self,
        turn: u32,
        progress: f64,
        backend: &mut dyn DisplayBackend,
    ) -> Result<RenderOutcome, FrameError> {
        self.poll_loads();
        if !self.pending_loads.is_empty() {
            return Ok(RenderOutcome::StillLoading {
                in_flight: self.pending_loads.len(),
            });
        }

        let frame = self
            .frames
            .iter()
            .find(|frame| frame.info.number == turn)
            .copied()
            .ok_or(FrameError::UnknownTurn { turn })?;
        let request = RenderRequest {
            turn,
            previous_turn: frame.previous,
            frame: &frame.info,
            progress: progress.clamp(0.0, 1.0),
        };

        let mut updated = Vec::new();
        for (id, entity) in &mut self.entities {
            if entity.render(request, &mut self.shared, &mut self.catalog, backend) {
                updated.push(*id);
            }
        }

        if self.shared.must_reset_tree {
            self.rebuild_tree();
            self.shared.must_reset_tree = false;
            self.shared.must_resort = true;
        }
        if self.shared.must_resort {
            let entities = &self.entities;
            self.tree.sort_by_z(|id| {
                entities
                    .get(&id)
                    .map(|entity| number_in(entity.current_state(), "zIndex"))
                    .unwrap_or_default()
            });
            backend.tree_changed(&self.tree);
            self.shared.must_resort = false;
        }

        for id in self.buffers_to_refresh(&updated) {
            backend.post_update(id);
        }
        Ok(RenderOutcome::Rendered { updated })
    }

    fn rebuild_tree(&mut self) {
        self.tree = DisplayTree::build(&self.entities);
        for (id, entity) in &mut self.entities {
            entity.set_parent(self.tree.parent_of(*id));
        }
        debug!(root_count = self.tree.roots.len(), "display_tree_rebuilt");
    }

    fn buffers_to_refresh(&self, updated: &[EntityId]) -> BTreeSet<EntityId> {
        updated
            .iter()
            .flat_map(|id| self.tree.ancestors(*id))
            .filter(|ancestor| {
                self.entities
                    .get(ancestor)
                    .is_some_and(|entity| entity.kind().capabilities().post_update)
            })
            .collect()
    }

    fn poll_loads(&mut self) {
        for handle in std::mem::take(&mut self.pending_loads) {
            match handle.poll() {
                LoadStatus::Pending => self.pending_loads.push(handle),
                LoadStatus::Done(result) => {
                    self.catalog
                        .finish_load(handle.request(), result, &mut self.shared.errors);
                }
                LoadStatus::Lost => {
                    let reason = "loader stopped before reporting".to_string();
                    self.catalog
                        .finish_load(handle.request(), Err(reason), &mut self.shared.errors);
                }
            }
        }
    }

    pub fn still_loading(&self) -> bool {
        !self.pending_loads.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Sets the external hide flag. Returns `false` for unknown ids.
    pub fn set_hidden(&mut self, id: EntityId, hidden: bool) -> bool {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.set_hidden(hidden);
                true
            }
            None => false,
        }
    }

    /// Pushes the effect of a hide flag change without waiting for the next render.
    pub fn sync_visibility(&mut self, id: EntityId, backend: &mut dyn DisplayBackend) -> bool {
        let to_world_units = self.shared.to_world_units;
        self.entities
            .get_mut(&id)
            .is_some_and(|entity| entity.sync_visibility(to_world_units, backend))
    }

    pub fn turns(&self) -> impl Iterator<Item = TurnRef> + '_ {
        self.frames.iter().map(|frame| TurnRef {
            number: frame.info.number,
            previous: frame.previous,
        })
    }

    pub fn frame_info(&self, turn: u32) -> Option<&FrameInfo> {
        self.frames
            .iter()
            .find(|frame| frame.info.number == turn)
            .map(|frame| &frame.info)
    }

    pub fn tree(&self) -> &DisplayTree {
        &self.tree
    }

    pub fn shared(&self) -> &SharedContext {
        &self.shared
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.shared.errors
    }

    pub fn errors_mut(&mut self) -> &mut ErrorLog {
        &mut self.shared.errors
    }

    pub fn catalog_mut(&mut self) -> &mut AssetCatalog {
        &mut self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{RecordingBackend, Visual};
    use crate::errors::ViewerError;
    use crate::properties::PropertyValue;
    use crate::scene::EntityKind;

    fn frame(number: u32) -> FrameInfo {
        FrameInfo {
            number,
            date_ms: f64::from(number) * 1000.0,
            frame_duration_ms: 1000.0,
        }
    }

    fn module_with(turns: &[&str]) -> EntityModule {
        let mut module = EntityModule::new(AssetCatalog::default());
        for (number, script) in turns.iter().enumerate() {
            module
                .handle_frame_data(frame(number as u32), Some(script))
                .expect("frame applies");
        }
        module
    }

    fn position(backend: &RecordingBackend, id: u64) -> (f64, f64) {
        let node = backend.node(EntityId(id)).expect("node");
        (node.transform.x, node.transform.y)
    }

    #[test]
    fn simple_creation_and_move() {
        let mut module = module_with(&["C R\nU 1 1 x 100 y 50"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(0, 0.5, &mut backend).expect("render");
        assert_eq!(position(&backend, 1), (50.0, 25.0));
        assert!(backend.node(EntityId(1)).expect("node").transform.visible);

        module.update_scene(0, 1.0, &mut backend).expect("render");
        assert_eq!(position(&backend, 1), (100.0, 50.0));
    }

    #[test]
    fn rendering_twice_sends_nothing_new() {
        let mut module = module_with(&["C C\nU 1 0.5 x 10;1 1 x 20"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(0, 0.75, &mut backend).expect("render");
        let sent = backend.updates.len();
        let outcome = module.update_scene(0, 0.75, &mut backend).expect("render");

        assert_eq!(backend.updates.len(), sent);
        assert_eq!(outcome, RenderOutcome::Rendered { updated: Vec::new() });
    }

    #[test]
    fn motion_continues_from_the_previous_turn() {
        let mut module = module_with(&["C R\nU 1 1 x 100", "U 1 1 x 200"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(1, 0.0, &mut backend).expect("render");
        assert_eq!(position(&backend, 1).0, 100.0);
        module.update_scene(1, 0.5, &mut backend).expect("render");
        assert_eq!(position(&backend, 1).0, 150.0);
    }

    #[test]
    fn sub_states_bracket_the_progress() {
        let mut module = module_with(&["C R\nU 1 0.5 x 100;1 1 x 0"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(0, 0.25, &mut backend).expect("render");
        assert_eq!(position(&backend, 1).0, 50.0);
        module.update_scene(0, 0.75, &mut backend).expect("render");
        assert_eq!(position(&backend, 1).0, 50.0);
        module.update_scene(0, 0.5, &mut backend).expect("render");
        assert_eq!(position(&backend, 1).0, 100.0);
    }

    #[test]
    fn curves_shape_the_motion() {
        let mut module = module_with(&["C R\nU 1 1 x 100 _ y 100 Γ"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(0, 0.5, &mut backend).expect("render");
        assert_eq!(position(&backend, 1), (0.0, 100.0));
    }

    #[test]
    fn entity_not_yet_created_is_hidden() {
        let mut module = module_with(&["C R", "C C\nU 2 1 x 5"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(0, 1.0, &mut backend).expect("render");
        assert!(backend.node(EntityId(1)).expect("first").transform.visible);
        assert!(!backend.node(EntityId(2)).expect("second").transform.visible);
    }

    #[test]
    fn duplicate_write_reports_once_and_last_write_wins() {
        let mut module = module_with(&["C R\nU 1 1 x 10\nU 1 1 x 30"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(0, 1.0, &mut backend).expect("render");
        assert_eq!(position(&backend, 1).0, 30.0);
        assert_eq!(
            module.errors().entries(),
            [ViewerError::DuplicateSubState {
                entity: EntityId(1),
                t: 1.0,
                turn: 0
            }]
        );
    }

    #[test]
    fn missing_image_draws_placeholder_every_frame_with_one_error() {
        let mut module = module_with(&["C S\nU 1 1 i ghost", "U 1 1 x 10", "U 1 1 x 20"]);
        let mut backend = RecordingBackend::default();

        for turn in 0..3 {
            module.update_scene(turn, 1.0, &mut backend).expect("render");
            let node = backend.node(EntityId(1)).expect("node");
            let Some(Visual::Sprite { texture, .. }) = &node.visual else {
                panic!("sprite visual expected");
            };
            assert_eq!(
                *texture,
                crate::assets::Texture::Placeholder {
                    name: "ghost".to_string()
                }
            );
        }
        assert_eq!(module.errors().len(), 1);
    }

    #[test]
    fn ids_are_assigned_in_creation_order_across_turns() {
        let module = module_with(&["C R;C C", "C T"]);
        let ids: Vec<EntityId> = module.entities().map(Entity::id).collect();
        assert_eq!(ids, vec![EntityId(1), EntityId(2), EntityId(3)]);
        assert_eq!(module.entity(EntityId(3)).expect("text").kind(), EntityKind::Text);
    }

    #[test]
    fn turns_must_increase() {
        let mut module = module_with(&["C R", "U 1 1 x 1"]);
        assert!(matches!(
            module.handle_frame_data(frame(1), None),
            Err(FrameError::OutOfOrder { turn: 1, last: 1 })
        ));
        assert!(matches!(
            module.handle_frame_data(frame(2), Some("U 9 1 x 1")),
            Err(FrameError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn first_turn_links_to_nothing() {
        let module = module_with(&["C R", ""]);
        let turns: Vec<TurnRef> = module.turns().collect();
        assert_eq!(
            turns,
            vec![
                TurnRef {
                    number: 0,
                    previous: None
                },
                TurnRef {
                    number: 1,
                    previous: Some(0)
                }
            ]
        );
    }

    #[test]
    fn children_changes_rebuild_the_tree() {
        let mut module = module_with(&["C G;R;C\nU 1 1 ch 2,3", "U 1 1 ch 3"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(0, 1.0, &mut backend).expect("render");
        let tree = backend.tree.clone().expect("tree");
        assert_eq!(tree.roots, vec![EntityId(1)]);
        assert_eq!(tree.children_of(EntityId(1)), [EntityId(2), EntityId(3)]);
        assert_eq!(module.entity(EntityId(2)).expect("child").parent(), Some(EntityId(1)));

        module.update_scene(1, 1.0, &mut backend).expect("render");
        let tree = backend.tree.clone().expect("tree");
        assert_eq!(tree.roots, vec![EntityId(1), EntityId(2)]);
        assert_eq!(module.entity(EntityId(2)).expect("child").parent(), None);
    }

    #[test]
    fn z_index_changes_resort_siblings() {
        let mut module = module_with(&["C R;R\nU 1 1 z 5"]);
        let mut backend = RecordingBackend::default();

        module.update_scene(0, 1.0, &mut backend).expect("render");
        assert_eq!(
            backend.tree.clone().expect("tree").roots,
            vec![EntityId(2), EntityId(1)]
        );
    }

    #[test]
    fn buffered_groups_refresh_when_a_descendant_changes() {
        let mut module = module_with(&["C B;R\nU 1 1 ch 2;2 1 x 5", "U 2 1 x 10", ""]);
        let mut backend = RecordingBackend::default();

        for turn in 0..3 {
            module.update_scene(turn, 1.0, &mut backend).expect("render");
        }
        assert_eq!(backend.node(EntityId(1)).expect("buffer").buffer_renders, 2);
    }

    #[test]
    fn renders_wait_for_spritesheet_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        image::RgbaImage::new(64, 32)
            .save(dir.path().join("sheet.png"))
            .expect("write png");
        let mut catalog = AssetCatalog::new(dir.path());
        catalog
            .register_image_file("sheet", "sheet.png")
            .expect("register");
        let mut module = EntityModule::new(catalog);
        module
            .handle_frame_data(frame(0), Some("L run sheet 32 32 0 0 2 2\nC S\nU 1 1 i run1"))
            .expect("frame");

        let mut backend = RecordingBackend::default();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            match module.update_scene(0, 1.0, &mut backend).expect("render") {
                RenderOutcome::StillLoading { in_flight } => {
                    assert_eq!(in_flight, 1);
                    assert!(backend.nodes.is_empty());
                    assert!(std::time::Instant::now() < deadline, "load timed out");
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                RenderOutcome::Rendered { .. } => break,
            }
        }
        assert!(module.errors().is_empty(), "{:?}", module.errors());
        let node = backend.node(EntityId(1)).expect("sprite");
        assert!(matches!(
            &node.visual,
            Some(Visual::Sprite {
                texture: crate::assets::Texture::Image { .. },
                ..
            })
        ));
    }

    #[test]
    fn global_data_scales_positions() {
        let mut module = module_with(&[]);
        module.handle_global_data(Vec::new(), &GlobalConfig { width: 3840.0, height: 2160.0 });
        module
            .handle_frame_data(frame(0), Some("C R\nU 1 1 x 100"))
            .expect("frame");
        let mut backend = RecordingBackend::default();
        module.update_scene(0, 1.0, &mut backend).expect("render");
        assert_eq!(position(&backend, 1).0, 50.0);
        assert_eq!(
            module.entity(EntityId(1)).expect("rect").current_state().get("x"),
            Some(&PropertyValue::Number(100.0))
        );
    }

    #[test]
    fn reinit_recreates_nodes_and_rerenders_state() {
        let mut module = module_with(&["C R\nU 1 1 x 40"]);
        let mut backend = RecordingBackend::default();
        module.update_scene(0, 1.0, &mut backend).expect("render");

        let mut fresh = RecordingBackend::default();
        module.reinit_scene(&CanvasInfo::new(960.0, 540.0), &mut fresh);
        assert!(!fresh.node(EntityId(1)).expect("node").transform.visible);
        module.update_scene(0, 1.0, &mut fresh).expect("render");
        assert_eq!(position(&fresh, 1).0, 40.0);
        assert_eq!(module.shared().to_pixel, 2.0);
    }

    #[test]
    fn entities_created_in_later_turns_join_the_tree() {
        let mut module = module_with(&["C R\nU 1 1 x 1"]);
        let mut backend = RecordingBackend::default();
        module.update_scene(0, 1.0, &mut backend).expect("turn 0");

        module
            .handle_frame_data(frame(1), Some("C C\nU 2 1 x 5 z -1"))
            .expect("turn 1");
        module.update_scene(1, 1.0, &mut backend).expect("turn 1");

        assert_eq!(module.tree().roots, vec![EntityId(2), EntityId(1)]);
        assert_eq!(
            backend.tree.clone().expect("tree").roots,
            vec![EntityId(2), EntityId(1)]
        );
    }
}
