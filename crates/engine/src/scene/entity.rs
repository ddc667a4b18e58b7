use std::collections::BTreeMap;

use serde::Serialize;

use crate::assets::AssetCatalog;
use crate::context::{FrameInfo, SharedContext};
use crate::display::{DisplayBackend, DisplayTransform, DisplayUpdate, MIN_SCALE};
use crate::errors::ViewerError;
use crate::properties::{describe, flag_in, number_in, unlerp, Curve, PropertyMap, PropertyValue};

use super::kinds::{EntityKind, VisualContext};
use super::EntityId;

/// Entity state at normalized time `t` within one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubState {
    pub t: f64,
    pub values: PropertyMap,
    pub curves: BTreeMap<String, Curve>,
}

impl SubState {
    pub fn new(t: f64) -> Self {
        Self {
            t,
            values: PropertyMap::new(),
            curves: BTreeMap::new(),
        }
    }
}

/// Which turn is being rendered, and the turn it follows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderRequest<'a> {
    pub turn: u32,
    pub previous_turn: Option<u32>,
    pub frame: &'a FrameInfo,
    pub progress: f64,
}

#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    kind: EntityKind,
    default_state: PropertyMap,
    pub(crate) timeline: BTreeMap<u32, Vec<SubState>>,
    current_state: PropertyMap,
    parent: Option<EntityId>,
    hidden: bool,
    created_turn: u32,
    /// Visibility the timeline asks for, before the external hide flag.
    timeline_visible: bool,
    /// Visibility last sent to the backend; `None` until the display exists.
    displayed_visible: Option<bool>,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, created_turn: u32) -> Self {
        let default_state = kind.default_state();
        Self {
            id,
            kind,
            current_state: default_state.clone(),
            default_state,
            timeline: BTreeMap::new(),
            parent: None,
            hidden: false,
            created_turn,
            timeline_visible: false,
            displayed_visible: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn default_state(&self) -> &PropertyMap {
        &self.default_state
    }

    pub fn current_state(&self) -> &PropertyMap {
        &self.current_state
    }

    #[cfg(test)]
    pub(crate) fn current_state_mut(&mut self) -> &mut PropertyMap {
        &mut self.current_state
    }

    pub fn sub_states(&self, turn: u32) -> Option<&[SubState]> {
        self.timeline.get(&turn).map(Vec::as_slice)
    }

    pub fn turns(&self) -> impl Iterator<Item = u32> + '_ {
        self.timeline.keys().copied()
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<EntityId>) {
        self.parent = parent;
    }

    pub fn created_turn(&self) -> u32 {
        self.created_turn
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    pub fn is_displayed(&self) -> bool {
        self.displayed_visible == Some(true)
    }

    /// Records a sub-state for `turn`. A second sub-state at the same `t` is merged into
    /// the first, later values winning; a conflict between two non-empty writes is
    /// returned for reporting.
    pub fn add_state(
        &mut self,
        turn: u32,
        t: f64,
        values: PropertyMap,
        curves: BTreeMap<String, Curve>,
    ) -> Option<ViewerError> {
        let entity = self.id;
        let sub_states = self.timeline.entry(turn).or_default();
        let Some(existing) = sub_states.iter_mut().find(|sub_state| sub_state.t == t) else {
            sub_states.push(SubState { t, values, curves });
            return None;
        };

        let conflict = (!existing.values.is_empty() && !values.is_empty()).then(|| {
            ViewerError::DuplicateSubState { entity, t, turn }
        });
        existing.values.extend(values);
        existing.curves.extend(curves);
        conflict
    }

    /// Creates the backend node, hidden, showing the default state.
    pub(crate) fn init_display(
        &mut self,
        shared: &mut SharedContext,
        catalog: &mut AssetCatalog,
        backend: &mut dyn DisplayBackend,
    ) {
        self.current_state = self.default_state.clone();
        self.timeline_visible = false;
        let mut context = VisualContext {
            catalog,
            errors: &mut shared.errors,
            to_world_units: shared.to_world_units,
            to_pixel: shared.to_pixel,
            frame: None,
            progress: 0.0,
        };
        let visual = (self.kind.capabilities().visual)(&self.current_state, &mut context);
        let initial = DisplayUpdate {
            changed: Vec::new(),
            transform: self.transform(shared.to_world_units, false),
            visual: Some(visual),
        };
        backend.init_display(self.id, self.kind, &initial);
        self.displayed_visible = Some(false);
    }

    /// Interpolates the state for `request` and pushes the difference to the backend.
    /// Returns whether anything was sent.
    pub(crate) fn render(
        &mut self,
        request: RenderRequest<'_>,
        shared: &mut SharedContext,
        catalog: &mut AssetCatalog,
        backend: &mut dyn DisplayBackend,
    ) -> bool {
        if self.displayed_visible.is_none() {
            self.init_display(shared, catalog, backend);
        }

        let (state, present) = match self.interpolate(&request) {
            Some(state) => (state, true),
            None => (self.default_state.clone(), false),
        };

        let changed: Vec<String> = state
            .iter()
            .filter(|(key, value)| self.current_state.get(*key) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect();
        self.timeline_visible = present && flag_in(&state, "visible");
        let visible = self.effective_visible();
        if changed.is_empty() && self.displayed_visible == Some(visible) {
            return false;
        }

        for key in &changed {
            if let Some(value) = state.get(key) {
                self.current_state.insert(key.clone(), value.clone());
            }
        }
        if changed.iter().any(|key| key == "children") {
            shared.must_reset_tree = true;
        }
        if changed.iter().any(|key| key == "zIndex") {
            shared.must_resort = true;
        }

        let capabilities = self.kind.capabilities();
        let visual = capabilities.needs_redraw(&changed).then(|| {
            let mut context = VisualContext {
                catalog,
                errors: &mut shared.errors,
                to_world_units: shared.to_world_units,
                to_pixel: shared.to_pixel,
                frame: Some(request.frame),
                progress: request.progress,
            };
            (capabilities.visual)(&self.current_state, &mut context)
        });
        let update = DisplayUpdate {
            changed,
            transform: self.transform(shared.to_world_units, visible),
            visual,
        };
        backend.update_display(self.id, &update);
        self.displayed_visible = Some(visible);
        true
    }

    /// Re-sends the transform if the hide flag changed what the backend should show.
    pub(crate) fn sync_visibility(
        &mut self,
        to_world_units: f64,
        backend: &mut dyn DisplayBackend,
    ) -> bool {
        let visible = self.effective_visible();
        match self.displayed_visible {
            Some(displayed) if displayed != visible => {
                let update = DisplayUpdate {
                    changed: Vec::new(),
                    transform: self.transform(to_world_units, visible),
                    visual: None,
                };
                backend.update_display(self.id, &update);
                self.displayed_visible = Some(visible);
                true
            }
            _ => false,
        }
    }

    fn effective_visible(&self) -> bool {
        self.timeline_visible && !self.hidden
    }

    fn interpolate(&self, request: &RenderRequest<'_>) -> Option<PropertyMap> {
        let sub_states = match self.timeline.get(&request.turn) {
            Some(sub_states) if !sub_states.is_empty() => sub_states,
            _ => {
                // No entry for this turn: hold the last state reached before it.
                return self
                    .timeline
                    .range(..request.turn)
                    .rev()
                    .find_map(|(_, sub_states)| sub_states.last())
                    .map(|last| self.complete(&last.values));
            }
        };

        let progress = request.progress;
        let mut index = 0;
        while index < sub_states.len() - 1 && sub_states[index].t < progress {
            index += 1;
        }
        let end = &sub_states[index];

        let (start, u) = match index.checked_sub(1).map(|before| &sub_states[before]) {
            Some(start) => (&start.values, unlerp(start.t, end.t, progress)),
            None => {
                let previous = request
                    .previous_turn
                    .and_then(|turn| self.timeline.get(&turn))
                    .and_then(|sub_states| sub_states.last());
                match previous {
                    Some(previous) => (&previous.values, unlerp(0.0, end.t, progress)),
                    None if progress >= end.t => (&end.values, 1.0),
                    None => (&self.default_state, unlerp(0.0, end.t, progress)),
                }
            }
        };

        let state = self
            .default_state
            .iter()
            .map(|(key, default)| {
                let from = start.get(key).unwrap_or(default);
                let to = end.values.get(key).unwrap_or(default);
                let curve = end.curves.get(key).copied().unwrap_or_default();
                let value = describe(key).interpolate(from, to, curve.apply(u));
                (key.clone(), value)
            })
            .collect();
        Some(state)
    }

    fn complete(&self, values: &PropertyMap) -> PropertyMap {
        self.default_state
            .iter()
            .map(|(key, default)| (key.clone(), values.get(key).unwrap_or(default).clone()))
            .collect()
    }

    fn transform(&self, to_world_units: f64, visible: bool) -> DisplayTransform {
        let state = &self.current_state;
        let non_zero = |value: f64| if value == 0.0 { MIN_SCALE } else { value };
        DisplayTransform {
            x: number_in(state, "x") * to_world_units,
            y: number_in(state, "y") * to_world_units,
            scale_x: non_zero(number_in(state, "scaleX")),
            scale_y: non_zero(number_in(state, "scaleY")),
            rotation: number_in(state, "rotation"),
            alpha: number_in(state, "alpha"),
            z_index: number_in(state, "zIndex"),
            visible,
        }
    }

    pub(crate) fn children(&self) -> &[EntityId] {
        match self.current_state.get("children") {
            Some(PropertyValue::Children(children)) => children,
            _ => &[],
        }
    }
}
