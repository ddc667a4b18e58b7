use std::collections::{BTreeMap, HashMap};

use crate::context::FrameInfo;
use crate::properties::{flag_in, number_in, PropertyMap, PropertyValue};

use super::entity::{Entity, SubState};
use super::EntityId;

/// Fills `turn` forward for every entity: sub-states are sorted, a closing `t = 1`
/// sub-state is added when missing, and each sub-state receives the full property
/// map accumulated so far.
pub(crate) fn extrapolate(
    entities: &mut BTreeMap<EntityId, Entity>,
    accumulated: &mut HashMap<EntityId, PropertyMap>,
    frame: &FrameInfo,
    previous_turn: Option<u32>,
) {
    let turn = frame.number;
    for (id, entity) in entities.iter_mut() {
        if entity.created_turn() > turn {
            continue;
        }
        let animated = entity.kind().capabilities().animated;
        let running = accumulated
            .entry(*id)
            .or_insert_with(|| entity.default_state().clone());

        let mut previous = previous_turn
            .and_then(|previous| entity.timeline.get(&previous))
            .and_then(|sub_states| sub_states.last())
            .map(|last| last.values.clone())
            .unwrap_or_else(|| running.clone());

        let sub_states = entity.timeline.entry(turn).or_default();
        sub_states.sort_by(|a, b| a.t.total_cmp(&b.t));
        if sub_states.last().map_or(true, |last| last.t != 1.0) {
            sub_states.push(SubState::new(1.0));
        }

        for sub_state in sub_states.iter_mut() {
            let mut merged = running.clone();
            merged.extend(std::mem::take(&mut sub_state.values));
            if animated {
                merged.insert(
                    "date".to_string(),
                    PropertyValue::Number(frame.date_at(sub_state.t)),
                );
                advance_animation(&previous, &mut merged);
            }
            sub_state.values = merged.clone();
            *running = merged.clone();
            previous = merged;
        }
    }
}

/// Moves `animationProgress` from `previous` to `current`: back to zero on the
/// sub-state where a restart was requested, otherwise forward by elapsed time over
/// duration while playing.
pub(crate) fn advance_animation(previous: &PropertyMap, current: &mut PropertyMap) {
    let date = number_in(current, "date");
    let restarted_now = matches!(
        current.get("restarted"),
        Some(PropertyValue::Marker { date: restarted_at }) if *restarted_at == date
    );

    let progress = if restarted_now {
        0.0
    } else {
        let mut progress = number_in(previous, "animationProgress");
        let duration = number_in(previous, "duration");
        if flag_in(previous, "playing") && duration > 0.0 {
            progress += (date - number_in(previous, "date")) / duration;
        }
        progress
    };
    current.insert(
        "animationProgress".to_string(),
        PropertyValue::Number(progress),
    );
}
