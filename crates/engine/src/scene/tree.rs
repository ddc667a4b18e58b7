use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::entity::Entity;
use super::EntityId;

/// Parent/child structure of the scene, derived from the `children` of every group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayTree {
    pub roots: Vec<EntityId>,
    pub children: BTreeMap<EntityId, Vec<EntityId>>,
    pub parents: BTreeMap<EntityId, EntityId>,
}

impl DisplayTree {
    /// Groups are visited in id order; an entity claimed by two groups ends up under
    /// the later one. Self references and unknown ids are ignored.
    pub fn build(entities: &BTreeMap<EntityId, Entity>) -> Self {
        let mut tree = Self::default();
        for (id, entity) in entities {
            if !entity.kind().is_container() {
                continue;
            }
            tree.children.entry(*id).or_default();
            for child in entity.children() {
                if child == id || !entities.contains_key(child) {
                    continue;
                }
                if let Some(previous) = tree.parents.insert(*child, *id) {
                    if let Some(siblings) = tree.children.get_mut(&previous) {
                        siblings.retain(|sibling| sibling != child);
                    }
                }
                if let Some(siblings) = tree.children.get_mut(id) {
                    if !siblings.contains(child) {
                        siblings.push(*child);
                    }
                }
            }
        }
        tree.roots = entities
            .keys()
            .filter(|id| !tree.parents.contains_key(id))
            .copied()
            .collect();
        tree
    }

    pub fn parent_of(&self, id: EntityId) -> Option<EntityId> {
        self.parents.get(&id).copied()
    }

    pub fn children_of(&self, id: EntityId) -> &[EntityId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Ancestors from the direct parent upward. Stops at the first repeat, so
    /// cyclic `children` declarations terminate.
    pub fn ancestors(&self, id: EntityId) -> Vec<EntityId> {
        let mut seen = HashSet::from([id]);
        let mut ancestors = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            if !seen.insert(parent) {
                break;
            }
            ancestors.push(parent);
            current = parent;
        }
        ancestors
    }

    /// Orders roots and every child list by `(z, id)`.
    pub fn sort_by_z(&mut self, z_of: impl Fn(EntityId) -> f64) {
        let order = |list: &mut Vec<EntityId>| {
            list.sort_by(|a, b| z_of(*a).total_cmp(&z_of(*b)).then(a.cmp(b)));
        };
        order(&mut self.roots);
        for list in self.children.values_mut() {
            order(list);
        }
    }
}
