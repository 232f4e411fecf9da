use std::collections::HashMap;

use skein_runtime::{Name, NodeId, Value};

/// Overlay of tentative state changes, layered over the base globals and
/// visit/turn counts while a snapshot or background save is outstanding.
///
/// Reads consult the patch first; merging is additive via
/// `StoryState::apply_any_patch`, and discarding is just dropping it.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    globals: HashMap<Name, Value>,
    visit_counts: HashMap<NodeId, i64>,
    turn_indices: HashMap<NodeId, i64>,
    changed_variables: Vec<Name>,
}

impl Patch {
    /// Start a patch, carrying forward the contents of an existing one
    /// (a newline snapshot taken during a background save must keep the
    /// save-window writes pending).
    pub fn inheriting(existing: Option<&Patch>) -> Patch {
        match existing {
            Some(p) => p.clone(),
            None => Patch::default(),
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: Name, value: Value) {
        self.globals.insert(name, value);
    }

    pub fn visit_count(&self, container: NodeId) -> Option<i64> {
        self.visit_counts.get(&container).copied()
    }

    pub fn set_visit_count(&mut self, container: NodeId, count: i64) {
        self.visit_counts.insert(container, count);
    }

    pub fn turn_index(&self, container: NodeId) -> Option<i64> {
        self.turn_indices.get(&container).copied()
    }

    pub fn set_turn_index(&mut self, container: NodeId, index: i64) {
        self.turn_indices.insert(container, index);
    }

    /// Record a changed global for batched observer notification,
    /// keeping first-change order.
    pub fn add_changed_variable(&mut self, name: Name) {
        if !self.changed_variables.contains(&name) {
            self.changed_variables.push(name);
        }
    }

    pub fn changed_variables(&self) -> &[Name] {
        &self.changed_variables
    }

    pub fn globals(&self) -> &HashMap<Name, Value> {
        &self.globals
    }

    pub fn visit_counts(&self) -> &HashMap<NodeId, i64> {
        &self.visit_counts
    }

    pub fn turn_indices(&self) -> &HashMap<NodeId, i64> {
        &self.turn_indices
    }
}
