use std::collections::HashMap;
use std::sync::Arc;

use skein_runtime::{Name, Value};

use crate::callstack::retain_list_origins;
use crate::patch::Patch;

/// Global variable storage with a default snapshot and batched
/// change-notification bookkeeping.
///
/// The globals map sits behind an `Arc` so that state snapshots and
/// background-save copies share it immutably; writes during those
/// windows land in the patch, and `Arc::make_mut` clones at most once
/// when a patch is finally merged.
#[derive(Debug, Clone, Default)]
pub struct VariablesState {
    globals: Arc<HashMap<Name, Value>>,
    default_globals: Option<Arc<HashMap<Name, Value>>>,
    batch_observing: bool,
    changed_for_batch: Vec<Name>,
}

impl VariablesState {
    pub fn new() -> VariablesState {
        VariablesState::default()
    }

    // ── Reads ───────────────────────────────────────────────────

    /// Patch first, then base globals.
    pub fn global(&self, name: &str, patch: Option<&Patch>) -> Option<Value> {
        if let Some(patch) = patch {
            if let Some(value) = patch.global(name) {
                return Some(value.clone());
            }
        }
        self.globals.get(name).cloned()
    }

    pub fn global_exists(&self, name: &str, patch: Option<&Patch>) -> bool {
        self.globals.contains_key(name)
            || patch.is_some_and(|p| p.global(name).is_some())
    }

    pub fn declared_in_defaults(&self, name: &str) -> bool {
        self.default_globals
            .as_ref()
            .is_some_and(|d| d.contains_key(name))
    }

    pub fn global_names(&self) -> impl Iterator<Item = &Name> {
        self.globals.keys()
    }

    // ── Writes ──────────────────────────────────────────────────

    /// Write a global. With a patch active the write is tentative.
    /// Returns the `(name, value)` pair when the change should be
    /// dispatched to observers immediately (not batching).
    pub fn set_global(
        &mut self,
        name: Name,
        value: Value,
        mut patch: Option<&mut Patch>,
    ) -> Option<(Name, Value)> {
        let old = self.global(&name, patch.as_deref());
        let value = retain_list_origins(old.as_ref(), value);
        let changed = old.as_ref() != Some(&value);

        match patch.as_deref_mut() {
            Some(patch) => patch.set_global(name.clone(), value.clone()),
            None => {
                Arc::make_mut(&mut self.globals).insert(name.clone(), value.clone());
            }
        }

        if !changed {
            return None;
        }
        if self.batch_observing {
            match patch {
                Some(patch) => patch.add_changed_variable(name),
                None => {
                    if !self.changed_for_batch.contains(&name) {
                        self.changed_for_batch.push(name);
                    }
                }
            }
            None
        } else {
            Some((name, value))
        }
    }

    /// Merge a patch's globals into the base map.
    pub fn apply_patch_globals(&mut self, patch: &Patch) {
        if patch.globals().is_empty() {
            return;
        }
        let globals = Arc::make_mut(&mut self.globals);
        for (name, value) in patch.globals() {
            globals.insert(name.clone(), value.clone());
        }
        for name in patch.changed_variables() {
            if !self.changed_for_batch.contains(name) {
                self.changed_for_batch.push(name.clone());
            }
        }
    }

    // ── Defaults ────────────────────────────────────────────────

    /// Capture the current globals as the post-`global decl` defaults.
    pub fn snapshot_default_globals(&mut self) {
        self.default_globals = Some(Arc::clone(&self.globals));
    }

    pub fn default_globals(&self) -> Option<&HashMap<Name, Value>> {
        self.default_globals.as_deref()
    }

    // ── Observer batching ───────────────────────────────────────

    pub fn start_batch_observation(&mut self) {
        self.batch_observing = true;
        self.changed_for_batch.clear();
    }

    /// End batching and collect `(name, current value)` for every global
    /// that changed, in first-change order.
    pub fn complete_batch_observation(
        &mut self,
        patch: Option<&Patch>,
    ) -> Vec<(Name, Value)> {
        self.batch_observing = false;
        let mut changed = Vec::new();
        let names: Vec<Name> = self.changed_for_batch.drain(..).collect();
        for name in names {
            if let Some(value) = self.global(name.as_str(), patch) {
                changed.push((name, value));
            }
        }
        if let Some(patch) = patch {
            for name in patch.changed_variables() {
                if changed.iter().any(|(n, _)| n == name) {
                    continue;
                }
                if let Some(value) = patch.global(name.as_str()) {
                    changed.push((name.clone(), value.clone()));
                }
            }
        }
        changed
    }
}
