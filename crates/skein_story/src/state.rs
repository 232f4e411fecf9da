use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use skein_runtime::object::VariableAssignment;
use skein_runtime::{Name, NodeId, Pointer, StoryDocument, Value};

use crate::callstack::{CallStack, FrameKind};
use crate::choice::Choice;
use crate::error::StoryError;
use crate::flow::{Flow, DEFAULT_FLOW_NAME};
use crate::output::{split_head_tail_whitespace, OutEntry, OutputStream};
use crate::patch::Patch;
use crate::variables::VariablesState;

// ── Evaluation stack entries ────────────────────────────────────

/// An entry on the evaluation stack: a plain value, or a tag captured
/// while building choice text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EvalObject {
    Value(Value),
    Tag(String),
}

// ── StoryState ──────────────────────────────────────────────────

/// All mutable execution state of a story.
///
/// Cloning is the snapshot operation: flows (callstacks, output
/// streams, choices) and the evaluation stack are copied by value,
/// while globals and visit/turn counts are `Arc`-shared and protected
/// by the patch overlay. `copy_and_start_patching` is how both the
/// newline-lookahead snapshot and the background-save copy are made.
#[derive(Debug, Clone)]
pub struct StoryState {
    pub(crate) doc: Arc<StoryDocument>,
    current_flow: Flow,
    parked_flows: HashMap<Name, Flow>,
    pub(crate) variables: VariablesState,
    eval_stack: Vec<EvalObject>,
    pub(crate) diverted_pointer: Option<Pointer>,
    visit_counts: Arc<HashMap<String, i64>>,
    turn_indices: Arc<HashMap<String, i64>>,
    pub(crate) current_turn_index: i64,
    pub(crate) story_seed: u64,
    pub(crate) previous_random: u64,
    pub(crate) did_safe_exit: bool,
    pub(crate) patch: Option<Patch>,
    pub(crate) current_errors: Vec<String>,
    pub(crate) current_warnings: Vec<String>,
}

impl StoryState {
    pub fn new(doc: Arc<StoryDocument>) -> StoryState {
        let root = doc.root;
        let mut seed_rng = StdRng::from_os_rng();
        StoryState {
            doc,
            current_flow: Flow::new(DEFAULT_FLOW_NAME, root),
            parked_flows: HashMap::new(),
            variables: VariablesState::new(),
            eval_stack: Vec::new(),
            diverted_pointer: None,
            visit_counts: Arc::new(HashMap::new()),
            turn_indices: Arc::new(HashMap::new()),
            current_turn_index: -1,
            story_seed: seed_rng.random_range(0..100),
            previous_random: 0,
            did_safe_exit: false,
            patch: None,
            current_errors: Vec::new(),
            current_warnings: Vec::new(),
        }
    }

    // ── Pointers ────────────────────────────────────────────────

    pub fn current_pointer(&self) -> Option<Pointer> {
        self.current_flow.callstack.current_frame().pointer
    }

    pub fn set_current_pointer(&mut self, pointer: Option<Pointer>) {
        self.current_flow.callstack.current_frame_mut().pointer = pointer;
    }

    pub fn previous_pointer(&self) -> Option<Pointer> {
        self.current_flow.callstack.current_thread().previous_pointer
    }

    pub fn set_previous_pointer(&mut self, pointer: Option<Pointer>) {
        self.current_flow.callstack.current_thread_mut().previous_pointer = pointer;
    }

    pub fn can_continue(&self) -> bool {
        self.current_pointer().is_some() && !self.has_error()
    }

    // ── Diagnostics ─────────────────────────────────────────────

    pub fn has_error(&self) -> bool {
        !self.current_errors.is_empty()
    }

    pub fn has_warning(&self) -> bool {
        !self.current_warnings.is_empty()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.current_errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.current_warnings.push(message.into());
    }

    pub fn reset_errors(&mut self) {
        self.current_errors.clear();
        self.current_warnings.clear();
    }

    // ── Callstack access ────────────────────────────────────────

    pub fn callstack(&self) -> &CallStack {
        &self.current_flow.callstack
    }

    pub fn callstack_mut(&mut self) -> &mut CallStack {
        &mut self.current_flow.callstack
    }

    pub fn in_expression_evaluation(&self) -> bool {
        self.current_flow.callstack.current_frame().in_expression_evaluation
    }

    pub fn set_in_expression_evaluation(&mut self, value: bool) {
        self.current_flow
            .callstack
            .current_frame_mut()
            .in_expression_evaluation = value;
    }

    /// Pop a frame, trimming trailing function whitespace first when the
    /// departing frame is a function.
    pub fn pop_callstack(&mut self, kind: Option<FrameKind>) -> Result<(), String> {
        if self.current_flow.callstack.current_frame().kind == FrameKind::Function {
            self.trim_whitespace_from_function_end();
        }
        self.current_flow.callstack.pop(kind)
    }

    fn trim_whitespace_from_function_end(&mut self) {
        let start = self
            .current_flow
            .callstack
            .current_frame()
            .function_start_in_output_stream
            .unwrap_or(0);
        let output = &mut self.current_flow.output;
        let mut i = output.len();
        while i > start {
            i -= 1;
            let entry = &output.entries()[i];
            if !matches!(entry, OutEntry::Text(_)) {
                continue;
            }
            if entry.is_newline() || entry.is_inline_whitespace() {
                output.remove_at(i);
            } else {
                break;
            }
        }
    }

    // ── Evaluation stack ────────────────────────────────────────

    pub(crate) fn push_eval(&mut self, obj: EvalObject) {
        self.eval_stack.push(obj);
    }

    pub fn push_eval_value(&mut self, value: Value) {
        self.eval_stack.push(EvalObject::Value(value));
    }

    pub(crate) fn pop_eval(&mut self) -> Result<EvalObject, String> {
        self.eval_stack
            .pop()
            .ok_or_else(|| "evaluation stack underflow".to_string())
    }

    pub fn pop_value(&mut self) -> Result<Value, String> {
        match self.pop_eval()? {
            EvalObject::Value(v) => Ok(v),
            EvalObject::Tag(_) => Err("unexpected tag on evaluation stack".into()),
        }
    }

    /// Pop `n` values, returned in evaluation (push) order.
    pub fn pop_values(&mut self, n: usize) -> Result<Vec<Value>, String> {
        if self.eval_stack.len() < n {
            return Err("evaluation stack underflow".into());
        }
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.pop_value()?);
        }
        values.reverse();
        Ok(values)
    }

    pub(crate) fn peek_eval(&self) -> Option<&EvalObject> {
        self.eval_stack.last()
    }

    pub fn eval_stack_len(&self) -> usize {
        self.eval_stack.len()
    }

    // ── Output stream ───────────────────────────────────────────

    pub fn output(&mut self) -> &mut OutputStream {
        &mut self.current_flow.output
    }

    pub fn output_ref(&self) -> &OutputStream {
        &self.current_flow.output
    }

    pub fn reset_output(&mut self) {
        self.current_flow.output.clear();
    }

    pub fn current_text(&mut self) -> &str {
        self.current_flow.output.text()
    }

    pub fn current_tags(&mut self) -> &[String] {
        self.current_flow.output.tags()
    }

    pub fn in_string_evaluation(&self) -> bool {
        self.current_flow.output.in_string_evaluation()
    }

    /// Push content into the output stream, splitting boundary newlines
    /// off text chunks so the trimming rules see them individually.
    pub fn push_to_output(&mut self, entry: OutEntry) {
        if let OutEntry::Text(s) = &entry {
            if let Some(fragments) = split_head_tail_whitespace(s) {
                for fragment in fragments {
                    self.push_to_output_individual(OutEntry::Text(fragment));
                }
                return;
            }
        }
        self.push_to_output_individual(entry);
    }

    fn push_to_output_individual(&mut self, entry: OutEntry) {
        match &entry {
            OutEntry::Glue => {
                self.current_flow.output.trim_newlines();
                self.current_flow.output.push_raw(entry);
            }
            OutEntry::Text(_) => self.push_text_individual(entry),
            _ => self.current_flow.output.push_raw(entry),
        }
    }

    fn push_text_individual(&mut self, entry: OutEntry) {
        let frame = self.current_flow.callstack.current_frame();
        let mut function_trim = if frame.kind == FrameKind::Function {
            frame.function_start_in_output_stream
        } else {
            None
        };

        let (glue_trim, begin_string) = self.current_flow.output.trim_indices();
        if let (Some(bsi), Some(ft)) = (begin_string, function_trim) {
            // String evaluation that started after the function start
            // owns the whitespace; no function trimming applies.
            if bsi >= ft {
                function_trim = None;
            }
        }

        let trim_index = match (glue_trim, function_trim) {
            (Some(g), Some(f)) => Some(g.min(f)),
            (Some(g), None) => Some(g),
            (None, f) => f,
        };

        if trim_index.is_some() {
            if entry.is_newline() {
                return;
            }
            if entry.is_nonwhitespace_text() {
                if glue_trim.is_some() {
                    self.current_flow.output.remove_existing_glue();
                }
                if function_trim.is_some() {
                    for frame in self.current_flow.callstack.frames_mut().iter_mut().rev() {
                        if frame.kind == FrameKind::Function {
                            frame.function_start_in_output_stream = None;
                        } else {
                            break;
                        }
                    }
                }
            }
        } else if entry.is_newline()
            && (self.current_flow.output.ends_in_newline()
                || !self.current_flow.output.contains_content())
        {
            return;
        }

        self.current_flow.output.push_raw(entry);
    }

    // ── Choices ─────────────────────────────────────────────────

    /// All choices generated this step cycle, including invisible
    /// defaults.
    pub fn generated_choices(&self) -> &[Choice] {
        &self.current_flow.current_choices
    }

    pub fn generated_choices_mut(&mut self) -> &mut Vec<Choice> {
        &mut self.current_flow.current_choices
    }

    // ── Visit and turn counts ───────────────────────────────────

    fn container_path_key(&self, container: NodeId) -> String {
        match self.doc.arena.container(container) {
            Some(c) => c.path_str.clone(),
            None => String::new(),
        }
    }

    pub fn visit_count(&self, container: NodeId) -> i64 {
        if let Some(patch) = &self.patch {
            if let Some(count) = patch.visit_count(container) {
                return count;
            }
        }
        let key = self.container_path_key(container);
        self.visit_counts.get(&key).copied().unwrap_or(0)
    }

    pub fn increment_visit_count(&mut self, container: NodeId) {
        let count = self.visit_count(container) + 1;
        match &mut self.patch {
            Some(patch) => patch.set_visit_count(container, count),
            None => {
                let key = self.container_path_key(container);
                Arc::make_mut(&mut self.visit_counts).insert(key, count);
            }
        }
    }

    pub fn record_turn_index_visit(&mut self, container: NodeId) {
        let turn = self.current_turn_index;
        match &mut self.patch {
            Some(patch) => patch.set_turn_index(container, turn),
            None => {
                let key = self.container_path_key(container);
                Arc::make_mut(&mut self.turn_indices).insert(key, turn);
            }
        }
    }

    /// Turns since the container was last visited, or -1 if never.
    pub fn turns_since(&self, container: NodeId) -> i64 {
        if let Some(patch) = &self.patch {
            if let Some(index) = patch.turn_index(container) {
                return self.current_turn_index - index;
            }
        }
        let key = self.container_path_key(container);
        match self.turn_indices.get(&key) {
            Some(index) => self.current_turn_index - index,
            None => -1,
        }
    }

    pub fn visit_count_snapshot(&self) -> &HashMap<String, i64> {
        &self.visit_counts
    }

    // ── Variables ───────────────────────────────────────────────

    /// Resolve a variable read: active-frame temporaries first, then
    /// patch globals, then base globals, then bare list item names.
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.get_variable_in_context(name, -1)
    }

    pub(crate) fn get_variable_in_context(&self, name: &str, context_index: i32) -> Option<Value> {
        let raw = self.get_raw_variable(name, context_index)?;
        if let Value::VariablePointer {
            name: target,
            context_index: target_context,
        } = &raw
        {
            return self.get_variable_in_context(target.as_str(), *target_context);
        }
        Some(raw)
    }

    fn get_raw_variable(&self, name: &str, context_index: i32) -> Option<Value> {
        if context_index == -1 {
            if let Some(value) = self.current_flow.callstack.temporary(name, -1) {
                return Some(value.clone());
            }
        }
        if context_index == 0 || context_index == -1 {
            if let Some(value) = self.variables.global(name, self.patch.as_ref()) {
                return Some(value);
            }
            if let Some(list) = self.doc.list_defs.single_item_list(name) {
                return Some(Value::List(list));
            }
            if context_index == 0 {
                return None;
            }
        }
        if context_index > 0 {
            return self
                .current_flow
                .callstack
                .temporary(name, context_index)
                .cloned();
        }
        None
    }

    /// Execute a variable assignment with the popped value. Returns an
    /// immediate observer notification when one is due.
    pub fn assign_variable(
        &mut self,
        assignment: &VariableAssignment,
        value: Value,
    ) -> Result<Option<(Name, Value)>, String> {
        let mut name = assignment.name.clone();
        let mut context_index = -1;
        let mut set_global = if assignment.is_new_declaration {
            assignment.is_global
        } else {
            self.variables.global_exists(&name, self.patch.as_ref())
        };

        let mut value = value;
        if assignment.is_new_declaration {
            if assignment.is_global
                && self.variables.global_exists(&name, self.patch.as_ref())
            {
                return Err(format!("global variable '{}' is already declared", name));
            }
            if let Value::VariablePointer {
                name: pointee,
                context_index: pointee_context,
            } = &value
            {
                value = self.resolve_variable_pointer(pointee.clone(), *pointee_context);
            }
        } else {
            // Dereference an existing pointer chain so the write lands on
            // the pointed-to variable.
            loop {
                match self.get_raw_variable(name.as_str(), context_index) {
                    Some(Value::VariablePointer {
                        name: target,
                        context_index: target_context,
                    }) => {
                        name = target;
                        context_index = target_context;
                        set_global = target_context == 0;
                    }
                    _ => break,
                }
            }
        }

        if set_global {
            Ok(self.set_global_value(name, value))
        } else {
            self.current_flow
                .callstack
                .set_temporary(name, value, assignment.is_new_declaration, context_index)
                .map(|_| None)
        }
    }

    /// Pin down the context of a freshly declared variable pointer.
    fn resolve_variable_pointer(&self, name: Name, context_index: i32) -> Value {
        let context_index = if context_index == -1 {
            if self.variables.global_exists(&name, self.patch.as_ref()) {
                0
            } else {
                self.current_flow.callstack.depth() as i32
            }
        } else {
            context_index
        };
        // Double redirection collapses to the inner pointer.
        match self.get_raw_variable(name.as_str(), context_index) {
            Some(v @ Value::VariablePointer { .. }) => v,
            _ => Value::VariablePointer {
                name,
                context_index,
            },
        }
    }

    pub fn set_global_value(&mut self, name: Name, value: Value) -> Option<(Name, Value)> {
        self.variables.set_global(name, value, self.patch.as_mut())
    }

    /// End observer batching, collecting changed variables with the
    /// patch (if any) consulted for current values.
    pub fn complete_batch_observation(&mut self) -> Vec<(Name, Value)> {
        let patch = self.patch.take();
        let changed = self.variables.complete_batch_observation(patch.as_ref());
        self.patch = patch;
        changed
    }

    // ── Patching and snapshots ──────────────────────────────────

    /// Clone this state for a snapshot or background save: flows deep,
    /// big maps Arc-shared, with a (possibly inherited) patch started on
    /// the clone so the shared maps stay frozen.
    pub fn copy_and_start_patching(&self) -> StoryState {
        let mut copy = self.clone();
        copy.patch = Some(Patch::inheriting(self.patch.as_ref()));
        copy
    }

    /// Merge the patch, if any, into the base maps and drop it.
    pub fn apply_any_patch(&mut self) {
        let Some(patch) = self.patch.take() else { return };
        self.variables.apply_patch_globals(&patch);
        if !patch.visit_counts().is_empty() {
            let doc = Arc::clone(&self.doc);
            let counts = Arc::make_mut(&mut self.visit_counts);
            for (&container, &count) in patch.visit_counts() {
                if let Some(c) = doc.arena.container(container) {
                    counts.insert(c.path_str.clone(), count);
                }
            }
        }
        if !patch.turn_indices().is_empty() {
            let doc = Arc::clone(&self.doc);
            let indices = Arc::make_mut(&mut self.turn_indices);
            for (&container, &index) in patch.turn_indices() {
                if let Some(c) = doc.arena.container(container) {
                    indices.insert(c.path_str.clone(), index);
                }
            }
        }
    }

    // ── Flows ───────────────────────────────────────────────────

    pub fn current_flow_name(&self) -> &str {
        self.current_flow.name.as_str()
    }

    pub fn current_flow_is_default(&self) -> bool {
        self.current_flow.name == DEFAULT_FLOW_NAME
    }

    /// Names of non-default flows currently alive (parked or active).
    pub fn alive_flow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .parked_flows
            .keys()
            .filter(|n| n.as_str() != DEFAULT_FLOW_NAME)
            .map(|n| n.to_string())
            .collect();
        if !self.current_flow_is_default() {
            names.push(self.current_flow.name.to_string());
        }
        names.sort();
        names
    }

    pub fn switch_flow(&mut self, name: &str) -> Result<(), StoryError> {
        if name.is_empty() {
            return Err(StoryError::BadArgument(
                "flow names must be non-empty".into(),
            ));
        }
        if self.current_flow.name == name {
            return Ok(());
        }
        let flow = self
            .parked_flows
            .remove(name)
            .unwrap_or_else(|| Flow::new(name, self.doc.root));
        let old = mem::replace(&mut self.current_flow, flow);
        self.parked_flows.insert(old.name.clone(), old);
        Ok(())
    }

    pub fn remove_flow(&mut self, name: &str) -> Result<(), StoryError> {
        if name == DEFAULT_FLOW_NAME {
            return Err(StoryError::CannotRemoveDefaultFlow);
        }
        if self.current_flow.name == name {
            return Err(StoryError::CannotRemoveActiveFlow);
        }
        match self.parked_flows.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoryError::UnknownFlow(name.to_string())),
        }
    }

    // ── Host function evaluation ────────────────────────────────

    pub fn start_function_evaluation_from_game(
        &mut self,
        container: NodeId,
        args: &[Value],
    ) -> Result<(), StoryError> {
        let height = self.eval_stack.len();
        self.current_flow
            .callstack
            .push(FrameKind::HostEval, height, None);
        self.current_flow.callstack.current_frame_mut().pointer =
            Some(Pointer::start_of(container));
        self.pass_arguments_to_evaluation_stack(args)
    }

    pub fn pass_arguments_to_evaluation_stack(
        &mut self,
        args: &[Value],
    ) -> Result<(), StoryError> {
        for arg in args {
            match arg {
                Value::Int(_)
                | Value::Float(_)
                | Value::Bool(_)
                | Value::Str(_)
                | Value::List(_)
                | Value::DivertTarget(_) => self.push_eval_value(arg.clone()),
                other => {
                    return Err(StoryError::BadArgument(format!(
                        "cannot pass a {} argument to a story function",
                        other.type_name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// `done`/end-of-content inside a host evaluation ends that
    /// evaluation rather than the whole flow.
    pub fn try_exit_function_evaluation_from_game(&mut self) -> bool {
        if self.current_flow.callstack.element_is_host_eval() {
            self.set_current_pointer(None);
            self.did_safe_exit = true;
            return true;
        }
        false
    }

    pub fn complete_function_evaluation_from_game(
        &mut self,
    ) -> Result<Option<Value>, StoryError> {
        if !self.current_flow.callstack.element_is_host_eval() {
            return Err(StoryError::BadArgument(
                "expected host function evaluation to be complete".into(),
            ));
        }
        let original_height = self
            .current_flow
            .callstack
            .current_frame()
            .eval_stack_height_on_push;
        let mut returned: Option<Value> = None;
        while self.eval_stack.len() > original_height {
            if let Some(EvalObject::Value(v)) = self.eval_stack.pop() {
                if returned.is_none() {
                    returned = Some(v);
                }
            }
        }
        self.pop_callstack(Some(FrameKind::HostEval))
            .map_err(StoryError::Runtime)?;
        Ok(match returned {
            Some(Value::Void) | None => None,
            other => other,
        })
    }

    // ── Endings ─────────────────────────────────────────────────

    /// Unwind everything: threads, frames, choices, pointer.
    pub fn force_end(&mut self) {
        while self.current_flow.callstack.can_pop_thread() {
            let _ = self.current_flow.callstack.pop_thread();
        }
        while self.current_flow.callstack.can_pop(None) {
            let _ = self.pop_callstack(None);
        }
        self.current_flow.current_choices.clear();
        self.set_current_pointer(None);
        self.set_previous_pointer(None);
        self.did_safe_exit = true;
    }
}
