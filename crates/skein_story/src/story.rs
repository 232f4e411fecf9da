use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use skein_runtime::list::ListValue;
use skein_runtime::object::{
    ChoicePoint, CommandKind, DivertTarget, NodeKind, VariableReference,
};
use skein_runtime::path::Component;
use skein_runtime::{ops, Name, NodeId, Path, Pointer, StoryDocument, Value};

use crate::callstack::FrameKind;
use crate::choice::Choice;
use crate::error::{Severity, StoryError};
use crate::flow::DEFAULT_FLOW_NAME;
use crate::output::{clean_whitespace, OutEntry};
use crate::state::{EvalObject, StoryState};

/// The named container holding compiled global-variable declarations.
const GLOBAL_DECL_NAME: &str = "global decl";

// ── External functions and callbacks ────────────────────────────

struct ExternalFunction {
    func: Box<dyn FnMut(&[Value]) -> Option<Value>>,
    /// Unsafe externals are never speculatively executed during newline
    /// lookahead; encountering one forces the lookahead to rewind.
    lookahead_safe: bool,
}

type ErrorHandler = Box<dyn FnMut(&str, Severity)>;
type VariableObserver = Box<dyn FnMut(&str, &Value)>;

#[derive(Default)]
struct Callbacks {
    on_error: Vec<ErrorHandler>,
    on_did_continue: Vec<Box<dyn FnMut()>>,
    on_make_choice: Vec<Box<dyn FnMut(&Choice)>>,
    on_evaluate_function: Vec<Box<dyn FnMut(&str, &[Value])>>,
    on_complete_evaluate_function: Vec<Box<dyn FnMut(&str, &[Value], &str, Option<&Value>)>>,
    on_choose_path_string: Vec<Box<dyn FnMut(&str, &[Value])>>,
}

/// Lookahead classification of the output stream relative to the
/// snapshot taken at the last newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStateChange {
    NoChange,
    ExtendedBeyondNewline,
    NewlineRemoved,
}

// ── Story ───────────────────────────────────────────────────────

/// The story engine: owns the immutable document and all mutable
/// execution state, and drives the step loop.
pub struct Story {
    doc: Arc<StoryDocument>,
    state: StoryState,
    snapshot_at_last_newline: Option<StoryState>,
    async_saving: bool,
    async_continue_active: bool,
    recursive_continue_count: u32,
    saw_lookahead_unsafe_after_newline: bool,
    externals: HashMap<String, ExternalFunction>,
    allow_external_fallbacks: bool,
    observers: HashMap<Name, Vec<VariableObserver>>,
    callbacks: Callbacks,
}

impl Story {
    /// Build a story from a loaded document and run its global variable
    /// declarations.
    pub fn new(doc: StoryDocument) -> Result<Story, StoryError> {
        let doc = Arc::new(doc);
        let mut story = Story {
            state: StoryState::new(Arc::clone(&doc)),
            doc,
            snapshot_at_last_newline: None,
            async_saving: false,
            async_continue_active: false,
            recursive_continue_count: 0,
            saw_lookahead_unsafe_after_newline: false,
            externals: HashMap::new(),
            allow_external_fallbacks: true,
            observers: HashMap::new(),
            callbacks: Callbacks::default(),
        };
        story.reset_globals()?;
        Ok(story)
    }

    pub fn document(&self) -> &StoryDocument {
        &self.doc
    }

    pub fn state(&self) -> &StoryState {
        &self.state
    }

    // ── Continuation API ────────────────────────────────────────

    pub fn can_continue(&self) -> bool {
        self.state.can_continue()
    }

    /// Advance until the next complete line and return it.
    pub fn continue_line(&mut self) -> Result<String, StoryError> {
        self.continue_internal(None)?;
        Ok(self.state.current_text().to_string())
    }

    /// Advance until choices are required or the story ends, returning
    /// the concatenated lines.
    pub fn continue_maximally(&mut self) -> Result<String, StoryError> {
        let mut text = String::new();
        while self.can_continue() {
            text.push_str(&self.continue_line()?);
        }
        Ok(text)
    }

    /// Advance with a wall-clock budget; check `async_continue_complete`
    /// and call again until the line is finished.
    pub fn continue_async(&mut self, millisecs_limit: f64) -> Result<(), StoryError> {
        let budget = if millisecs_limit > 0.0 {
            Some(Duration::from_secs_f64(millisecs_limit / 1000.0))
        } else {
            None
        };
        self.continue_internal(budget)
    }

    pub fn async_continue_complete(&self) -> bool {
        !self.async_continue_active
    }

    fn if_async_we_cant(&self, activity: &str) -> Result<(), StoryError> {
        if self.async_continue_active {
            Err(StoryError::AsyncOperationInProgress(activity.to_string()))
        } else {
            Ok(())
        }
    }

    fn continue_internal(&mut self, budget: Option<Duration>) -> Result<(), StoryError> {
        self.recursive_continue_count += 1;
        let result = self.continue_internal_inner(budget);
        self.recursive_continue_count -= 1;
        result
    }

    fn continue_internal_inner(&mut self, budget: Option<Duration>) -> Result<(), StoryError> {
        if !self.async_continue_active {
            self.async_continue_active = budget.is_some();
            if !self.can_continue() {
                return Err(StoryError::CannotContinue);
            }
            self.state.did_safe_exit = false;
            self.state.reset_output();
            if self.recursive_continue_count == 1 {
                self.state.variables.start_batch_observation();
            }
        }

        let started = Instant::now();
        let mut ends_in_newline = false;
        self.saw_lookahead_unsafe_after_newline = false;
        loop {
            match self.continue_single_step() {
                Ok(newline) => ends_in_newline = newline,
                Err(message) => {
                    self.state.add_error(message);
                    break;
                }
            }
            if ends_in_newline {
                break;
            }
            if self.async_continue_active {
                if let Some(budget) = budget {
                    if started.elapsed() > budget {
                        break;
                    }
                }
            }
            if !self.can_continue() {
                break;
            }
        }

        let mut changed_vars: Vec<(Name, Value)> = Vec::new();
        if ends_in_newline || !self.can_continue() {
            if self.snapshot_at_last_newline.is_some() {
                self.restore_state_snapshot();
            }
            if !self.can_continue() {
                if self.state.callstack().can_pop_thread() {
                    self.state.add_error(
                        "thread available to pop, threads should always be flat by the end of evaluation",
                    );
                }
                if self.state.generated_choices().is_empty() && !self.state.did_safe_exit {
                    let callstack = self.state.callstack();
                    let message = if callstack.can_pop(Some(FrameKind::Tunnel)) {
                        FrameKind::Tunnel.missing_return_hint()
                    } else if callstack.can_pop(Some(FrameKind::Function)) {
                        FrameKind::Function.missing_return_hint()
                    } else if !callstack.can_pop(None) {
                        FrameKind::None.missing_return_hint()
                    } else {
                        "unexpectedly reached end of content for unknown reason"
                    };
                    self.state.add_error(message);
                }
            }
            self.state.did_safe_exit = false;
            self.saw_lookahead_unsafe_after_newline = false;
            if self.recursive_continue_count == 1 {
                changed_vars = self.state.complete_batch_observation();
            }
            self.async_continue_active = false;

            // Presentation indices for the visible choices.
            let mut index = 0;
            for choice in self.state.generated_choices_mut() {
                if !choice.is_invisible_default {
                    choice.index = index;
                    index += 1;
                }
            }

            for f in &mut self.callbacks.on_did_continue {
                f();
            }
        }

        if self.state.has_error() || self.state.has_warning() {
            if !self.callbacks.on_error.is_empty() {
                let errors = mem::take(&mut self.state.current_errors);
                let warnings = mem::take(&mut self.state.current_warnings);
                for message in &errors {
                    for f in &mut self.callbacks.on_error {
                        f(message, Severity::Error);
                    }
                }
                for message in &warnings {
                    for f in &mut self.callbacks.on_error {
                        f(message, Severity::Warning);
                    }
                }
            } else {
                let first = self
                    .state
                    .current_errors
                    .first()
                    .or_else(|| self.state.current_warnings.first())
                    .cloned()
                    .unwrap_or_default();
                return Err(StoryError::Runtime(first));
            }
        }

        self.notify_observers(changed_vars);
        Ok(())
    }

    /// One step plus the newline-lookahead bookkeeping. Returns whether
    /// the current line is definitely complete.
    fn continue_single_step(&mut self) -> Result<bool, String> {
        self.step()?;

        if !self.can_continue() && !self.state.callstack().element_is_host_eval() {
            self.try_follow_default_invisible_choice()?;
        }

        if !self.state.in_string_evaluation() {
            if self.snapshot_at_last_newline.is_some() {
                let mut restore = false;
                let mut discard = false;
                {
                    // Disjoint borrows: the snapshot and the live state
                    // are separate fields.
                    let snapshot = self
                        .snapshot_at_last_newline
                        .as_mut()
                        .expect("checked above");
                    let prev_text_len = snapshot.current_text().len();
                    let prev_text_ended_in_newline = snapshot
                        .current_text()
                        .ends_with('\n');
                    let prev_tag_count = snapshot.current_tags().len();
                    let curr_tag_count = self.state.current_tags().len();
                    let curr_text = self.state.current_text();
                    let change = output_state_change(
                        prev_text_len,
                        prev_text_ended_in_newline,
                        curr_text,
                        prev_tag_count,
                        curr_tag_count,
                    );
                    match change {
                        OutputStateChange::ExtendedBeyondNewline => restore = true,
                        OutputStateChange::NewlineRemoved => discard = true,
                        OutputStateChange::NoChange => {}
                    }
                }
                if restore || self.saw_lookahead_unsafe_after_newline {
                    self.restore_state_snapshot();
                    return Ok(true);
                }
                if discard {
                    self.discard_snapshot();
                }
            }

            if self.state.output_ref().ends_in_newline() {
                if self.can_continue() {
                    if self.snapshot_at_last_newline.is_none() {
                        self.state_snapshot();
                    }
                } else {
                    self.discard_snapshot();
                }
            }
        }

        Ok(false)
    }

    // ── Stepping ────────────────────────────────────────────────

    fn step(&mut self) -> Result<(), String> {
        let doc = Arc::clone(&self.doc);
        let Some(mut pointer) = self.state.current_pointer() else {
            return Ok(());
        };

        // Step straight into the deepest first element, recording entry
        // into every container passed on the way down.
        let mut entered = pointer.resolve(&doc.arena);
        while let Some(id) = entered {
            let Some(container) = doc.arena.container(id) else { break };
            self.visit_container(id, true);
            if container.content.is_empty() {
                break;
            }
            pointer = Pointer::start_of(id);
            entered = pointer.resolve(&doc.arena);
        }
        self.state.set_current_pointer(Some(pointer));

        let Some(current) = pointer.resolve(&doc.arena) else {
            self.next_content()?;
            return Ok(());
        };

        let is_logic = self.perform_logic_and_flow_control(current)?;

        // Flow may have been ended by the content just executed.
        if self.state.current_pointer().is_none() {
            return Ok(());
        }

        let mut should_add_to_stream = !is_logic;

        if let NodeKind::Choice(cp) = doc.arena.kind(current) {
            let cp = cp.clone();
            if let Some(choice) = self.process_choice(current, &cp)? {
                self.state.generated_choices_mut().push(choice);
            }
            should_add_to_stream = false;
        }

        // A container with no behavior of its own is a grouping no-op.
        if doc.arena.kind(current).is_container() {
            should_add_to_stream = false;
        }

        if should_add_to_stream {
            match doc.arena.kind(current) {
                NodeKind::Value(value) => {
                    // Late-resolve the context of unbound variable
                    // pointers before they land anywhere.
                    let value = match value {
                        Value::VariablePointer {
                            name,
                            context_index: -1,
                        } => Value::VariablePointer {
                            name: name.clone(),
                            context_index: self.state.callstack().context_for_variable(name),
                        },
                        other => other.clone(),
                    };
                    if self.state.in_expression_evaluation() {
                        self.state.push_eval_value(value);
                    } else {
                        self.state
                            .push_to_output(OutEntry::Text(value.to_output_string()));
                    }
                }
                NodeKind::Glue => self.state.push_to_output(OutEntry::Glue),
                NodeKind::Tag(text) => {
                    self.state.push_to_output(OutEntry::Tag(text.clone()));
                }
                _ => {}
            }
        }

        self.next_content()?;

        // Thread forking happens after advancement so the fork resumes
        // past the marker.
        if matches!(
            doc.arena.kind(current),
            NodeKind::Command(CommandKind::StartThread)
        ) {
            self.state.callstack_mut().push_thread();
        }

        Ok(())
    }

    fn visit_container(&mut self, container: NodeId, at_start: bool) {
        let Some(c) = self.doc.arena.container(container) else { return };
        if c.counting_at_start_only && !at_start {
            return;
        }
        let visits = c.visits_counted;
        let turns = c.turn_index_counted;
        if visits {
            self.state.increment_visit_count(container);
        }
        if turns {
            self.state.record_turn_index_visit(container);
        }
    }

    /// On each applied divert, fire entry notifications for containers
    /// newly entered relative to the previous position.
    fn visit_changed_containers_due_to_divert(&mut self) {
        let doc = Arc::clone(&self.doc);
        let previous = self.state.previous_pointer();
        let Some(pointer) = self.state.current_pointer() else { return };
        if pointer.index.is_none() {
            return;
        }

        let mut prev_containers: HashSet<NodeId> = HashSet::new();
        if let Some(prev) = previous {
            let mut ancestor = prev
                .resolve(&doc.arena)
                .filter(|id| doc.arena.container(*id).is_some())
                .or(Some(prev.container));
            while let Some(a) = ancestor {
                prev_containers.insert(a);
                ancestor = doc.arena.parent_of(a);
            }
        }

        let Some(mut current_child) = pointer.resolve(&doc.arena) else {
            return;
        };
        let mut ancestor = doc.arena.parent_of(current_child);
        let mut all_children_at_start = true;
        while let Some(a) = ancestor {
            let Some(container) = doc.arena.container(a) else { break };
            if prev_containers.contains(&a) && !container.counting_at_start_only {
                break;
            }
            let entering_at_start = container
                .content
                .first()
                .is_some_and(|&first| first == current_child)
                && all_children_at_start;
            if !entering_at_start {
                all_children_at_start = false;
            }
            self.visit_container(a, entering_at_start);
            current_child = a;
            ancestor = doc.arena.parent_of(a);
        }
    }

    // ── Pointer advancement ─────────────────────────────────────

    fn next_content(&mut self) -> Result<(), String> {
        self.state.set_previous_pointer(self.state.current_pointer());

        // Diverts take precedence over stepping to the next sibling.
        if let Some(diverted) = self.state.diverted_pointer.take() {
            self.state.set_current_pointer(Some(diverted));
            self.visit_changed_containers_due_to_divert();
            if self.state.current_pointer().is_some() {
                return Ok(());
            }
        }

        if !self.increment_content_pointer() {
            let mut did_pop = false;
            if self.state.callstack().can_pop(Some(FrameKind::Function)) {
                // Implicit function return with no value.
                self.state.pop_callstack(Some(FrameKind::Function))?;
                if self.state.in_expression_evaluation() {
                    self.state.push_eval_value(Value::Void);
                }
                did_pop = true;
            } else if self.state.callstack().can_pop_thread() {
                self.state.callstack_mut().pop_thread()?;
                did_pop = true;
            } else {
                self.state.try_exit_function_evaluation_from_game();
            }
            if did_pop && self.state.current_pointer().is_some() {
                self.next_content()?;
            }
        }
        Ok(())
    }

    /// Advance within the current container, walking up to the next
    /// sibling of an exhausted container. False when content ran out.
    fn increment_content_pointer(&mut self) -> bool {
        let doc = Arc::clone(&self.doc);
        let frame = self.state.callstack_mut().current_frame_mut();
        let Some(pointer) = frame.pointer else { return false };

        let mut container_id = pointer.container;
        let mut index = pointer.index.map_or(0, |i| i + 1);
        let mut successful = true;
        loop {
            let Some(container) = doc.arena.container(container_id) else {
                successful = false;
                break;
            };
            if index < container.content.len() {
                break;
            }
            successful = false;
            let node = doc.arena.node(container_id);
            let Some(parent) = node.parent else { break };
            let Some(parent_container) = doc.arena.container(parent) else {
                break;
            };
            // Named-only content has no sibling position to advance to.
            if parent_container.content.get(node.index_in_parent) != Some(&container_id) {
                break;
            }
            index = node.index_in_parent + 1;
            container_id = parent;
            successful = true;
        }

        frame.pointer = if successful {
            Some(Pointer {
                container: container_id,
                index: Some(index),
            })
        } else {
            None
        };
        successful
    }

    // ── Flow control dispatch ───────────────────────────────────

    /// Execute flow-control content. Returns true when the object was
    /// consumed here (and therefore never reaches the streams).
    fn perform_logic_and_flow_control(&mut self, current: NodeId) -> Result<bool, String> {
        let doc = Arc::clone(&self.doc);
        match doc.arena.kind(current) {
            NodeKind::Divert(divert) => {
                let divert = divert.clone();
                if divert.is_conditional {
                    let condition = self.state.pop_value()?;
                    if !condition.is_truthy()? {
                        return Ok(true);
                    }
                }

                match &divert.target {
                    DivertTarget::Variable(name) => match self.state.get_variable(name) {
                        Some(Value::DivertTarget(path)) => {
                            self.state.diverted_pointer = self.pointer_at_path(&path)?;
                        }
                        Some(other) => {
                            return Err(format!(
                                "tried to divert to a target from variable '{}', but it contained a {} instead of a divert target",
                                name,
                                other.type_name()
                            ));
                        }
                        None => {
                            return Err(format!(
                                "tried to divert using a target from a variable that could not be found ({})",
                                name
                            ));
                        }
                    },
                    DivertTarget::Path(path) => {
                        if divert.is_external {
                            self.call_external_function(
                                &path.to_string(),
                                divert.external_args,
                            )?;
                            return Ok(true);
                        }
                        self.state.diverted_pointer = self.pointer_at_path(path)?;
                    }
                }

                if let Some(push) = divert.push {
                    let output_len = self.state.output_ref().len();
                    self.state
                        .callstack_mut()
                        .push(push.into(), 0, Some(output_len));
                }

                if self.state.diverted_pointer.is_none() && !divert.is_external {
                    return Err(format!("divert resolution failed: {:?}", divert.target));
                }
                Ok(true)
            }

            NodeKind::Command(cmd) => {
                self.perform_command(*cmd)?;
                Ok(true)
            }

            NodeKind::VarAssign(assignment) => {
                let assignment = assignment.clone();
                let value = self.state.pop_value()?;
                let notify = self.state.assign_variable(&assignment, value)?;
                self.notify_observers(notify.into_iter().collect());
                Ok(true)
            }

            NodeKind::VarRef(reference) => {
                match reference {
                    VariableReference::Named(name) => {
                        let name = name.clone();
                        match self.state.get_variable(&name) {
                            Some(value) => self.state.push_eval_value(value),
                            None => return Err(format!("unresolved variable: {}", name)),
                        }
                    }
                    VariableReference::Count(path) => {
                        let path = path.clone();
                        let container = doc
                            .arena
                            .content_at_path(doc.root, &path, path.len())
                            .exact()
                            .filter(|id| doc.arena.container(*id).is_some())
                            .ok_or_else(|| {
                                format!("failed to find container for read count: {}", path)
                            })?;
                        let count = self.visit_count_checked(container)?;
                        self.state.push_eval_value(Value::Int(count));
                    }
                }
                Ok(true)
            }

            NodeKind::Native(op) => {
                let op = *op;
                let args = self.state.pop_values(op.arity())?;
                let result = ops::evaluate(op, args, &doc.list_defs)?;
                self.state.push_eval_value(result);
                Ok(true)
            }

            _ => Ok(false),
        }
    }

    fn perform_command(&mut self, cmd: CommandKind) -> Result<(), String> {
        let doc = Arc::clone(&self.doc);
        match cmd {
            CommandKind::EvalStart => {
                if self.state.in_expression_evaluation() {
                    return Err("already in expression evaluation".into());
                }
                self.state.set_in_expression_evaluation(true);
            }
            CommandKind::EvalEnd => {
                if !self.state.in_expression_evaluation() {
                    return Err("not in expression evaluation".into());
                }
                self.state.set_in_expression_evaluation(false);
            }
            CommandKind::EvalOutput => {
                let value = self.state.pop_value()?;
                let text = value.to_output_string();
                if !text.is_empty() {
                    self.state.push_to_output(OutEntry::Text(text));
                }
            }
            CommandKind::Duplicate => {
                let top = self
                    .state
                    .peek_eval()
                    .cloned()
                    .ok_or("evaluation stack underflow")?;
                self.state.push_eval(top);
            }
            CommandKind::PopEvaluated => {
                self.state.pop_eval()?;
            }
            CommandKind::PopFunction | CommandKind::PopTunnel => {
                self.perform_pop_command(cmd)?;
            }
            CommandKind::BeginString => {
                if !self.state.in_expression_evaluation() {
                    return Err("expected to be in an expression when evaluating a string".into());
                }
                self.state.push_to_output(OutEntry::BeginString);
                self.state.set_in_expression_evaluation(false);
            }
            CommandKind::EndString => {
                let mut parts: Vec<String> = Vec::new();
                let mut retained: Vec<OutEntry> = Vec::new();
                let mut consumed = 0;
                for entry in self.state.output_ref().entries().iter().rev() {
                    consumed += 1;
                    match entry {
                        OutEntry::BeginString => break,
                        OutEntry::Tag(t) => retained.push(OutEntry::Tag(t.clone())),
                        OutEntry::Text(s) => parts.push(s.clone()),
                        _ => {}
                    }
                }
                self.state.output().pop_n(consumed);
                retained.reverse();
                for tag in retained {
                    self.state.push_to_output(tag);
                }
                parts.reverse();
                self.state.set_in_expression_evaluation(true);
                self.state.push_eval_value(Value::Str(parts.concat()));
            }
            CommandKind::NoOp => {}
            CommandKind::ChoiceCount => {
                let count = self.state.generated_choices().len() as i64;
                self.state.push_eval_value(Value::Int(count));
            }
            CommandKind::Turns => {
                let turns = self.state.current_turn_index + 1;
                self.state.push_eval_value(Value::Int(turns));
            }
            CommandKind::TurnsSince | CommandKind::ReadCount => {
                let path = match self.state.pop_value()? {
                    Value::DivertTarget(path) => path,
                    other => {
                        let extra = if matches!(other, Value::Int(_)) {
                            ". Did you accidentally pass a read count ('knot_name') instead of a target ('-> knot_name')?"
                        } else {
                            ""
                        };
                        return Err(format!(
                            "TURNS_SINCE / READ_COUNT expected a divert target, but saw {}{}",
                            other.type_name(),
                            extra
                        ));
                    }
                };
                let container = doc
                    .arena
                    .content_at_path(doc.root, &path, path.len())
                    .exact()
                    .filter(|id| doc.arena.container(*id).is_some());
                let count = match container {
                    Some(container) => {
                        if cmd == CommandKind::TurnsSince {
                            self.turns_since_checked(container)?
                        } else {
                            self.visit_count_checked(container)?
                        }
                    }
                    None => {
                        self.state.add_warning(format!(
                            "failed to find container for {} lookup at '{}'",
                            if cmd == CommandKind::TurnsSince {
                                "TURNS_SINCE"
                            } else {
                                "READ_COUNT"
                            },
                            path
                        ));
                        if cmd == CommandKind::TurnsSince {
                            -1
                        } else {
                            0
                        }
                    }
                };
                self.state.push_eval_value(Value::Int(count));
            }
            CommandKind::Random => {
                let max = self
                    .state
                    .pop_value()?
                    .as_int()
                    .ok_or("RANDOM was called with a non-integer maximum")?;
                let min = self
                    .state
                    .pop_value()?
                    .as_int()
                    .ok_or("RANDOM was called with a non-integer minimum")?;
                if min > max {
                    return Err(format!(
                        "RANDOM was called with minimum as {} and maximum as {}; the maximum must be larger",
                        min, max
                    ));
                }
                let range = (max - min + 1) as u64;
                let seed = self.state.story_seed.wrapping_add(self.state.previous_random);
                let mut rng = StdRng::seed_from_u64(seed);
                let next_random: u64 = rng.random::<u32>() as u64;
                let chosen = (next_random % range) as i64 + min;
                self.state.previous_random = next_random;
                self.state.push_eval_value(Value::Int(chosen));
            }
            CommandKind::SeedRandom => {
                let seed = self
                    .state
                    .pop_value()?
                    .as_int()
                    .ok_or("expected an integer for SEED_RANDOM")?;
                self.state.story_seed = seed as u64;
                self.state.previous_random = 0;
                self.state.push_eval_value(Value::Void);
            }
            CommandKind::VisitIndex => {
                let Some(pointer) = self.state.current_pointer() else {
                    return Err("no current content for visit index".into());
                };
                let count = self.visit_count_checked(pointer.container)? - 1;
                self.state.push_eval_value(Value::Int(count));
            }
            CommandKind::SequenceShuffleIndex => {
                let index = self.next_sequence_shuffle_index()?;
                self.state.push_eval_value(Value::Int(index));
            }
            CommandKind::StartThread => {
                // Handled after pointer advancement, in `step`.
            }
            CommandKind::Done => {
                if self.state.callstack().can_pop_thread() {
                    self.state.callstack_mut().pop_thread()?;
                } else {
                    self.state.did_safe_exit = true;
                    self.state.set_current_pointer(None);
                }
            }
            CommandKind::End => {
                self.state.force_end();
            }
            CommandKind::ListFromInt => {
                let value = self
                    .state
                    .pop_value()?
                    .as_int()
                    .ok_or("passed non-integer when creating a list element from a numerical value")?;
                let Value::Str(list_name) = self.state.pop_value()? else {
                    return Err("expected a list name when creating a list element".into());
                };
                let def = doc
                    .list_defs
                    .def(&list_name)
                    .ok_or_else(|| format!("failed to find list called {}", list_name))?;
                let list = match def.item_with_value(value) {
                    Some((item_name, v)) => ListValue::single(
                        skein_runtime::list::ListItem::new(def.name.clone(), item_name.clone()),
                        v,
                    ),
                    None => ListValue::default(),
                };
                self.state.push_eval_value(Value::List(list));
            }
            CommandKind::ListRange => {
                let max = self.state.pop_value()?;
                let min = self.state.pop_value()?;
                let Value::List(target) = self.state.pop_value()? else {
                    return Err("expected list value for LIST_RANGE".into());
                };
                let min_value = list_range_bound(&min, true)?;
                let max_value = list_range_bound(&max, false)?;
                let result = target.with_value_range(min_value, max_value);
                self.state.push_eval_value(Value::List(result));
            }
            CommandKind::ListRandom => {
                let Value::List(list) = self.state.pop_value()? else {
                    return Err("expected list value when calling LIST_RANDOM".into());
                };
                let result = if list.is_empty() {
                    list.inheriting_empty()
                } else {
                    let seed = self.state.story_seed.wrapping_add(self.state.previous_random);
                    let mut rng = StdRng::seed_from_u64(seed);
                    let next_random: u64 = rng.random::<u32>() as u64;
                    let index = (next_random % list.len() as u64) as usize;
                    let (item, value) = list.ordered_entries()[index];
                    self.state.previous_random = next_random;
                    ListValue::single(item.clone(), value)
                };
                self.state.push_eval_value(Value::List(result));
            }
            CommandKind::BeginTag => {
                self.state.push_to_output(OutEntry::BeginTag);
            }
            CommandKind::EndTag => {
                if self.state.in_string_evaluation() {
                    // A tag inside evaluated choice text: collect it onto
                    // the evaluation stack for the choice to pick up.
                    let mut parts: Vec<String> = Vec::new();
                    let mut consumed = 0;
                    for entry in self.state.output_ref().entries().iter().rev() {
                        consumed += 1;
                        match entry {
                            OutEntry::BeginTag => break,
                            OutEntry::Text(s) => parts.push(s.clone()),
                            OutEntry::Tag(_) | OutEntry::Glue => {}
                            _ => {
                                return Err(
                                    "unexpected entry while extracting tag from choice".into()
                                );
                            }
                        }
                    }
                    self.state.output().pop_n(consumed);
                    parts.reverse();
                    let text = clean_whitespace(&parts.concat());
                    self.state.push_eval(EvalObject::Tag(text));
                } else {
                    self.state.push_to_output(OutEntry::EndTag);
                }
            }
        }
        Ok(())
    }

    fn perform_pop_command(&mut self, cmd: CommandKind) -> Result<(), String> {
        let pop_kind = if cmd == CommandKind::PopFunction {
            FrameKind::Function
        } else {
            FrameKind::Tunnel
        };

        // A tunnel return may override its destination.
        let mut override_target: Option<Path> = None;
        if pop_kind == FrameKind::Tunnel {
            match self.state.pop_value()? {
                Value::DivertTarget(path) => override_target = Some(path),
                Value::Void => {}
                other => {
                    return Err(format!(
                        "expected void if ->-> doesn't override target, found {}",
                        other.type_name()
                    ));
                }
            }
        }

        if self.state.try_exit_function_evaluation_from_game() {
            return Ok(());
        }

        let current_kind = self.state.callstack().current_frame().kind;
        if current_kind != pop_kind || !self.state.callstack().can_pop(None) {
            let expected = if !self.state.callstack().can_pop(None) {
                "end of flow (-> END or choice)"
            } else {
                match current_kind {
                    FrameKind::Function => "function return statement (~ return)",
                    FrameKind::Tunnel => "tunnel onwards statement (->->)",
                    _ => "end of flow (-> END or choice)",
                }
            };
            let found = match pop_kind {
                FrameKind::Function => "function return statement (~ return)",
                _ => "tunnel onwards statement (->->)",
            };
            return Err(format!("found {}, when expected {}", found, expected));
        }

        self.state.pop_callstack(None)?;
        if let Some(path) = override_target {
            self.state.diverted_pointer = self.pointer_at_path(&path)?;
        }
        Ok(())
    }

    // ── Choices ─────────────────────────────────────────────────

    fn process_choice(
        &mut self,
        choice_point: NodeId,
        cp: &ChoicePoint,
    ) -> Result<Option<Choice>, String> {
        let doc = Arc::clone(&self.doc);
        let mut show_choice = true;

        if cp.has_condition {
            let condition = self.state.pop_value()?;
            if !condition.is_truthy()? {
                show_choice = false;
            }
        }

        let mut tags: Vec<String> = Vec::new();
        let mut choice_only_text = String::new();
        let mut start_text = String::new();
        if cp.has_choice_only_content {
            choice_only_text = self.pop_choice_string_and_tags(&mut tags)?;
        }
        if cp.has_start_content {
            start_text = self.pop_choice_string_and_tags(&mut tags)?;
        }

        let target = doc
            .arena
            .resolve_path(doc.root, choice_point, &cp.target_path)
            .exact()
            .filter(|id| doc.arena.container(*id).is_some())
            .ok_or_else(|| format!("failed to find choice target at '{}'", cp.target_path))?;

        if cp.once_only {
            let visit_count = self.visit_count_checked(target)?;
            if visit_count > 0 {
                show_choice = false;
            }
        }

        if !show_choice {
            return Ok(None);
        }

        let thread = self.state.callstack_mut().fork_thread();
        let text = format!("{}{}", start_text, choice_only_text);
        Ok(Some(Choice {
            text: text.trim_matches([' ', '\t']).to_string(),
            source_path: doc.arena.path_to(choice_point).to_string(),
            target_path: doc.arena.path_to(target),
            is_invisible_default: cp.invisible_default,
            tags,
            index: 0,
            original_thread_index: thread.index,
            thread_at_generation: thread,
        }))
    }

    fn pop_choice_string_and_tags(&mut self, tags: &mut Vec<String>) -> Result<String, String> {
        let Value::Str(text) = self.state.pop_value()? else {
            return Err("expected string value for choice content".into());
        };
        while matches!(self.state.peek_eval(), Some(EvalObject::Tag(_))) {
            if let EvalObject::Tag(tag) = self.state.pop_eval()? {
                tags.insert(0, tag);
            }
        }
        Ok(text)
    }

    /// When continuation stalls with only invisible-default choices
    /// outstanding, follow the first one automatically.
    fn try_follow_default_invisible_choice(&mut self) -> Result<(), String> {
        let all = self.state.generated_choices();
        let invisible_count = all.iter().filter(|c| c.is_invisible_default).count();
        if invisible_count == 0 || all.len() > invisible_count {
            return Ok(());
        }
        let choice = all
            .iter()
            .find(|c| c.is_invisible_default)
            .cloned()
            .expect("counted above");

        self.state
            .callstack_mut()
            .set_current_thread(choice.thread_at_generation.clone());
        // If a lookahead snapshot is held, this follow is speculative;
        // fork so the saved thread stays pristine for a possible rewind.
        if self.snapshot_at_last_newline.is_some() {
            let fork = self.state.callstack_mut().fork_thread();
            self.state.callstack_mut().set_current_thread(fork);
        }
        self.choose_path(&choice.target_path, false)
    }

    // ── Path navigation ─────────────────────────────────────────

    fn pointer_at_path(&mut self, path: &Path) -> Result<Option<Pointer>, String> {
        if path.is_empty() {
            return Ok(None);
        }
        let doc = Arc::clone(&self.doc);

        let (resolve_len, tail_index) = match path.last() {
            Some(Component::Index(i)) => (path.len() - 1, Some(*i)),
            _ => (path.len(), None),
        };

        let result = doc.arena.content_at_path(doc.root, path, resolve_len);
        let obj = result.obj;
        if obj.is_none() || (obj == Some(doc.root) && resolve_len > 0) {
            return Err(format!(
                "failed to find content at path '{}', and no approximation of it was possible",
                path
            ));
        }
        let obj = obj.expect("checked above");
        if result.approximate {
            self.state.add_warning(format!(
                "failed to find content at path '{}', so it was approximated to '{}'",
                path,
                doc.arena.path_to(obj)
            ));
        }
        if doc.arena.container(obj).is_none() {
            return Err(format!(
                "content at path '{}' is not a container, cannot point into it",
                path
            ));
        }
        Ok(Some(Pointer {
            container: obj,
            index: tail_index,
        }))
    }

    fn choose_path(&mut self, path: &Path, incrementing_turn_index: bool) -> Result<(), String> {
        self.state.generated_choices_mut().clear();
        let mut pointer = self.pointer_at_path(path)?;
        if let Some(p) = &mut pointer {
            if p.index.is_none() {
                p.index = Some(0);
            }
        }
        self.state.set_current_pointer(pointer);
        if incrementing_turn_index {
            self.state.current_turn_index += 1;
        }
        self.visit_changed_containers_due_to_divert();
        Ok(())
    }

    // ── Choice selection API ────────────────────────────────────

    /// The choices available to present, in generation order. Empty
    /// while the story can still continue.
    pub fn current_choices(&self) -> Vec<&Choice> {
        if self.can_continue() {
            return Vec::new();
        }
        self.state
            .generated_choices()
            .iter()
            .filter(|c| !c.is_invisible_default)
            .collect()
    }

    pub fn choose_choice_index(&mut self, index: usize) -> Result<(), StoryError> {
        let choice = {
            let choices = self.current_choices();
            let count = choices.len();
            match choices.get(index) {
                Some(choice) => (*choice).clone(),
                None => return Err(StoryError::OutOfRangeChoice { index, count }),
            }
        };
        for f in &mut self.callbacks.on_make_choice {
            f(&choice);
        }
        self.state
            .callstack_mut()
            .set_current_thread(choice.thread_at_generation.clone());
        self.choose_path(&choice.target_path, true)
            .map_err(StoryError::Runtime)
    }

    /// Jump directly to a content path, optionally passing arguments.
    pub fn choose_path_string(
        &mut self,
        path: &str,
        reset_callstack: bool,
        args: &[Value],
    ) -> Result<(), StoryError> {
        self.if_async_we_cant("call choose_path_string right now")?;
        for f in &mut self.callbacks.on_choose_path_string {
            f(path, args);
        }
        if reset_callstack {
            self.reset_callstack()?;
        } else if self.state.callstack().current_frame().kind == FrameKind::Function {
            return Err(StoryError::BadArgument(format!(
                "story was in a function when choose_path_string('{}') was called; \
                 the callstack would be broken - pass reset_callstack = true",
                path
            )));
        }
        self.state.pass_arguments_to_evaluation_stack(args)?;
        self.choose_path(&Path::parse(path), true)
            .map_err(StoryError::Runtime)
    }

    // ── External functions ──────────────────────────────────────

    pub fn bind_external_function(
        &mut self,
        name: &str,
        lookahead_safe: bool,
        func: impl FnMut(&[Value]) -> Option<Value> + 'static,
    ) -> Result<(), StoryError> {
        if self.externals.contains_key(name) {
            return Err(StoryError::BadArgument(format!(
                "function '{}' has already been bound",
                name
            )));
        }
        self.externals.insert(
            name.to_string(),
            ExternalFunction {
                func: Box::new(func),
                lookahead_safe,
            },
        );
        Ok(())
    }

    pub fn unbind_external_function(&mut self, name: &str) -> Result<(), StoryError> {
        match self.externals.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoryError::BadArgument(format!(
                "function '{}' has not been bound",
                name
            ))),
        }
    }

    /// When an external is unbound, fall back to a same-named knot
    /// instead of failing. On by default.
    pub fn set_allow_external_function_fallbacks(&mut self, allow: bool) {
        self.allow_external_fallbacks = allow;
    }

    fn call_external_function(&mut self, name: &str, num_args: usize) -> Result<(), String> {
        match self.externals.get(name) {
            Some(external) => {
                if !external.lookahead_safe && self.state.in_string_evaluation() {
                    return Err(format!(
                        "external function '{}' could not be called because it is not lookahead-safe and a string is being evaluated",
                        name
                    ));
                }
                if !external.lookahead_safe && self.snapshot_at_last_newline.is_some() {
                    // Must not speculatively execute: force the lookahead
                    // to rewind to the newline instead.
                    self.saw_lookahead_unsafe_after_newline = true;
                    return Ok(());
                }
            }
            None => {
                if self.allow_external_fallbacks {
                    let container = self.doc.knot_with_name(name).ok_or_else(|| {
                        format!(
                            "trying to call external function '{}' which has not been bound, and fallback content could not be found",
                            name
                        )
                    })?;
                    let output_len = self.state.output_ref().len();
                    self.state
                        .callstack_mut()
                        .push(FrameKind::Function, 0, Some(output_len));
                    self.state.diverted_pointer = Some(Pointer::start_of(container));
                    return Ok(());
                }
                return Err(format!(
                    "trying to call external function '{}' which has not been bound",
                    name
                ));
            }
        }

        let args = self.state.pop_values(num_args)?;
        let external = self
            .externals
            .get_mut(name)
            .expect("checked present above");
        let result = (external.func)(&args);
        let value = match result {
            None => Value::Void,
            Some(
                v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_)),
            ) => v,
            Some(other) => {
                return Err(format!(
                    "external function '{}' returned invalid type {}",
                    name,
                    other.type_name()
                ));
            }
        };
        self.state.push_eval_value(value);
        Ok(())
    }

    // ── Host function evaluation ────────────────────────────────

    /// Evaluate a named story function outside the normal flow,
    /// returning its printed text and its return value.
    pub fn evaluate_function(
        &mut self,
        name: &str,
        args: &[Value],
    ) -> Result<(String, Option<Value>), StoryError> {
        self.if_async_we_cant("evaluate a function")?;
        if name.trim().is_empty() {
            return Err(StoryError::BadArgument(
                "function name must be non-empty".into(),
            ));
        }
        let container = self.doc.knot_with_name(name).ok_or_else(|| {
            StoryError::BadArgument(format!("function doesn't exist: '{}'", name))
        })?;

        for f in &mut self.callbacks.on_evaluate_function {
            f(name, args);
        }

        self.state
            .start_function_evaluation_from_game(container, args)?;

        let mut text = String::new();
        while self.can_continue() {
            self.continue_internal(None)?;
            let line = self.state.current_text().to_string();
            text.push_str(&line);
        }

        let result = self.state.complete_function_evaluation_from_game()?;
        for f in &mut self.callbacks.on_complete_evaluate_function {
            f(name, args, &text, result.as_ref());
        }
        Ok((text, result))
    }

    // ── Randomness ──────────────────────────────────────────────

    /// Deterministic per-(seed, loop, container) shuffled sequence
    /// index: each loop through a shuffle visits every element once in
    /// a seed-stable order.
    fn next_sequence_shuffle_index(&mut self) -> Result<i64, String> {
        let num_elements = self
            .state
            .pop_value()?
            .as_int()
            .ok_or("expected number of elements in sequence for shuffle index")?;
        if num_elements <= 0 {
            return Err("sequence shuffle requires at least one element".into());
        }
        let Some(pointer) = self.state.current_pointer() else {
            return Err("no current content for sequence shuffle".into());
        };
        let seq_count = self
            .state
            .pop_value()?
            .as_int()
            .ok_or("expected sequence count for shuffle index")?;

        let loop_index = seq_count / num_elements;
        let iteration_index = seq_count % num_elements;

        let path_key = self
            .doc
            .arena
            .container(pointer.container)
            .map(|c| c.path_str.clone())
            .unwrap_or_default();
        let sequence_hash: u64 = path_key.bytes().map(u64::from).sum();
        let seed = sequence_hash
            .wrapping_add(loop_index as u64)
            .wrapping_add(self.state.story_seed);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut unpicked: Vec<i64> = (0..num_elements).collect();
        for i in 0..=iteration_index {
            let chosen = rng.random_range(0..unpicked.len());
            let chosen_index = unpicked.remove(chosen);
            if i == iteration_index {
                return Ok(chosen_index);
            }
        }
        Err("sequence shuffle failed to pick an element".into())
    }

    // ── Visit count access (flag-checked) ───────────────────────

    fn visit_count_checked(&mut self, container: NodeId) -> Result<i64, String> {
        let c = self
            .doc
            .arena
            .container(container)
            .ok_or("visit count requested for non-container")?;
        if !c.visits_counted {
            return Err(format!(
                "read count for target '{}' unknown; the story may need to be compiled with visit counting enabled",
                c.path_str
            ));
        }
        Ok(self.state.visit_count(container))
    }

    fn turns_since_checked(&mut self, container: NodeId) -> Result<i64, String> {
        let c = self
            .doc
            .arena
            .container(container)
            .ok_or("turn index requested for non-container")?;
        if !c.turn_index_counted {
            return Err(format!(
                "TURNS_SINCE() for target '{}' unknown; the story may need to be compiled with turn counting enabled",
                c.path_str
            ));
        }
        Ok(self.state.turns_since(container))
    }

    // ── Snapshots and background saving ─────────────────────────

    fn state_snapshot(&mut self) {
        let copy = self.state.copy_and_start_patching();
        self.snapshot_at_last_newline = Some(mem::replace(&mut self.state, copy));
    }

    fn restore_state_snapshot(&mut self) {
        if let Some(snapshot) = self.snapshot_at_last_newline.take() {
            self.state = snapshot;
            if !self.async_saving {
                self.state.apply_any_patch();
            }
        }
    }

    fn discard_snapshot(&mut self) {
        if !self.async_saving {
            self.state.apply_any_patch();
        }
        self.snapshot_at_last_newline = None;
    }

    /// Hand the current state to a background saver by ownership
    /// transfer; the live state becomes a copy-on-write clone whose
    /// writes land in a fresh patch until `background_save_complete`.
    pub fn copy_state_for_background_save(&mut self) -> Result<StoryState, StoryError> {
        self.if_async_we_cant("start saving on a background thread")?;
        if self.async_saving {
            return Err(StoryError::SaveInProgress);
        }
        let copy = self.state.copy_and_start_patching();
        let saved = mem::replace(&mut self.state, copy);
        self.async_saving = true;
        Ok(saved)
    }

    /// End the background-save window. The pending patch merges now,
    /// unless a newline snapshot is held, in which case the merge is
    /// deferred to the snapshot's own resolution.
    pub fn background_save_complete(&mut self) {
        if self.snapshot_at_last_newline.is_none() {
            self.state.apply_any_patch();
        }
        self.async_saving = false;
    }

    // ── Flows ───────────────────────────────────────────────────

    pub fn switch_flow(&mut self, name: &str) -> Result<(), StoryError> {
        self.if_async_we_cant("switch flow")?;
        if self.async_saving {
            return Err(StoryError::CannotSwitchFlowWhileSaving);
        }
        self.state.switch_flow(name)
    }

    pub fn switch_to_default_flow(&mut self) -> Result<(), StoryError> {
        self.switch_flow(DEFAULT_FLOW_NAME)
    }

    pub fn remove_flow(&mut self, name: &str) -> Result<(), StoryError> {
        self.state.remove_flow(name)
    }

    pub fn current_flow_name(&self) -> &str {
        self.state.current_flow_name()
    }

    pub fn current_flow_is_default(&self) -> bool {
        self.state.current_flow_is_default()
    }

    pub fn alive_flow_names(&self) -> Vec<String> {
        self.state.alive_flow_names()
    }

    // ── Resetting ───────────────────────────────────────────────

    pub fn reset_state(&mut self) -> Result<(), StoryError> {
        self.if_async_we_cant("reset state")?;
        self.state = StoryState::new(Arc::clone(&self.doc));
        self.reset_globals()
    }

    /// Unwind the callstack without touching variables or counts.
    pub fn reset_callstack(&mut self) -> Result<(), StoryError> {
        self.if_async_we_cant("reset callstack")?;
        self.state.force_end();
        Ok(())
    }

    fn reset_globals(&mut self) -> Result<(), StoryError> {
        if self.doc.knot_with_name(GLOBAL_DECL_NAME).is_some() {
            let original_pointer = self.state.current_pointer();
            self.choose_path(&Path::parse(GLOBAL_DECL_NAME), false)
                .map_err(StoryError::Runtime)?;
            self.continue_internal(None)?;
            self.state.set_current_pointer(original_pointer);
        }
        self.state.variables.snapshot_default_globals();
        Ok(())
    }

    // ── Observable state ────────────────────────────────────────

    pub fn current_text(&mut self) -> &str {
        self.state.current_text()
    }

    pub fn current_tags(&mut self) -> &[String] {
        self.state.current_tags()
    }

    pub fn current_errors(&self) -> &[String] {
        &self.state.current_errors
    }

    pub fn current_warnings(&self) -> &[String] {
        &self.state.current_warnings
    }

    pub fn has_error(&self) -> bool {
        self.state.has_error()
    }

    pub fn has_warning(&self) -> bool {
        self.state.has_warning()
    }

    // ── Variables ───────────────────────────────────────────────

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.state.get_variable(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<(), StoryError> {
        let declared = self.state.variables.declared_in_defaults(name)
            || self
                .state
                .variables
                .global_exists(name, self.state.patch.as_ref());
        if !declared {
            return Err(StoryError::BadArgument(format!(
                "cannot assign to variable '{}' because it hasn't been declared in the story",
                name
            )));
        }
        let notify = self.state.set_global_value(Name::from(name), value);
        self.notify_observers(notify.into_iter().collect());
        Ok(())
    }

    /// Observe changes to a named global. During a continue,
    /// notifications batch and fire once per changed variable at the
    /// outermost continue's end, in first-change order.
    pub fn observe_variable(
        &mut self,
        name: &str,
        observer: impl FnMut(&str, &Value) + 'static,
    ) -> Result<(), StoryError> {
        if !self
            .state
            .variables
            .global_exists(name, self.state.patch.as_ref())
        {
            return Err(StoryError::BadArgument(format!(
                "cannot observe variable '{}' because it wasn't declared in the story",
                name
            )));
        }
        self.observers
            .entry(Name::from(name))
            .or_default()
            .push(Box::new(observer));
        Ok(())
    }

    pub fn remove_variable_observers(&mut self, name: &str) {
        self.observers.remove(name);
    }

    fn notify_observers(&mut self, changed: Vec<(Name, Value)>) {
        for (name, value) in changed {
            if let Some(observers) = self.observers.get_mut(&name) {
                for f in observers {
                    f(name.as_str(), &value);
                }
            }
        }
    }

    // ── Callback registration ───────────────────────────────────

    pub fn on_error(&mut self, f: impl FnMut(&str, Severity) + 'static) {
        self.callbacks.on_error.push(Box::new(f));
    }

    pub fn on_did_continue(&mut self, f: impl FnMut() + 'static) {
        self.callbacks.on_did_continue.push(Box::new(f));
    }

    pub fn on_make_choice(&mut self, f: impl FnMut(&Choice) + 'static) {
        self.callbacks.on_make_choice.push(Box::new(f));
    }

    pub fn on_evaluate_function(&mut self, f: impl FnMut(&str, &[Value]) + 'static) {
        self.callbacks.on_evaluate_function.push(Box::new(f));
    }

    pub fn on_complete_evaluate_function(
        &mut self,
        f: impl FnMut(&str, &[Value], &str, Option<&Value>) + 'static,
    ) {
        self.callbacks.on_complete_evaluate_function.push(Box::new(f));
    }

    pub fn on_choose_path_string(&mut self, f: impl FnMut(&str, &[Value]) + 'static) {
        self.callbacks.on_choose_path_string.push(Box::new(f));
    }
}

// ── Newline lookahead classification ────────────────────────────

fn output_state_change(
    prev_text_len: usize,
    prev_text_ended_in_newline: bool,
    curr_text: &str,
    prev_tag_count: usize,
    curr_tag_count: usize,
) -> OutputStateChange {
    let newline_still_exists = curr_text.len() >= prev_text_len
        && prev_text_len > 0
        && prev_text_ended_in_newline
        && curr_text.as_bytes().get(prev_text_len - 1) == Some(&b'\n');
    if prev_tag_count == curr_tag_count
        && prev_text_len == curr_text.len()
        && newline_still_exists
    {
        return OutputStateChange::NoChange;
    }
    if !newline_still_exists {
        return OutputStateChange::NewlineRemoved;
    }
    if curr_tag_count > prev_tag_count {
        return OutputStateChange::ExtendedBeyondNewline;
    }
    for &b in &curr_text.as_bytes()[prev_text_len..] {
        if b != b' ' && b != b'\t' {
            return OutputStateChange::ExtendedBeyondNewline;
        }
    }
    OutputStateChange::NoChange
}

/// Bound of a `LIST_RANGE` call: an int, or a list's min/max value.
fn list_range_bound(value: &Value, is_min: bool) -> Result<i64, String> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::List(l) => Ok(if is_min {
            l.min_entry().map(|e| e.1).unwrap_or(i64::MIN)
        } else {
            l.max_entry().map(|e| e.1).unwrap_or(i64::MAX)
        }),
        other => Err(format!(
            "expected an integer or list bound for LIST_RANGE, got {}",
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_change_no_change_when_identical() {
        assert_eq!(
            output_state_change(6, true, "hello\n", 0, 0),
            OutputStateChange::NoChange
        );
    }

    #[test]
    fn output_change_whitespace_only_is_no_change() {
        assert_eq!(
            output_state_change(6, true, "hello\n  \t", 0, 0),
            OutputStateChange::NoChange
        );
    }

    #[test]
    fn output_change_content_extends() {
        assert_eq!(
            output_state_change(6, true, "hello\nmore", 0, 0),
            OutputStateChange::ExtendedBeyondNewline
        );
    }

    #[test]
    fn output_change_new_tag_extends() {
        assert_eq!(
            output_state_change(6, true, "hello\n", 0, 1),
            OutputStateChange::ExtendedBeyondNewline
        );
    }

    #[test]
    fn output_change_newline_removed_by_glue() {
        assert_eq!(
            output_state_change(6, true, "hello world", 0, 0),
            OutputStateChange::NewlineRemoved
        );
    }
}
