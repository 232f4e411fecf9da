use std::collections::HashMap;

use skein_runtime::object::PushKind;
use skein_runtime::{Name, NodeId, Pointer, Value};

// ── Frame kinds ─────────────────────────────────────────────────

/// How a callstack frame was created, which determines how it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The base frame of a thread; never popped.
    None,
    /// Pushed by a tunnel divert; expects an explicit `->->`.
    Tunnel,
    /// Pushed by a function-call divert; returns its evaluation result.
    Function,
    /// Pushed when the embedding host evaluates a story function
    /// directly; returns by capturing evaluation-stack growth.
    HostEval,
}

impl From<PushKind> for FrameKind {
    fn from(kind: PushKind) -> FrameKind {
        match kind {
            PushKind::Tunnel => FrameKind::Tunnel,
            PushKind::Function => FrameKind::Function,
        }
    }
}

impl FrameKind {
    /// The authoring construct that would have returned from this frame,
    /// for end-of-content diagnostics.
    pub fn missing_return_hint(self) -> &'static str {
        match self {
            FrameKind::Tunnel => {
                "unexpectedly reached end of content. Do you need a '->->' to return from a tunnel?"
            }
            FrameKind::Function => {
                "unexpectedly reached end of content. Do you need a '~ return'?"
            }
            _ => "ran out of content. Do you need a '-> DONE' or '-> END'?",
        }
    }
}

// ── Frame ───────────────────────────────────────────────────────

/// One callstack frame: an execution position plus its temporary
/// variable scope.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub pointer: Option<Pointer>,
    pub in_expression_evaluation: bool,
    pub temporaries: HashMap<Name, Value>,
    /// Evaluation-stack height when this frame was pushed; a host-eval
    /// frame's return value is whatever grew above this.
    pub eval_stack_height_on_push: usize,
    /// Output-stream length when a function frame was pushed; trailing
    /// whitespace back to here is trimmed when the function returns.
    /// Cleared (`None`) once the function emits non-whitespace content.
    pub function_start_in_output_stream: Option<usize>,
}

impl Frame {
    fn new(kind: FrameKind, pointer: Option<Pointer>) -> Frame {
        Frame {
            kind,
            pointer,
            in_expression_evaluation: false,
            temporaries: HashMap::new(),
            eval_stack_height_on_push: 0,
            function_start_in_output_stream: None,
        }
    }
}

// ── Thread ──────────────────────────────────────────────────────

/// An independently advancing slice of the callstack. Forked threads
/// share nothing with their parent: frames are cloned at fork time.
#[derive(Debug, Clone)]
pub struct Thread {
    pub frames: Vec<Frame>,
    pub index: u32,
    pub previous_pointer: Option<Pointer>,
}

// ── CallStack ───────────────────────────────────────────────────

/// A stack of threads, the active thread on top; each thread is a
/// stack of frames.
#[derive(Debug, Clone)]
pub struct CallStack {
    threads: Vec<Thread>,
    thread_counter: u32,
    start_of_root: Pointer,
}

impl CallStack {
    pub fn new(root: NodeId) -> CallStack {
        let mut stack = CallStack {
            threads: Vec::new(),
            thread_counter: 0,
            start_of_root: Pointer::start_of(root),
        };
        stack.reset();
        stack
    }

    pub fn reset(&mut self) {
        self.threads.clear();
        self.threads.push(Thread {
            frames: vec![Frame::new(FrameKind::None, Some(self.start_of_root))],
            index: 0,
            previous_pointer: None,
        });
    }

    // ── Threads ─────────────────────────────────────────────────

    pub fn current_thread(&self) -> &Thread {
        self.threads.last().expect("callstack always has a thread")
    }

    pub fn current_thread_mut(&mut self) -> &mut Thread {
        self.threads
            .last_mut()
            .expect("callstack always has a thread")
    }

    /// Replace the (single remaining) thread, restoring a thread saved
    /// at choice generation.
    pub fn set_current_thread(&mut self, thread: Thread) {
        debug_assert_eq!(
            self.threads.len(),
            1,
            "threads must be flat when restoring a choice thread"
        );
        self.threads.clear();
        self.threads.push(thread);
    }

    /// Fork the active thread and push the fork as the new active thread.
    pub fn push_thread(&mut self) {
        let fork = self.fork_thread();
        self.threads.push(fork);
    }

    /// Fork the active thread without pushing it.
    pub fn fork_thread(&mut self) -> Thread {
        let mut fork = self.current_thread().clone();
        self.thread_counter += 1;
        fork.index = self.thread_counter;
        fork
    }

    pub fn pop_thread(&mut self) -> Result<(), String> {
        if self.can_pop_thread() {
            self.threads.pop();
            Ok(())
        } else {
            Err("can't pop thread".into())
        }
    }

    pub fn can_pop_thread(&self) -> bool {
        self.threads.len() > 1 && !self.element_is_host_eval()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    // ── Frames ──────────────────────────────────────────────────

    pub fn frames(&self) -> &[Frame] {
        &self.current_thread().frames
    }

    pub fn frames_mut(&mut self) -> &mut Vec<Frame> {
        &mut self.current_thread_mut().frames
    }

    pub fn current_frame(&self) -> &Frame {
        self.frames().last().expect("thread always has a frame")
    }

    pub fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames_mut()
            .last_mut()
            .expect("thread always has a frame")
    }

    pub fn depth(&self) -> usize {
        self.frames().len()
    }

    pub fn element_is_host_eval(&self) -> bool {
        self.current_frame().kind == FrameKind::HostEval
    }

    /// Push a frame. The new frame inherits the current position as its
    /// return pointer; the engine redirects it via the diverted pointer.
    pub fn push(
        &mut self,
        kind: FrameKind,
        eval_stack_height: usize,
        output_stream_length: Option<usize>,
    ) {
        let pointer = self.current_frame().pointer;
        let mut frame = Frame::new(kind, pointer);
        frame.eval_stack_height_on_push = eval_stack_height;
        frame.function_start_in_output_stream = output_stream_length;
        self.frames_mut().push(frame);
    }

    /// Whether a frame of the given kind (or any kind, for `None`) can
    /// be popped.
    pub fn can_pop(&self, kind: Option<FrameKind>) -> bool {
        if self.depth() <= 1 {
            return false;
        }
        match kind {
            None => true,
            Some(kind) => self.current_frame().kind == kind,
        }
    }

    pub fn pop(&mut self, kind: Option<FrameKind>) -> Result<(), String> {
        if self.can_pop(kind) {
            self.frames_mut().pop();
            Ok(())
        } else {
            Err("mismatched push/pop in callstack".into())
        }
    }

    // ── Temporary variables ─────────────────────────────────────

    /// Context index for a variable by the pointer convention: 0 for a
    /// global, otherwise the 1-based index of the current frame.
    pub fn context_for_variable(&self, name: &str) -> i32 {
        if self.current_frame().temporaries.contains_key(name) {
            self.depth() as i32
        } else {
            0
        }
    }

    /// Read a temporary. `context_index` of -1 means the current frame.
    pub fn temporary(&self, name: &str, context_index: i32) -> Option<&Value> {
        let index = if context_index == -1 {
            self.depth() as i32
        } else {
            context_index
        };
        let frame = self.frames().get(index as usize - 1)?;
        frame.temporaries.get(name)
    }

    /// Write a temporary in the given context (current frame for -1).
    /// Non-declarations require the variable to already exist.
    pub fn set_temporary(
        &mut self,
        name: Name,
        value: Value,
        declare_new: bool,
        context_index: i32,
    ) -> Result<(), String> {
        let index = if context_index == -1 {
            self.depth() as i32
        } else {
            context_index
        };
        let frame = self
            .frames_mut()
            .get_mut(index as usize - 1)
            .ok_or_else(|| "temporary variable context out of range".to_string())?;
        if !declare_new && !frame.temporaries.contains_key(&name) {
            return Err(format!("could not find temporary variable to set: {}", name));
        }
        let value = retain_list_origins(frame.temporaries.get(&name), value);
        frame.temporaries.insert(name, value);
        Ok(())
    }
}

/// Assigning an empty list over an old list keeps the old list's origin
/// associations so `all`/`invert` stay meaningful.
pub(crate) fn retain_list_origins(old: Option<&Value>, new: Value) -> Value {
    match (old, new) {
        (Some(Value::List(old_list)), Value::List(new_list))
            if new_list.is_empty() && new_list.origins.is_empty() =>
        {
            let mut kept = new_list;
            kept.origins = old_list.origins.clone();
            Value::List(kept)
        }
        (_, new) => new,
    }
}
