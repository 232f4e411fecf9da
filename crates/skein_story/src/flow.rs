use skein_runtime::{Name, NodeId};

use crate::callstack::CallStack;
use crate::choice::Choice;
use crate::output::OutputStream;

/// The reserved name of the flow every story starts in.
pub const DEFAULT_FLOW_NAME: &str = "default";

/// One independent execution context: a callstack, an output stream and
/// the choices generated for it. Globals and counts are shared across
/// flows and live elsewhere.
#[derive(Debug, Clone)]
pub struct Flow {
    pub name: Name,
    pub callstack: CallStack,
    pub output: OutputStream,
    pub current_choices: Vec<Choice>,
}

impl Flow {
    pub fn new(name: impl Into<Name>, root: NodeId) -> Flow {
        Flow {
            name: name.into(),
            callstack: CallStack::new(root),
            output: OutputStream::default(),
            current_choices: Vec::new(),
        }
    }
}
