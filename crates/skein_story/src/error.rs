use std::fmt;

// ── Severity ────────────────────────────────────────────────────

/// Classification of a runtime diagnostic handed to the error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

// ── StoryError ──────────────────────────────────────────────────

/// Errors that are fatal to the session call that produced them.
///
/// Runtime diagnostics discovered while stepping accumulate as strings in
/// the story state instead (see `Story::current_errors`); they only become
/// a `StoryError::Runtime` when no error handler is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryError {
    /// `continue` called when `can_continue` is false.
    CannotContinue,
    /// Choice index outside `0..count`.
    OutOfRangeChoice { index: usize, count: usize },
    /// Named flow does not exist.
    UnknownFlow(String),
    /// The default flow can never be removed.
    CannotRemoveDefaultFlow,
    /// The active flow cannot be removed out from under itself.
    CannotRemoveActiveFlow,
    /// Flow switching is not allowed while a background save is in flight.
    CannotSwitchFlowWhileSaving,
    /// A background save is already in flight.
    SaveInProgress,
    /// The named activity cannot run while an async continue is mid-flight.
    AsyncOperationInProgress(String),
    /// A bad argument from the embedder (empty flow name, unknown
    /// function name, unsupported value type, ...).
    BadArgument(String),
    /// A runtime diagnostic raised fatally because no handler was bound.
    Runtime(String),
}

impl fmt::Display for StoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoryError::CannotContinue => {
                f.write_str("can't continue - should check can_continue before calling continue")
            }
            StoryError::OutOfRangeChoice { index, count } => {
                write!(f, "choice index {} out of range ({} choices)", index, count)
            }
            StoryError::UnknownFlow(name) => write!(f, "unknown flow: {}", name),
            StoryError::CannotRemoveDefaultFlow => {
                f.write_str("cannot remove the default flow")
            }
            StoryError::CannotRemoveActiveFlow => {
                f.write_str("cannot remove the currently active flow")
            }
            StoryError::CannotSwitchFlowWhileSaving => {
                f.write_str("cannot switch flow while a background save is in progress")
            }
            StoryError::SaveInProgress => {
                f.write_str("a background save is already in progress")
            }
            StoryError::AsyncOperationInProgress(activity) => write!(
                f,
                "can't {} while an asynchronous continue is in progress",
                activity
            ),
            StoryError::BadArgument(msg) => write!(f, "bad argument: {}", msg),
            StoryError::Runtime(msg) => write!(f, "story runtime error: {}", msg),
        }
    }
}

impl std::error::Error for StoryError {}
