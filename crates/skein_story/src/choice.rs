use skein_runtime::Path;

use crate::callstack::Thread;

/// A choice generated during stepping and presented to the player.
///
/// Holds content back-references by path only, plus the forked thread
/// that must be restored if this choice is taken.
#[derive(Debug, Clone)]
pub struct Choice {
    /// Assembled presentation text (start content + choice-only content,
    /// trimmed).
    pub text: String,
    /// Path of the choice point that generated this choice.
    pub source_path: String,
    /// Where choosing this choice continues.
    pub target_path: Path,
    /// Invisible defaults are auto-followed, never shown.
    pub is_invisible_default: bool,
    /// Tags captured while evaluating the choice text.
    pub tags: Vec<String>,
    /// Presentation index, assigned when the visible choice list is
    /// built at the end of a continue.
    pub index: usize,
    pub original_thread_index: u32,
    pub(crate) thread_at_generation: Thread,
}
