pub mod callstack;
pub mod choice;
pub mod error;
pub mod flow;
pub mod output;
pub mod patch;
pub mod state;
pub mod story;
pub mod variables;

pub use choice::Choice;
pub use error::{Severity, StoryError};
pub use flow::DEFAULT_FLOW_NAME;
pub use state::StoryState;
pub use story::Story;
