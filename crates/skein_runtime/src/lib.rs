pub mod arena;
pub mod document;
pub mod list;
pub mod name;
pub mod object;
pub mod ops;
pub mod path;
pub mod pointer;
pub mod value;

pub use arena::{Arena, Node, NodeId};
pub use document::StoryDocument;
pub use name::Name;
pub use path::{Component, Path};
pub use pointer::Pointer;
pub use value::Value;
