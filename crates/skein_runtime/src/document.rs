use crate::arena::{Arena, NodeId};
use crate::list::ListDefinitions;
use crate::object::Container;

/// Newest document format version this runtime understands.
pub const CURRENT_VERSION: u64 = 21;

/// Oldest document format version this runtime still accepts.
pub const MIN_COMPAT_VERSION: u64 = 18;

/// A loaded story document: the immutable content arena, the root
/// container, and the list definitions the content refers to.
///
/// Shared read-only between the engine and any number of state
/// snapshots; all mutable execution state lives elsewhere.
#[derive(Debug, Clone)]
pub struct StoryDocument {
    pub arena: Arena,
    pub root: NodeId,
    pub list_defs: ListDefinitions,
    /// The format version the document was compiled against. Always in
    /// `MIN_COMPAT_VERSION ..= CURRENT_VERSION`; a value below
    /// `CURRENT_VERSION` is a noncritical mismatch the embedder may want
    /// to surface.
    pub version: u64,
}

impl StoryDocument {
    pub fn root_container(&self) -> &Container {
        self.arena
            .container(self.root)
            .expect("document root is always a container")
    }

    /// A top-level named container (a knot), by name.
    pub fn knot_with_name(&self, name: &str) -> Option<NodeId> {
        self.root_container().named.get(name).copied()
    }

    pub fn has_version_mismatch(&self) -> bool {
        self.version != CURRENT_VERSION
    }
}
