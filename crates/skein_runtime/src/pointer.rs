use crate::arena::{Arena, NodeId};
use crate::path::{Component, Path};

/// A cursor into the content tree: a container plus an index into its
/// ordered content. `index == None` addresses the container itself
/// (the serialized `-1` form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub container: NodeId,
    pub index: Option<usize>,
}

impl Pointer {
    /// Pointer to the first content slot of a container.
    pub fn start_of(container: NodeId) -> Pointer {
        Pointer {
            container,
            index: Some(0),
        }
    }

    /// Pointer addressing the container itself.
    pub fn to_container(container: NodeId) -> Pointer {
        Pointer {
            container,
            index: None,
        }
    }

    /// The object this pointer addresses: the indexed child, the
    /// container itself for `None` or for an empty container, or nothing
    /// when the index is past the end.
    pub fn resolve(&self, arena: &Arena) -> Option<NodeId> {
        let index = match self.index {
            None => return Some(self.container),
            Some(i) => i,
        };
        let container = arena.container(self.container)?;
        if container.content.is_empty() {
            Some(self.container)
        } else {
            container.content.get(index).copied()
        }
    }

    /// The full path of the addressed position.
    pub fn path(&self, arena: &Arena) -> Path {
        let base = arena.path_to(self.container);
        match self.index {
            Some(i) => base.with_component(Component::Index(i)),
            None => base,
        }
    }
}
