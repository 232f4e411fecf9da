use std::fmt;

use crate::name::Name;
use crate::object::{Container, NodeKind};
use crate::path::{Component, Path};

// ── NodeId ──────────────────────────────────────────────────────

/// Index of a runtime object in the content arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

// ── Node ────────────────────────────────────────────────────────

/// One arena slot: the object payload plus its tree adornment.
///
/// Parent links are arena indices, which is what lets containers own
/// their children while children still address their parents without
/// reference cycles.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    /// Position within the parent's ordered content. Meaningless (zero)
    /// for named-only children and the root.
    pub index_in_parent: usize,
}

// ── Search results ──────────────────────────────────────────────

/// Outcome of a path resolution. `approximate` is set when a component
/// failed to resolve and the deepest object reached was returned instead.
#[derive(Debug, Clone, Copy)]
pub struct SearchResult {
    pub obj: Option<NodeId>,
    pub approximate: bool,
}

impl SearchResult {
    pub fn exact(&self) -> Option<NodeId> {
        if self.approximate {
            None
        } else {
            self.obj
        }
    }
}

// ── Arena ───────────────────────────────────────────────────────

/// Flat table of runtime objects forming the content tree.
///
/// Immutable after loading: the document front end allocates nodes,
/// attaches them to their containers and assigns container paths, and
/// from then on the arena is only read.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Arena::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate a detached node; attach it with [`Arena::attach`] or
    /// [`Arena::attach_named`].
    pub fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: None,
            index_in_parent: 0,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn container(&self, id: NodeId) -> Option<&Container> {
        self.nodes[id.index()].kind.as_container()
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// Append `child` to `parent`'s ordered content.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        let index = match &mut self.nodes[parent.index()].kind {
            NodeKind::Container(c) => {
                c.content.push(child);
                c.content.len() - 1
            }
            _ => panic!("attach: parent is not a container"),
        };
        // Register named containers for name-component lookup as well.
        if let Some(name) = self.container_name(child) {
            if let NodeKind::Container(c) = &mut self.nodes[parent.index()].kind {
                c.named.insert(name, child);
            }
        }
        let node = &mut self.nodes[child.index()];
        node.parent = Some(parent);
        node.index_in_parent = index;
    }

    /// Register `child` as named-only content of `parent` (not part of
    /// the ordered content sequence).
    pub fn attach_named(&mut self, parent: NodeId, name: Name, child: NodeId) {
        match &mut self.nodes[parent.index()].kind {
            NodeKind::Container(c) => {
                c.named.insert(name, child);
            }
            _ => panic!("attach_named: parent is not a container"),
        }
        self.nodes[child.index()].parent = Some(parent);
    }

    fn container_name(&self, id: NodeId) -> Option<Name> {
        match &self.nodes[id.index()].kind {
            NodeKind::Container(c) => c.name.clone(),
            _ => None,
        }
    }

    // ── Paths ───────────────────────────────────────────────────

    /// Compute and store the canonical path of every container reachable
    /// from `root`. Called once after the document is built.
    pub fn assign_paths(&mut self, root: NodeId) {
        self.assign_path_recursive(root, Path::root());
    }

    fn assign_path_recursive(&mut self, id: NodeId, path: Path) {
        let children: Vec<(NodeId, Component)> = match &self.nodes[id.index()].kind {
            NodeKind::Container(c) => {
                let mut children = Vec::with_capacity(c.content.len() + c.named.len());
                for (i, &child) in c.content.iter().enumerate() {
                    let comp = match self.container_name(child) {
                        Some(name) => Component::Name(name),
                        None => Component::Index(i),
                    };
                    children.push((child, comp));
                }
                for (name, &child) in &c.named {
                    // Skip named children that also sit in content; they
                    // were collected above with their name component.
                    if !c.content.contains(&child) {
                        children.push((child, Component::Name(name.clone())));
                    }
                }
                children
            }
            _ => return,
        };

        if let NodeKind::Container(c) = &mut self.nodes[id.index()].kind {
            c.path_str = path.to_string();
            c.path = path.clone();
        }

        for (child, comp) in children {
            self.assign_path_recursive(child, path.with_component(comp));
        }
    }

    /// The canonical path of any node: a container's stored path, or the
    /// parent container's path extended with the child's component.
    pub fn path_to(&self, id: NodeId) -> Path {
        if let Some(c) = self.container(id) {
            return c.path.clone();
        }
        let node = &self.nodes[id.index()];
        match node.parent {
            Some(parent) => self
                .path_to(parent)
                .with_component(Component::Index(node.index_in_parent)),
            None => Path::root(),
        }
    }

    // ── Resolution ──────────────────────────────────────────────

    /// Resolve one path component against an object.
    pub fn content_with_component(&self, id: NodeId, comp: &Component) -> Option<NodeId> {
        match comp {
            Component::Parent => self.parent_of(id),
            Component::Index(i) => {
                let c = self.container(id)?;
                c.content.get(*i).copied()
            }
            Component::Name(n) => {
                let c = self.container(id)?;
                c.named.get(n.as_str()).copied()
            }
        }
    }

    /// Walk `path` starting from `from`, resolving up to `len` components.
    /// Stops early (approximate) when a component cannot be resolved.
    pub fn content_at_path(&self, from: NodeId, path: &Path, len: usize) -> SearchResult {
        let mut current = from;
        for comp in path.components().iter().take(len) {
            match self.content_with_component(current, comp) {
                Some(next) => current = next,
                None => {
                    return SearchResult {
                        obj: Some(current),
                        approximate: true,
                    }
                }
            }
        }
        SearchResult {
            obj: Some(current),
            approximate: false,
        }
    }

    /// Resolve a possibly-relative path: relative paths resolve against
    /// `context` (or its parent when `context` is not a container),
    /// absolute paths against `root`.
    pub fn resolve_path(&self, root: NodeId, context: NodeId, path: &Path) -> SearchResult {
        if path.is_relative() {
            let mut base = context;
            let mut path = path.clone();
            if self.container(base).is_none() {
                match self.parent_of(base) {
                    Some(parent) => {
                        base = parent;
                        // The leading component of a relative path from a
                        // non-container is the parent hop we just took.
                        if matches!(path.first(), Some(Component::Parent)) {
                            path = path.tail();
                        }
                    }
                    None => {
                        return SearchResult {
                            obj: None,
                            approximate: true,
                        }
                    }
                }
            }
            let len = path.len();
            self.content_at_path(base, &path, len)
        } else {
            self.content_at_path(root, path, path.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::CommandKind;
    use crate::value::Value;

    fn container(name: Option<&str>) -> NodeKind {
        NodeKind::Container(Container {
            name: name.map(Name::from),
            ..Container::default()
        })
    }

    fn small_tree() -> (Arena, NodeId, NodeId, NodeId) {
        // root
        //   [0] "hello"
        //   [1] knot (named "intro")
        //         [0] nop
        let mut arena = Arena::new();
        let root = arena.alloc(container(None));
        let text = arena.alloc(NodeKind::Value(Value::Str("hello".into())));
        let knot = arena.alloc(container(Some("intro")));
        let nop = arena.alloc(NodeKind::Command(CommandKind::NoOp));
        arena.attach(root, text);
        arena.attach(root, knot);
        arena.attach(knot, nop);
        arena.assign_paths(root);
        (arena, root, knot, nop)
    }

    #[test]
    fn attach_sets_parent_and_index() {
        let (arena, root, knot, nop) = small_tree();
        assert_eq!(arena.parent_of(knot), Some(root));
        assert_eq!(arena.node(knot).index_in_parent, 1);
        assert_eq!(arena.parent_of(nop), Some(knot));
    }

    #[test]
    fn named_containers_get_name_paths() {
        let (arena, _, knot, nop) = small_tree();
        assert_eq!(arena.container(knot).unwrap().path_str, "intro");
        assert_eq!(arena.path_to(nop).to_string(), "intro.0");
    }

    #[test]
    fn absolute_resolution() {
        let (arena, root, knot, nop) = small_tree();
        let r = arena.resolve_path(root, root, &Path::parse("intro"));
        assert_eq!(r.exact(), Some(knot));
        let r = arena.resolve_path(root, root, &Path::parse("intro.0"));
        assert_eq!(r.exact(), Some(nop));
    }

    #[test]
    fn relative_resolution_from_sibling() {
        let (arena, root, knot, nop) = small_tree();
        // From the nop inside the knot, `.^.^.0` reaches root's first child.
        let r = arena.resolve_path(root, nop, &Path::parse(".^.^.0"));
        assert!(!r.approximate);
        assert_eq!(r.obj, Some(arena.container(root).unwrap().content[0]));
        let _ = knot;
    }

    #[test]
    fn missing_component_is_approximate() {
        let (arena, root, _, _) = small_tree();
        let r = arena.resolve_path(root, root, &Path::parse("intro.missing"));
        assert!(r.approximate);
        assert!(r.obj.is_some());
    }
}
