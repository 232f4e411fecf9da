//! Decoding of the compiled tagged-JSON document format.
//!
//! Runtime objects serialize compactly: strings carry a type prefix
//! (`^` literal text, command mnemonics, operator names), containers are
//! arrays with a trailing metadata object, and everything else is a
//! single-key object whose key names the variant.

use serde_json::{Map, Value as Json};

use skein_runtime::arena::{Arena, NodeId};
use skein_runtime::list::{ListDefinition, ListDefinitions, ListItem, ListValue};
use skein_runtime::object::{
    ChoicePoint, CommandKind, Container, Divert, DivertTarget, NodeKind, PushKind,
    VariableAssignment, VariableReference,
};
use skein_runtime::ops::NativeOp;
use skein_runtime::{Name, Path, StoryDocument, Value};

use crate::{LoadError, CURRENT_VERSION, MIN_COMPAT_VERSION};

// ── Entry point ─────────────────────────────────────────────────

/// Materialize a compiled document from its JSON text.
pub fn load_document(text: &str) -> Result<StoryDocument, LoadError> {
    let json: Json =
        serde_json::from_str(text).map_err(|e| LoadError::Malformed(e.to_string()))?;
    let obj = json
        .as_object()
        .ok_or_else(|| LoadError::Malformed("document is not an object".into()))?;

    let version = obj
        .get("inkVersion")
        .and_then(Json::as_u64)
        .ok_or_else(|| LoadError::Malformed("no format version found".into()))?;
    if version > CURRENT_VERSION {
        return Err(LoadError::VersionTooNew { found: version });
    }
    if version < MIN_COMPAT_VERSION {
        return Err(LoadError::VersionTooOld { found: version });
    }

    let root_token = obj.get("root").ok_or(LoadError::MissingRoot)?;

    let mut arena = Arena::new();
    let root = decode_node(&mut arena, root_token)?;
    if arena.container(root).is_none() {
        return Err(LoadError::Malformed("root is not a container".into()));
    }
    arena.assign_paths(root);

    let list_defs = match obj.get("listDefs") {
        Some(defs) => decode_list_defs(defs)?,
        None => ListDefinitions::default(),
    };

    Ok(StoryDocument {
        arena,
        root,
        list_defs,
        version,
    })
}

// ── Node decoding ───────────────────────────────────────────────

fn decode_node(arena: &mut Arena, token: &Json) -> Result<NodeId, LoadError> {
    let kind = match token {
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                NodeKind::Value(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                NodeKind::Value(Value::Float(f))
            } else {
                return Err(LoadError::Malformed(format!("bad number token: {}", n)));
            }
        }
        Json::Bool(b) => NodeKind::Value(Value::Bool(*b)),
        Json::String(s) => decode_string_token(s)?,
        Json::Array(elements) => return decode_container(arena, elements),
        Json::Object(obj) => decode_object_token(obj)?,
        Json::Null => {
            return Err(LoadError::Malformed("unexpected null content token".into()));
        }
    };
    Ok(arena.alloc(kind))
}

fn decode_string_token(s: &str) -> Result<NodeKind, LoadError> {
    if let Some(text) = s.strip_prefix('^') {
        return Ok(NodeKind::Value(Value::Str(text.to_string())));
    }
    if s == "\n" {
        return Ok(NodeKind::Value(Value::Str("\n".to_string())));
    }
    if s == "<>" {
        return Ok(NodeKind::Glue);
    }
    if s == "void" {
        return Ok(NodeKind::Value(Value::Void));
    }
    if let Some(cmd) = CommandKind::from_wire_name(s) {
        return Ok(NodeKind::Command(cmd));
    }
    if let Some(op) = NativeOp::from_wire_name(s) {
        return Ok(NodeKind::Native(op));
    }
    Err(LoadError::Malformed(format!(
        "unrecognized string token: {:?}",
        s
    )))
}

fn decode_object_token(obj: &Map<String, Json>) -> Result<NodeKind, LoadError> {
    // Divert target literal.
    if let Some(target) = obj.get("^->").and_then(Json::as_str) {
        return Ok(NodeKind::Value(Value::DivertTarget(Path::parse(target))));
    }

    // Variable pointer literal.
    if let Some(name) = obj.get("^var").and_then(Json::as_str) {
        let context_index = obj.get("ci").and_then(Json::as_i64).unwrap_or(-1) as i32;
        return Ok(NodeKind::Value(Value::VariablePointer {
            name: Name::from(name),
            context_index,
        }));
    }

    // Diverts, in their four spellings.
    let divert_form = [
        ("->", None, false),
        ("f()", Some(PushKind::Function), false),
        ("->t->", Some(PushKind::Tunnel), false),
        ("x()", Some(PushKind::Function), true),
    ]
    .into_iter()
    .find_map(|(key, push, external)| {
        obj.get(key).and_then(Json::as_str).map(|t| (t, push, external))
    });
    if let Some((target, push, is_external)) = divert_form {
        let is_variable = obj.get("var").and_then(Json::as_bool).unwrap_or(false);
        let target = if is_variable {
            DivertTarget::Variable(Name::from(target))
        } else {
            DivertTarget::Path(Path::parse(target))
        };
        return Ok(NodeKind::Divert(Divert {
            target,
            push,
            is_external,
            external_args: obj.get("exArgs").and_then(Json::as_u64).unwrap_or(0) as usize,
            is_conditional: obj.get("c").and_then(Json::as_bool).unwrap_or(false),
        }));
    }

    // Choice point.
    if let Some(target) = obj.get("*").and_then(Json::as_str) {
        let flags = obj.get("flg").and_then(Json::as_u64).unwrap_or(0) as u32;
        return Ok(NodeKind::Choice(ChoicePoint::from_flags(
            Path::parse(target),
            flags,
        )));
    }

    // Variable reads.
    if let Some(name) = obj.get("VAR?").and_then(Json::as_str) {
        return Ok(NodeKind::VarRef(VariableReference::Named(Name::from(name))));
    }
    if let Some(path) = obj.get("CNT?").and_then(Json::as_str) {
        return Ok(NodeKind::VarRef(VariableReference::Count(Path::parse(path))));
    }

    // Variable writes.
    let reassignment = obj.get("re").and_then(Json::as_bool).unwrap_or(false);
    if let Some(name) = obj.get("VAR=").and_then(Json::as_str) {
        return Ok(NodeKind::VarAssign(VariableAssignment {
            name: Name::from(name),
            is_global: true,
            is_new_declaration: !reassignment,
        }));
    }
    if let Some(name) = obj.get("temp=").and_then(Json::as_str) {
        return Ok(NodeKind::VarAssign(VariableAssignment {
            name: Name::from(name),
            is_global: false,
            is_new_declaration: !reassignment,
        }));
    }

    // Legacy whole-line tag.
    if let Some(text) = obj.get("#").and_then(Json::as_str) {
        return Ok(NodeKind::Tag(text.to_string()));
    }

    // List value literal.
    if let Some(entries) = obj.get("list").and_then(Json::as_object) {
        let mut list = ListValue::default();
        for (key, value) in entries {
            let value = value
                .as_i64()
                .ok_or_else(|| LoadError::Malformed(format!("bad list item value for {}", key)))?;
            let item = ListItem::parse(key);
            if let Some(origin) = &item.origin {
                if !list.origins.contains(origin) {
                    list.origins.push(origin.clone());
                }
            }
            list.entries.insert(item, value);
        }
        if let Some(origins) = obj.get("origins").and_then(Json::as_array) {
            for origin in origins {
                let name = origin.as_str().ok_or_else(|| {
                    LoadError::Malformed("list origin names must be strings".into())
                })?;
                let name = Name::from(name);
                if !list.origins.contains(&name) {
                    list.origins.push(name);
                }
            }
        }
        return Ok(NodeKind::Value(Value::List(list)));
    }

    Err(LoadError::Malformed(format!(
        "unrecognized object token with keys: {:?}",
        obj.keys().collect::<Vec<_>>()
    )))
}

// ── Containers ──────────────────────────────────────────────────

const CONTAINER_FLAG_VISITS: u64 = 0x1;
const CONTAINER_FLAG_TURNS: u64 = 0x2;
const CONTAINER_FLAG_COUNT_START_ONLY: u64 = 0x4;

fn decode_container(arena: &mut Arena, elements: &[Json]) -> Result<NodeId, LoadError> {
    let id = arena.alloc(NodeKind::Container(Container::default()));

    let (content, meta) = match elements.split_last() {
        Some((last, rest)) => (rest, last),
        None => return Err(LoadError::Malformed("container array is empty".into())),
    };

    for token in content {
        let child = decode_node(arena, token)?;
        arena.attach(id, child);
    }

    match meta {
        Json::Null => {}
        Json::Object(meta) => {
            for (key, value) in meta {
                match key.as_str() {
                    "#n" => {
                        let name = value.as_str().ok_or_else(|| {
                            LoadError::Malformed("container name must be a string".into())
                        })?;
                        set_container_name(arena, id, Name::from(name));
                    }
                    "#f" => {
                        let flags = value.as_u64().ok_or_else(|| {
                            LoadError::Malformed("container flags must be an integer".into())
                        })?;
                        if let NodeKind::Container(c) = &mut arena.node_mut(id).kind {
                            c.visits_counted = flags & CONTAINER_FLAG_VISITS != 0;
                            c.turn_index_counted = flags & CONTAINER_FLAG_TURNS != 0;
                            c.counting_at_start_only =
                                flags & CONTAINER_FLAG_COUNT_START_ONLY != 0;
                        }
                    }
                    name => {
                        let child = decode_node(arena, value)?;
                        set_container_name(arena, child, Name::from(name));
                        arena.attach_named(id, Name::from(name), child);
                    }
                }
            }
        }
        other => {
            return Err(LoadError::Malformed(format!(
                "container metadata must be an object or null, got: {}",
                other
            )));
        }
    }

    Ok(id)
}

/// Named content inherits its name from the metadata key when the
/// serialized form didn't carry one.
fn set_container_name(arena: &mut Arena, id: NodeId, name: Name) {
    if let NodeKind::Container(c) = &mut arena.node_mut(id).kind {
        if c.name.is_none() {
            c.name = Some(name);
        }
    }
}

// ── List definitions ────────────────────────────────────────────

fn decode_list_defs(json: &Json) -> Result<ListDefinitions, LoadError> {
    let obj = json
        .as_object()
        .ok_or_else(|| LoadError::Malformed("listDefs must be an object".into()))?;
    let mut defs = Vec::with_capacity(obj.len());
    for (list_name, items) in obj {
        let items_obj = items.as_object().ok_or_else(|| {
            LoadError::Malformed(format!("list definition {} must be an object", list_name))
        })?;
        let mut def = ListDefinition {
            name: Name::from(list_name.as_str()),
            ..ListDefinition::default()
        };
        for (item_name, value) in items_obj {
            let value = value.as_i64().ok_or_else(|| {
                LoadError::Malformed(format!(
                    "list item {}.{} must have an integer value",
                    list_name, item_name
                ))
            })?;
            def.items.insert(Name::from(item_name.as_str()), value);
        }
        defs.push(def);
    }
    Ok(ListDefinitions::new(defs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(root: &str) -> Result<StoryDocument, LoadError> {
        load_document(&format!(r#"{{"inkVersion": 21, "root": {}}}"#, root))
    }

    #[test]
    fn version_gating() {
        let err = load_document(r#"{"inkVersion": 17, "root": [null]}"#).unwrap_err();
        assert_eq!(err, LoadError::VersionTooOld { found: 17 });
        let err = load_document(r#"{"inkVersion": 22, "root": [null]}"#).unwrap_err();
        assert_eq!(err, LoadError::VersionTooNew { found: 22 });
        assert!(load_document(r#"{"inkVersion": 18, "root": [null]}"#).is_ok());
    }

    #[test]
    fn missing_root() {
        let err = load_document(r#"{"inkVersion": 21}"#).unwrap_err();
        assert_eq!(err, LoadError::MissingRoot);
    }

    #[test]
    fn missing_version_is_malformed() {
        assert!(matches!(
            load_document(r#"{"root": [null]}"#).unwrap_err(),
            LoadError::Malformed(_)
        ));
    }

    #[test]
    fn basic_text_tokens() {
        let d = doc(r#"["^Hello", "\n", "<>", "done", null]"#).unwrap();
        let root = d.root_container();
        assert_eq!(root.content.len(), 4);
        assert!(matches!(
            d.arena.kind(root.content[0]),
            NodeKind::Value(Value::Str(s)) if s == "Hello"
        ));
        assert!(matches!(d.arena.kind(root.content[2]), NodeKind::Glue));
        assert!(matches!(
            d.arena.kind(root.content[3]),
            NodeKind::Command(CommandKind::Done)
        ));
    }

    #[test]
    fn unknown_token_is_malformed() {
        assert!(matches!(
            doc(r#"["wibble", null]"#).unwrap_err(),
            LoadError::Malformed(_)
        ));
    }

    #[test]
    fn named_subcontainer_with_flags() {
        let d = doc(r##"[{"intro": ["^hi", "\n", "done", {"#f": 1}]}]"##).unwrap();
        let knot = d.knot_with_name("intro").unwrap();
        let c = d.arena.container(knot).unwrap();
        assert_eq!(c.name.as_deref(), Some("intro"));
        assert!(c.visits_counted);
        assert!(!c.turn_index_counted);
        assert_eq!(c.path_str, "intro");
    }

    #[test]
    fn divert_variants() {
        let d = doc(
            r#"[{"->": "intro"}, {"f()": "fn"}, {"->t->": "tn"}, {"x()": "ext", "exArgs": 2},
                {"->": "target_var", "var": true, "c": true},
                {"intro": ["done", null], "fn": ["done", null], "tn": ["done", null]}]"#,
        )
        .unwrap();
        let root = d.root_container();
        match d.arena.kind(root.content[0]) {
            NodeKind::Divert(div) => {
                assert_eq!(div.push, None);
                assert!(!div.is_external);
            }
            other => panic!("expected divert, got {:?}", other),
        }
        match d.arena.kind(root.content[1]) {
            NodeKind::Divert(div) => assert_eq!(div.push, Some(PushKind::Function)),
            other => panic!("expected divert, got {:?}", other),
        }
        match d.arena.kind(root.content[2]) {
            NodeKind::Divert(div) => assert_eq!(div.push, Some(PushKind::Tunnel)),
            other => panic!("expected divert, got {:?}", other),
        }
        match d.arena.kind(root.content[3]) {
            NodeKind::Divert(div) => {
                assert!(div.is_external);
                assert_eq!(div.external_args, 2);
            }
            other => panic!("expected divert, got {:?}", other),
        }
        match d.arena.kind(root.content[4]) {
            NodeKind::Divert(div) => {
                assert!(div.is_conditional);
                assert!(matches!(&div.target, DivertTarget::Variable(n) if n == "target_var"));
            }
            other => panic!("expected divert, got {:?}", other),
        }
    }

    #[test]
    fn choice_point_flags() {
        let d = doc(r#"[{"*": ".^.c-0", "flg": 18}, {"c-0": ["done", null]}]"#).unwrap();
        match d.arena.kind(d.root_container().content[0]) {
            NodeKind::Choice(cp) => {
                assert!(cp.has_start_content);
                assert!(cp.once_only);
                assert!(!cp.has_condition);
            }
            other => panic!("expected choice point, got {:?}", other),
        }
    }

    #[test]
    fn variable_nodes() {
        let d = doc(
            r#"[{"VAR?": "x"}, {"CNT?": "intro"}, {"VAR=": "x"}, {"VAR=": "x", "re": true},
               {"temp=": "t"}, {"^->": "intro.2"}, {"^var": "p", "ci": 0},
               {"intro": ["done", null]}]"#,
        )
        .unwrap();
        let root = d.root_container();
        assert!(matches!(
            d.arena.kind(root.content[0]),
            NodeKind::VarRef(VariableReference::Named(n)) if n == "x"
        ));
        assert!(matches!(
            d.arena.kind(root.content[1]),
            NodeKind::VarRef(VariableReference::Count(_))
        ));
        match d.arena.kind(root.content[2]) {
            NodeKind::VarAssign(va) => {
                assert!(va.is_global && va.is_new_declaration);
            }
            other => panic!("expected assignment, got {:?}", other),
        }
        match d.arena.kind(root.content[3]) {
            NodeKind::VarAssign(va) => {
                assert!(va.is_global && !va.is_new_declaration);
            }
            other => panic!("expected assignment, got {:?}", other),
        }
        match d.arena.kind(root.content[4]) {
            NodeKind::VarAssign(va) => assert!(!va.is_global),
            other => panic!("expected assignment, got {:?}", other),
        }
        assert!(matches!(
            d.arena.kind(root.content[5]),
            NodeKind::Value(Value::DivertTarget(_))
        ));
        assert!(matches!(
            d.arena.kind(root.content[6]),
            NodeKind::Value(Value::VariablePointer { context_index: 0, .. })
        ));
    }

    #[test]
    fn list_defs_and_list_literals() {
        let d = load_document(
            r#"{
                "inkVersion": 21,
                "root": [{"list": {"volume.low": 1}, "origins": ["volume"]}, "done", null],
                "listDefs": {"volume": {"low": 1, "mid": 2, "high": 3}}
            }"#,
        )
        .unwrap();
        assert!(d.list_defs.def("volume").is_some());
        match d.arena.kind(d.root_container().content[0]) {
            NodeKind::Value(Value::List(l)) => {
                assert_eq!(l.len(), 1);
                assert_eq!(l.origins, vec![Name::from("volume")]);
            }
            other => panic!("expected list value, got {:?}", other),
        }
    }

    #[test]
    fn natives_decode() {
        let d = doc(r#"["ev", 1, 2, "+", "out", "/ev", "done", null]"#).unwrap();
        assert!(matches!(
            d.arena.kind(d.root_container().content[3]),
            NodeKind::Native(NativeOp::Add)
        ));
    }
}
