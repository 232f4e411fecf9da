use std::collections::BTreeMap;
use std::fmt;

use crate::name::Name;

// ── ListItem ────────────────────────────────────────────────────

/// One named entry of a list value: an item name qualified by the list
/// definition it came from. The origin may be unknown for items parsed
/// from bare names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListItem {
    pub origin: Option<Name>,
    pub name: Name,
}

impl ListItem {
    pub fn new(origin: impl Into<Name>, name: impl Into<Name>) -> ListItem {
        ListItem {
            origin: Some(origin.into()),
            name: name.into(),
        }
    }

    /// Parse `origin.item` or a bare `item`.
    pub fn parse(s: &str) -> ListItem {
        match s.split_once('.') {
            Some((origin, name)) => ListItem::new(origin, name),
            None => ListItem {
                origin: None,
                name: Name::from(s),
            },
        }
    }

    pub fn full_name(&self) -> String {
        match &self.origin {
            Some(origin) => format!("{}.{}", origin, self.name),
            None => format!("?.{}", self.name),
        }
    }
}

impl fmt::Display for ListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

// ── ListValue ───────────────────────────────────────────────────

/// A set-valued, bitflag-style value: named items with integer values,
/// drawn from one or more list definitions.
///
/// `origins` records the definitions this value is associated with even
/// when the item set is empty, so that `all`/`invert` keep working after
/// a list has been emptied by subtraction.
#[derive(Debug, Clone, Default)]
pub struct ListValue {
    pub entries: BTreeMap<ListItem, i64>,
    pub origins: Vec<Name>,
}

impl PartialEq for ListValue {
    /// Origins are bookkeeping, not identity: two lists are equal when
    /// their item sets are.
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl ListValue {
    pub fn single(item: ListItem, value: i64) -> ListValue {
        let mut list = ListValue::default();
        if let Some(origin) = &item.origin {
            list.origins.push(origin.clone());
        }
        list.entries.insert(item, value);
        list
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries sorted by value, then name: the canonical presentation
    /// order.
    pub fn ordered_entries(&self) -> Vec<(&ListItem, i64)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(k, v)| (k, *v)).collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.name.cmp(&b.0.name)));
        entries
    }

    pub fn max_entry(&self) -> Option<(&ListItem, i64)> {
        self.ordered_entries().last().copied()
    }

    pub fn min_entry(&self) -> Option<(&ListItem, i64)> {
        self.ordered_entries().first().copied()
    }

    /// An empty list that keeps this list's origin associations.
    pub fn inheriting_empty(&self) -> ListValue {
        self.inheriting_origins(None)
    }

    /// Merge origin names from both operands into a result list.
    fn inheriting_origins(&self, other: Option<&ListValue>) -> ListValue {
        let mut origins = self.origins.clone();
        if let Some(other) = other {
            for o in &other.origins {
                if !origins.contains(o) {
                    origins.push(o.clone());
                }
            }
        }
        ListValue {
            entries: BTreeMap::new(),
            origins,
        }
    }

    pub fn union(&self, other: &ListValue) -> ListValue {
        let mut result = self.inheriting_origins(Some(other));
        result.entries = self.entries.clone();
        for (item, value) in &other.entries {
            result.entries.insert(item.clone(), *value);
        }
        result
    }

    pub fn intersect(&self, other: &ListValue) -> ListValue {
        let mut result = self.inheriting_origins(Some(other));
        for (item, value) in &self.entries {
            if other.entries.contains_key(item) {
                result.entries.insert(item.clone(), *value);
            }
        }
        result
    }

    pub fn without(&self, other: &ListValue) -> ListValue {
        let mut result = self.inheriting_origins(Some(other));
        for (item, value) in &self.entries {
            if !other.entries.contains_key(item) {
                result.entries.insert(item.clone(), *value);
            }
        }
        result
    }

    /// True when every item of `other` is present here. The empty list is
    /// contained only by convention when non-empty on the left.
    pub fn contains(&self, other: &ListValue) -> bool {
        if other.is_empty() || self.is_empty() {
            return false;
        }
        other.entries.keys().all(|k| self.entries.contains_key(k))
    }

    pub fn greater_than(&self, other: &ListValue) -> bool {
        if self.is_empty() {
            return false;
        }
        if other.is_empty() {
            return true;
        }
        self.min_entry().map(|e| e.1) > other.max_entry().map(|e| e.1)
    }

    pub fn greater_than_or_equals(&self, other: &ListValue) -> bool {
        if self.is_empty() {
            return false;
        }
        if other.is_empty() {
            return true;
        }
        self.min_entry().map(|e| e.1) >= other.min_entry().map(|e| e.1)
            && self.max_entry().map(|e| e.1) >= other.max_entry().map(|e| e.1)
    }

    pub fn less_than(&self, other: &ListValue) -> bool {
        if other.is_empty() {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        self.max_entry().map(|e| e.1) < other.min_entry().map(|e| e.1)
    }

    pub fn less_than_or_equals(&self, other: &ListValue) -> bool {
        if other.is_empty() {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        self.max_entry().map(|e| e.1) <= other.max_entry().map(|e| e.1)
            && self.min_entry().map(|e| e.1) <= other.min_entry().map(|e| e.1)
    }

    /// Every item of every origin definition this value draws from.
    pub fn all_from_origins(&self, defs: &ListDefinitions) -> ListValue {
        let mut result = self.inheriting_origins(None);
        for origin in &self.origins {
            if let Some(def) = defs.def(origin) {
                for (name, value) in &def.items {
                    result
                        .entries
                        .insert(ListItem::new(origin.clone(), name.clone()), *value);
                }
            }
        }
        result
    }

    /// Origin items not present in this value.
    pub fn inverse(&self, defs: &ListDefinitions) -> ListValue {
        let mut result = self.all_from_origins(defs);
        for item in self.entries.keys() {
            result.entries.remove(item);
        }
        result
    }

    /// Shift every item's value by `amount`, keeping only items that
    /// still name a real entry in their origin definition.
    pub fn shifted_by(&self, amount: i64, defs: &ListDefinitions) -> ListValue {
        let mut result = self.inheriting_origins(None);
        for (item, value) in &self.entries {
            let target = value + amount;
            let Some(origin_name) = &item.origin else { continue };
            let Some(def) = defs.def(origin_name.as_str()) else {
                continue;
            };
            if let Some((name, v)) = def.item_with_value(target) {
                result
                    .entries
                    .insert(ListItem::new(origin_name.clone(), name.clone()), v);
            }
        }
        result
    }

    /// The sub-range of ordered entries whose values fall in
    /// `min ..= max`.
    pub fn with_value_range(&self, min: i64, max: i64) -> ListValue {
        let mut result = self.inheriting_origins(None);
        for (item, value) in self.ordered_entries() {
            if value >= min && value <= max {
                result.entries.insert(item.clone(), value);
            }
        }
        result
    }

    pub fn to_output_string(&self) -> String {
        let names: Vec<&str> = self
            .ordered_entries()
            .into_iter()
            .map(|(item, _)| item.name.as_str())
            .collect();
        names.join(", ")
    }
}

// ── List definitions ────────────────────────────────────────────

/// A named list declaration from the document: item names with fixed
/// integer values.
#[derive(Debug, Clone, Default)]
pub struct ListDefinition {
    pub name: Name,
    pub items: BTreeMap<Name, i64>,
}

impl ListDefinition {
    pub fn value_of(&self, item_name: &str) -> Option<i64> {
        self.items.get(item_name).copied()
    }

    pub fn item_with_value(&self, value: i64) -> Option<(&Name, i64)> {
        self.items.iter().find(|(_, v)| **v == value).map(|(k, v)| (k, *v))
    }
}

/// The query interface over all list definitions in a document.
#[derive(Debug, Clone, Default)]
pub struct ListDefinitions {
    defs: BTreeMap<Name, ListDefinition>,
}

impl ListDefinitions {
    pub fn new(defs: Vec<ListDefinition>) -> ListDefinitions {
        ListDefinitions {
            defs: defs.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    pub fn def(&self, name: &str) -> Option<&ListDefinition> {
        self.defs.get(name)
    }

    /// Resolve `origin.item` or a bare `item` (searched across all
    /// definitions) to a single-entry list value.
    pub fn single_item_list(&self, full_name: &str) -> Option<ListValue> {
        let item = ListItem::parse(full_name);
        match &item.origin {
            Some(origin) => {
                let def = self.def(origin.as_str())?;
                let value = def.value_of(item.name.as_str())?;
                Some(ListValue::single(item, value))
            }
            None => {
                for def in self.defs.values() {
                    if let Some(value) = def.value_of(item.name.as_str()) {
                        return Some(ListValue::single(
                            ListItem::new(def.name.clone(), item.name.clone()),
                            value,
                        ));
                    }
                }
                None
            }
        }
    }
}
