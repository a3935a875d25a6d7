//! Dot-addressable key/value tree used for request bodies, request headers
//! and the parsed `data`/`error` sections of a response envelope.
//!
//! # Design
//! A `DotMap` is a sorted map of `Node`s. JSON objects become `Branch`
//! nodes so later `set` calls can reach into them; every other JSON value
//! (nested arrays included) is stored as a `Leaf`. Lookups continue through
//! leaf values, so `validation.fields.0.name` resolves into an array element.
//! A key that itself contains dots is matched whole before the path is split.
//!
//! Object keys are kept in lexicographic order, which makes serialization of
//! the same logical content byte-for-byte stable. A map decoded from a
//! top-level array remembers that it is a list: its keys are element indices,
//! iteration follows index order and `to_value` rebuilds the array.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// A single entry in a `DotMap`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Value),
    Branch(DotMap),
}

impl Node {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Node::Branch(DotMap::from_object(map)),
            other => Node::Leaf(other),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Node::Leaf(value) => value.clone(),
            Node::Branch(map) => map.to_value(),
        }
    }

    fn resolved(&self) -> Resolved<'_> {
        match self {
            Node::Leaf(value) => Resolved::Value(value),
            Node::Branch(map) => Resolved::Map(map),
        }
    }
}

/// Ordered, dot-addressable mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DotMap {
    entries: BTreeMap<String, Node>,
    list: bool,
}

enum Resolved<'a> {
    Map(&'a DotMap),
    Value(&'a Value),
}

impl DotMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from decoded JSON. Objects map key-for-key, a top-level
    /// array becomes a list keyed by element index, and scalars yield an
    /// empty map.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_object(map),
            Value::Array(items) => Self {
                entries: items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), Node::from_value(item)))
                    .collect(),
                list: true,
            },
            _ => Self::default(),
        }
    }

    fn from_object(map: Map<String, Value>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(key, value)| (key, Node::from_value(value)))
                .collect(),
            list: false,
        }
    }

    /// True when the map was decoded from a JSON array.
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Write `value` at a dotted path, creating intermediate branches and
    /// replacing any leaf that sits where a branch is needed.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut map = self;
        for segment in segments {
            map.keep_list_for(segment);
            let node = map
                .entries
                .entry(segment.to_string())
                .or_insert_with(|| Node::Branch(DotMap::new()));
            if matches!(node, Node::Leaf(_)) {
                *node = Node::Branch(DotMap::new());
            }
            let Node::Branch(inner) = node else {
                return;
            };
            map = inner;
        }
        map.keep_list_for(last);
        map.entries
            .insert(last.to_string(), Node::from_value(value.into()));
    }

    /// A list stays a list only while writes replace an element or append
    /// the next one. Any other key turns it into an object.
    fn keep_list_for(&mut self, key: &str) {
        if self.list && !key.parse::<usize>().is_ok_and(|index| index <= self.entries.len()) {
            self.list = false;
        }
    }

    fn resolve(&self, path: &str) -> Option<Resolved<'_>> {
        if let Some(node) = self.entries.get(path) {
            return Some(node.resolved());
        }
        let (head, rest) = path.split_once('.')?;
        match self.entries.get(head)? {
            Node::Branch(inner) => inner.resolve(rest),
            Node::Leaf(value) => resolve_value(value, rest).map(Resolved::Value),
        }
    }

    /// Value at a dotted path, materialized as JSON.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.resolve(path).map(|resolved| match resolved {
            Resolved::Map(map) => map.to_value(),
            Resolved::Value(value) => value.clone(),
        })
    }

    /// String value at a dotted path; `None` for missing or non-string values.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        match self.resolve(path)? {
            Resolved::Value(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Whether anything, including an explicit `null`, lives at `path`.
    pub fn has(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// True when `path` is missing or holds a blank value (see [`is_blank`]).
    pub fn is_empty_at(&self, path: &str) -> bool {
        match self.resolve(path) {
            None => true,
            Some(Resolved::Map(map)) => map.is_empty(),
            Some(Resolved::Value(value)) => is_blank(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in key order, or index order for a list.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        let mut items: Vec<(&str, &Node)> = self
            .entries
            .iter()
            .map(|(key, node)| (key.as_str(), node))
            .collect();
        if self.list {
            items.sort_by_key(|(key, _)| key.parse::<usize>().unwrap_or(usize::MAX));
        }
        items.into_iter()
    }

    /// Every leaf with its full dotted path, in iteration order.
    pub fn flatten(&self) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut Vec<(String, Value)>) {
        for (key, node) in self.iter() {
            let path = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}.{key}")
            };
            match node {
                Node::Leaf(value) => out.push((path, value.clone())),
                Node::Branch(inner) => inner.flatten_into(&path, out),
            }
        }
    }

    pub fn to_value(&self) -> Value {
        if self.list {
            return Value::Array(self.iter().map(|(_, node)| node.to_value()).collect());
        }
        Value::Object(
            self.entries
                .iter()
                .map(|(key, node)| (key.clone(), node.to_value()))
                .collect(),
        )
    }
}

fn resolve_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(found) = child(value, path) {
        return Some(found);
    }
    let (head, rest) = path.split_once('.')?;
    resolve_value(child(value, head)?, rest)
}

fn child<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(object) => object.get(key),
        Value::Array(items) => items.get(key.parse::<usize>().ok()?),
        _ => None,
    }
}

impl From<Value> for DotMap {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// Blank values: `null`, `false`, zero, the empty string and empty
/// arrays or objects.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}
