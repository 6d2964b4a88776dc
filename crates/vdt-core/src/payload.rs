//! Graph payload codec.
//!
//! Targets flatten arbitrary object graphs into an index list: element 0 is
//! the root, containers hold integer indices into the list and primitives sit
//! inline. Shared and cyclic references therefore survive the trip, and
//! values JSON cannot carry travel as marker strings.

use serde_json::{Map, Number, Value};

pub const UNDEFINED_MARKER: &str = "__vue_devtools_undefined__";
pub const INFINITY_MARKER: &str = "__vue_devtools_infinity__";
pub const NEGATIVE_INFINITY_MARKER: &str = "__vue_devtools_negative_infinity__";
pub const NAN_MARKER: &str = "__vue_devtools_nan__";
pub const FUNCTION_PREFIX: &str = "[native Function";

pub const MAX_DECODE_DEPTH: usize = 64;
/// Upper bound on nodes produced by one decode. Shared references expand
/// once per use, so without it a short list can fan out exponentially.
pub const MAX_DECODE_NODES: usize = 100_000;

/// Render-safe result of decoding. Every variant is finite.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<DisplayValue>),
    Object(Vec<(String, DisplayValue)>),
    Undefined,
    Infinity,
    NegativeInfinity,
    NaN,
    Function(String),
    /// Reference back to an ancestor of this node.
    Circular,
    /// Nesting deeper than [`MAX_DECODE_DEPTH`], or past the
    /// [`MAX_DECODE_NODES`] budget.
    Truncated,
    Invalid(String),
}

impl DisplayValue {
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            DisplayValue::Circular | DisplayValue::Truncated | DisplayValue::Invalid(_)
        )
    }

    pub fn get(&self, key: &str) -> Option<&DisplayValue> {
        match self {
            DisplayValue::Object(fields) => fields
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            DisplayValue::Null => Value::Null,
            DisplayValue::Bool(value) => Value::Bool(value),
            DisplayValue::Number(value) => Value::Number(value),
            DisplayValue::String(value) => Value::String(value),
            DisplayValue::Array(items) => {
                Value::Array(items.into_iter().map(DisplayValue::into_json).collect())
            }
            DisplayValue::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, value.into_json()))
                    .collect::<Map<String, Value>>(),
            ),
            DisplayValue::Undefined => Value::String("undefined".to_string()),
            DisplayValue::Infinity => Value::String("Infinity".to_string()),
            DisplayValue::NegativeInfinity => Value::String("-Infinity".to_string()),
            DisplayValue::NaN => Value::String("NaN".to_string()),
            DisplayValue::Function(name) => Value::String(format!("ƒ {name}")),
            DisplayValue::Circular => Value::String("[Circular]".to_string()),
            DisplayValue::Truncated => Value::String("[Truncated]".to_string()),
            DisplayValue::Invalid(reason) => Value::String(format!("[Invalid: {reason}]")),
        }
    }
}

/// Decodes an index-list payload. Never fails: malformed fragments become
/// [`DisplayValue::Invalid`] in place.
pub fn decode(payload: &Value) -> DisplayValue {
    match payload {
        Value::Array(list) => decode_list(list),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(list)) => decode_list(&list),
            Ok(other) => DisplayValue::Invalid(format!(
                "expected index list, found {}",
                json_kind(&other)
            )),
            Err(err) => DisplayValue::Invalid(format!("unparseable payload: {err}")),
        },
        other => DisplayValue::Invalid(format!("expected index list, found {}", json_kind(other))),
    }
}

/// Convenience for handlers that feed decoded payloads into typed records.
pub fn decode_json(payload: &Value) -> Value {
    decode(payload).into_json()
}

fn decode_list(list: &[Value]) -> DisplayValue {
    if list.is_empty() {
        return DisplayValue::Invalid("empty index list".to_string());
    }
    let mut decoder = ListDecoder {
        list,
        ancestors: Vec::new(),
        budget: MAX_DECODE_NODES,
    };
    decoder.node(0, 0)
}

struct ListDecoder<'a> {
    list: &'a [Value],
    ancestors: Vec<usize>,
    budget: usize,
}

impl ListDecoder<'_> {
    fn reference(&mut self, reference: &Value, depth: usize) -> DisplayValue {
        match reference.as_u64().and_then(|index| usize::try_from(index).ok()) {
            Some(index) => self.node(index, depth),
            None => DisplayValue::Invalid(format!("bad reference {reference}")),
        }
    }

    fn node(&mut self, index: usize, depth: usize) -> DisplayValue {
        let Some(entry) = self.list.get(index) else {
            return DisplayValue::Invalid(format!("reference {index} out of range"));
        };
        if self.ancestors.contains(&index) {
            return DisplayValue::Circular;
        }
        if depth >= MAX_DECODE_DEPTH || self.budget == 0 {
            return DisplayValue::Truncated;
        }
        self.budget -= 1;

        match entry {
            Value::Object(map) => {
                self.ancestors.push(index);
                let fields = map
                    .iter()
                    .map(|(key, child)| (key.clone(), self.reference(child, depth + 1)))
                    .collect();
                self.ancestors.pop();
                DisplayValue::Object(fields)
            }
            Value::Array(items) => {
                self.ancestors.push(index);
                let items = items
                    .iter()
                    .map(|child| self.reference(child, depth + 1))
                    .collect();
                self.ancestors.pop();
                DisplayValue::Array(items)
            }
            leaf => decode_leaf(leaf),
        }
    }
}

fn decode_leaf(value: &Value) -> DisplayValue {
    match value {
        Value::Null => DisplayValue::Null,
        Value::Bool(value) => DisplayValue::Bool(*value),
        Value::Number(value) => DisplayValue::Number(value.clone()),
        Value::String(value) => decode_marker(value),
        Value::Array(_) | Value::Object(_) => {
            DisplayValue::Invalid("container in leaf position".to_string())
        }
    }
}

fn decode_marker(value: &str) -> DisplayValue {
    match value {
        UNDEFINED_MARKER => DisplayValue::Undefined,
        INFINITY_MARKER => DisplayValue::Infinity,
        NEGATIVE_INFINITY_MARKER => DisplayValue::NegativeInfinity,
        NAN_MARKER => DisplayValue::NaN,
        _ => match value.strip_prefix(FUNCTION_PREFIX) {
            Some(rest) => {
                let name = rest.trim().trim_end_matches(']').trim();
                DisplayValue::Function(if name.is_empty() {
                    "anonymous".to_string()
                } else {
                    name.to_string()
                })
            }
            None => DisplayValue::String(value.to_string()),
        },
    }
}

/// Flattens a JSON tree into the index-list form [`decode`] reads.
pub fn encode(value: &Value) -> Value {
    let mut list = Vec::new();
    encode_into(value, &mut list);
    Value::Array(list)
}

fn encode_into(value: &Value, list: &mut Vec<Value>) -> usize {
    let index = list.len();
    match value {
        Value::Object(map) => {
            list.push(Value::Null);
            let mut stored = Map::new();
            for (key, child) in map {
                let child_index = encode_into(child, list);
                stored.insert(key.clone(), Value::from(child_index));
            }
            list[index] = Value::Object(stored);
        }
        Value::Array(items) => {
            list.push(Value::Null);
            let stored = items
                .iter()
                .map(|child| Value::from(encode_into(child, list)))
                .collect();
            list[index] = Value::Array(stored);
        }
        leaf => list.push(leaf.clone()),
    }
    index
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
