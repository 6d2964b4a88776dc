use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

pub mod bridge_ipc;
pub mod payload;

pub const ANONYMOUS_COMPONENT: &str = "Anonymous Component";
pub const UNKNOWN_EVENT: &str = "(unknown event)";

/// Target-assigned component instance identifier (`"<app>:<uid>"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Targets send ids as strings or bare numbers.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = Value::deserialize(deserializer)?;
        InstanceId::from_json(&val)
            .ok_or_else(|| serde::de::Error::custom("expected string or number for instance id"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentNode {
    pub id: InstanceId,
    pub name: String,
    pub inactive: bool,
    pub is_fragment: bool,
    pub children: Vec<ComponentNode>,
}

impl ComponentNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: InstanceId::new(id),
            name: name.into(),
            inactive: false,
            is_fragment: false,
            children: Vec::new(),
        }
    }

    /// Reads a node out of a decoded tree. Children that do not carry an id
    /// are dropped; everything else falls back to defaults.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let id = map.get("id").and_then(InstanceId::from_json)?;
        let name = map
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(ANONYMOUS_COMPONENT)
            .to_string();
        let children = map
            .get("children")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(ComponentNode::from_json).collect())
            .unwrap_or_default();
        Some(Self {
            id,
            name,
            inactive: bool_field(value, "inactive"),
            is_fragment: bool_field(value, "isFragment"),
            children,
        })
    }
}

/// Component tree snapshot carried by `flush`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlushPayload {
    pub instances: Vec<ComponentNode>,
    pub inspected_instance: Option<Value>,
}

impl FlushPayload {
    pub fn from_json(value: &Value) -> Self {
        let instances = value
            .get("instances")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(ComponentNode::from_json).collect())
            .unwrap_or_default();
        let inspected_instance = value
            .get("inspectedInstance")
            .filter(|inspected| inspected.is_object())
            .cloned();
        Self {
            instances,
            inspected_instance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleInstancePayload {
    pub id: InstanceId,
    #[serde(default = "default_true")]
    pub expanded: bool,
}

impl ToggleInstancePayload {
    /// Only the id is required; a missing or placeholder `expanded` reads as
    /// expanded.
    pub fn from_json(value: &Value) -> Option<Self> {
        let id = value.get("id").and_then(InstanceId::from_json)?;
        let expanded = value
            .get("expanded")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Some(Self { id, expanded })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationCall {
    #[serde(rename = "type")]
    pub mutation_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// One committed store mutation on the target (`vuex:mutation`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub mutation: MutationCall,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub snapshot: Option<Value>,
}

/// Initial store snapshot carried by `vuex:init`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VuexSnapshot {
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub getters: Value,
}

/// Application-level event emitted by a component (`event:triggered`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEventRecord {
    pub event_name: String,
    #[serde(default, rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl AppEventRecord {
    /// Reads a decoded record field by field. Any object is accepted;
    /// fields that fail to decode fall back to their defaults.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            event_name: text("eventName").unwrap_or_else(|| UNKNOWN_EVENT.to_string()),
            event_type: text("type").unwrap_or_default(),
            instance_id: map.get("instanceId").and_then(InstanceId::from_json),
            instance_name: text("instanceName"),
            payload: map.get("payload").cloned().unwrap_or(Value::Null),
            timestamp: map.get("timestamp").and_then(Value::as_i64),
        })
    }
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn default_true() -> bool {
    true
}
