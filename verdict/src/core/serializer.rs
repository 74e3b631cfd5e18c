//! JSON form of isolate trees, used to persist and resume suite state.
//!
//! Every node becomes an object with `$type`, optional `key`, `status`,
//! optional `allowReorder`, optional `data`, and optional `children`. Each
//! key/value pair passes through a replacer that may rewrite or drop it.

use serde_json::{Map, Value};

use crate::core::isolate::{Isolate, IsolateKind, IsolatePayload, IsolateRef};
use crate::core::signal::DebounceTimer;
use crate::core::status::{IsolateStatus, TestStatus};
use crate::core::test_isolate::{Severity, TestData};
use crate::error::VerdictError;

pub const KEY_TYPE: &str = "$type";
pub const KEY_KEY: &str = "key";
pub const KEY_STATUS: &str = "status";
pub const KEY_ALLOW_REORDER: &str = "allowReorder";
pub const KEY_DATA: &str = "data";
pub const KEY_CHILDREN: &str = "children";

pub const DATA_FIELD_NAME: &str = "fieldName";
pub const DATA_GROUP_NAME: &str = "groupName";
pub const DATA_MESSAGE: &str = "message";
pub const DATA_SEVERITY: &str = "severity";
pub const DATA_TEST_STATUS: &str = "testStatus";
pub const DATA_NAME: &str = "name";
pub const DATA_VALUE: &str = "value";

/// Replacer that keeps every pair unchanged.
pub fn keep_all(_: &str, value: Value) -> Option<Value> {
    Some(value)
}

/// Serialize `root` and its descendants.
pub fn serialize<R>(root: &IsolateRef, replacer: R) -> Value
where
    R: Fn(&str, Value) -> Option<Value>,
{
    node_to_value(root, &replacer)
}

pub fn serialize_to_string<R>(root: &IsolateRef, replacer: R) -> Result<String, VerdictError>
where
    R: Fn(&str, Value) -> Option<Value>,
{
    serde_json::to_string(&serialize(root, replacer))
        .map_err(|err| VerdictError::Serialization(err.to_string()))
}

fn put(
    map: &mut Map<String, Value>,
    key: &str,
    value: Value,
    replacer: &dyn Fn(&str, Value) -> Option<Value>,
) {
    if let Some(value) = replacer(key, value) {
        map.insert(key.to_string(), value);
    }
}

fn node_to_value(node: &IsolateRef, replacer: &dyn Fn(&str, Value) -> Option<Value>) -> Value {
    let mut map = Map::new();
    put(
        &mut map,
        KEY_TYPE,
        Value::String(node.kind().as_str().to_string()),
        replacer,
    );
    if let Some(key) = node.key() {
        put(&mut map, KEY_KEY, Value::String(key.to_string()), replacer);
    }
    put(
        &mut map,
        KEY_STATUS,
        Value::String(node.status().as_str().to_string()),
        replacer,
    );
    if node.allows_reorder() {
        put(&mut map, KEY_ALLOW_REORDER, Value::Bool(true), replacer);
    }

    let data = payload_to_value(&node.payload(), replacer);
    if !data.is_empty() {
        put(&mut map, KEY_DATA, Value::Object(data), replacer);
    }

    let children: Vec<Value> = node
        .children()
        .iter()
        .map(|child| node_to_value(child, replacer))
        .collect();
    if !children.is_empty() {
        put(&mut map, KEY_CHILDREN, Value::Array(children), replacer);
    }
    Value::Object(map)
}

fn payload_to_value(
    payload: &IsolatePayload,
    replacer: &dyn Fn(&str, Value) -> Option<Value>,
) -> Map<String, Value> {
    let mut data = Map::new();
    match payload {
        IsolatePayload::None | IsolatePayload::Debounce(_) => {}
        IsolatePayload::Test(test) => {
            put(
                &mut data,
                DATA_FIELD_NAME,
                Value::String(test.field_name.clone()),
                replacer,
            );
            if let Some(group) = &test.group_name {
                put(&mut data, DATA_GROUP_NAME, Value::String(group.clone()), replacer);
            }
            if let Some(message) = &test.message {
                put(&mut data, DATA_MESSAGE, Value::String(message.clone()), replacer);
            }
            let severity = match test.severity {
                Severity::Error => "error",
                Severity::Warn => "warn",
            };
            put(
                &mut data,
                DATA_SEVERITY,
                Value::String(severity.to_string()),
                replacer,
            );
            put(
                &mut data,
                DATA_TEST_STATUS,
                Value::String(test.status.as_str().to_string()),
                replacer,
            );
        }
        IsolatePayload::Group { name } => {
            put(&mut data, DATA_NAME, Value::String(name.clone()), replacer);
        }
        IsolatePayload::Custom(value) => {
            put(&mut data, DATA_VALUE, value.clone(), replacer);
        }
    }
    data
}

/// Rebuild a tree from its JSON form. Parent links are restored; cancel
/// signals and debounce timers are created fresh.
pub fn deserialize(value: &Value) -> Result<IsolateRef, VerdictError> {
    let object = value
        .as_object()
        .ok_or_else(|| VerdictError::InvalidDump("isolate must be a JSON object".to_string()))?;

    let kind = object
        .get(KEY_TYPE)
        .and_then(Value::as_str)
        .map(IsolateKind::parse)
        .ok_or_else(|| VerdictError::InvalidDump(format!("missing '{KEY_TYPE}'")))?;
    let key = object
        .get(KEY_KEY)
        .and_then(Value::as_str)
        .map(str::to_string);
    let status = match object.get(KEY_STATUS) {
        Some(raw) => serde_json::from_value::<IsolateStatus>(raw.clone())
            .map_err(|err| VerdictError::InvalidDump(format!("isolate status: {err}")))?,
        None => IsolateStatus::Initial,
    };
    let allow_reorder = object
        .get(KEY_ALLOW_REORDER)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let empty = Map::new();
    let data = match object.get(KEY_DATA) {
        Some(Value::Object(data)) => data,
        Some(_) => {
            return Err(VerdictError::InvalidDump(format!(
                "'{KEY_DATA}' must be an object"
            )));
        }
        None => &empty,
    };
    let payload = payload_from_data(&kind, data)?;

    let node = Isolate::restored(kind, payload, key, allow_reorder, status);
    if let Some(children) = object.get(KEY_CHILDREN) {
        let children = children.as_array().ok_or_else(|| {
            VerdictError::InvalidDump(format!("'{KEY_CHILDREN}' must be an array"))
        })?;
        for child in children {
            Isolate::append_child(&node, deserialize(child)?);
        }
    }
    Ok(node)
}

pub fn deserialize_str(input: &str) -> Result<IsolateRef, VerdictError> {
    let value: Value =
        serde_json::from_str(input).map_err(|err| VerdictError::InvalidDump(err.to_string()))?;
    deserialize(&value)
}

fn payload_from_data(
    kind: &IsolateKind,
    data: &Map<String, Value>,
) -> Result<IsolatePayload, VerdictError> {
    let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
    let payload = match kind {
        IsolateKind::Test => {
            let field = text(DATA_FIELD_NAME).ok_or_else(|| {
                VerdictError::InvalidDump(format!("test isolate missing '{DATA_FIELD_NAME}'"))
            })?;
            let mut test = TestData::new(field);
            test.group_name = text(DATA_GROUP_NAME);
            test.message = text(DATA_MESSAGE);
            if let Some(raw) = data.get(DATA_SEVERITY) {
                test.severity = serde_json::from_value::<Severity>(raw.clone())
                    .map_err(|err| VerdictError::InvalidDump(format!("severity: {err}")))?;
            }
            if let Some(raw) = data.get(DATA_TEST_STATUS) {
                test.status = serde_json::from_value::<TestStatus>(raw.clone())
                    .map_err(|err| VerdictError::InvalidDump(format!("test status: {err}")))?;
            }
            IsolatePayload::Test(test)
        }
        IsolateKind::Group => IsolatePayload::Group {
            name: text(DATA_NAME).unwrap_or_default(),
        },
        IsolateKind::Debounce => IsolatePayload::Debounce(DebounceTimer::new()),
        IsolateKind::Custom(_) => match data.get(DATA_VALUE) {
            Some(value) => IsolatePayload::Custom(value.clone()),
            None => IsolatePayload::None,
        },
        _ => IsolatePayload::None,
    };
    Ok(payload)
}
