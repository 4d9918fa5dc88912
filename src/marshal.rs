//! Bidirectional conversion between host bags and interpreter values.
//!
//! The host side of a bag is a [`serde_json::Value`]; the interpreter side is
//! an [`mlua::Value`] owned by one specific interpreter state. Conversion in
//! (`to_lua`) is a deep copy, so scripts can never mutate caller data.
//! Conversion out (`from_lua`) walks tables with the stateless `next`
//! protocol, tracks table identity to terminate on cycles, promotes
//! contiguous 1..N integer-keyed tables to sequences, and stringifies every
//! other key.

use std::collections::{BTreeMap, HashSet};

use mlua::{Lua, Table};
use serde_json::{json, Map, Number, Value as JsonValue};

use crate::types::SandboxError;

/// Key used for the placeholder emitted in place of a repeated table.
pub const CIRCULAR_REF_KEY: &str = "__circular_ref";

/// Converts a host bag into a value owned by `lua`.
///
/// Arrays become tables keyed 1..N; objects become tables with their keys set
/// verbatim, so special-character keys (`com.example.key`, `X-Header`)
/// survive the round trip. Object entries with a JSON `null` value elide the
/// key: Lua tables cannot hold nil, and the established contract treats nil
/// and absence as the same thing.
pub fn to_lua<'lua>(lua: &'lua Lua, value: &JsonValue) -> mlua::Result<mlua::Value<'lua>> {
    match value {
        JsonValue::Null => Ok(mlua::Value::Nil),
        JsonValue::Bool(b) => Ok(mlua::Value::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(mlua::Value::Integer(i))
            } else {
                // JSON numbers outside i64 range parse as f64
                Ok(mlua::Value::Number(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        JsonValue::String(s) => Ok(mlua::Value::String(lua.create_string(s)?)),
        JsonValue::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            Ok(mlua::Value::Table(table))
        }
        JsonValue::Object(entries) => {
            let table = lua.create_table()?;
            for (key, item) in entries {
                table.raw_set(key.as_str(), to_lua(lua, item)?)?;
            }
            Ok(mlua::Value::Table(table))
        }
    }
}

/// Converts an interpreter value back into a host bag.
///
/// `visited` carries the identities of every table already entered during
/// this extraction; encountering one of them again yields
/// `{"__circular_ref": id}` instead of descending. The set is never pruned,
/// so a table referenced from two places collapses to the placeholder on its
/// second appearance even without a true cycle.
pub fn from_lua(
    value: mlua::Value<'_>,
    visited: &mut HashSet<usize>,
) -> Result<JsonValue, SandboxError> {
    match value {
        mlua::Value::Nil => Ok(JsonValue::Null),
        mlua::Value::Boolean(b) => Ok(JsonValue::Bool(b)),
        mlua::Value::Integer(i) => Ok(json!(i)),
        mlua::Value::Number(f) => Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| SandboxError::ConvertFailed(format!("non-finite number {f}"))),
        mlua::Value::String(s) => Ok(JsonValue::String(
            String::from_utf8_lossy(s.as_bytes()).into_owned(),
        )),
        mlua::Value::Table(table) => from_table(table, visited),
        other => Err(SandboxError::ConvertFailed(format!(
            "cannot convert a {} to a result value",
            other.type_name()
        ))),
    }
}

fn from_table(table: Table<'_>, visited: &mut HashSet<usize>) -> Result<JsonValue, SandboxError> {
    let id = table.to_pointer() as usize;
    if !visited.insert(id) {
        return Ok(json!({ CIRCULAR_REF_KEY: id }));
    }

    // Stateless `next` iteration from no-key to no-key.
    let mut entries: Vec<(mlua::Value, JsonValue)> = Vec::new();
    for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
        let (key, value) =
            pair.map_err(|e| SandboxError::ConvertFailed(format!("table iteration failed: {e}")))?;
        let converted = from_lua(value, visited)?;
        entries.push((key, converted));
    }

    // Keys exactly 1..N promote to a sequence.
    if let Some(sequence) = try_promote_sequence(&entries) {
        return Ok(sequence);
    }

    let mut object = Map::with_capacity(entries.len());
    for (key, value) in entries {
        object.insert(stringify_key(key)?, value);
    }
    Ok(JsonValue::Object(object))
}

/// Returns the entries as a JSON array when the keys are precisely the
/// integers 1..N with no gaps and nothing else.
fn try_promote_sequence(entries: &[(mlua::Value, JsonValue)]) -> Option<JsonValue> {
    if entries.is_empty() {
        return None;
    }
    let mut ordered = BTreeMap::new();
    for (key, value) in entries {
        match key {
            mlua::Value::Integer(i) if *i >= 1 => {
                ordered.insert(*i, value.clone());
            }
            _ => return None,
        }
    }
    if *ordered.keys().last().unwrap() != ordered.len() as i64 {
        return None;
    }
    Some(JsonValue::Array(ordered.into_values().collect()))
}

fn stringify_key(key: mlua::Value<'_>) -> Result<String, SandboxError> {
    match key {
        mlua::Value::String(s) => Ok(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        mlua::Value::Integer(i) => Ok(i.to_string()),
        mlua::Value::Number(f) => Ok(f.to_string()),
        mlua::Value::Boolean(b) => Ok(b.to_string()),
        other => Err(SandboxError::ConvertFailed(format!(
            "unsupported mapping key of type {}",
            other.type_name()
        ))),
    }
}
