//! Three-way merge of JSON entity payloads.
//!
//! # Algorithm
//!
//! The merge starts from a full copy of the server payload, so fields the
//! schema does not track keep the server value. For each tracked field:
//!
//! 1. Only local changed relative to base: the local value is taken
//! 2. Only server changed: the server value already stands
//! 3. Both changed: the server value stands and the local edit is discarded
//!
//! Keyed list fields (when both sides hold arrays) are merged item by item:
//! every server item is kept, a local item is added only when its key is
//! absent from both base and server, and an item present in base but missing
//! on the server counts as a server-side deletion.

use crate::schema::{FieldKind, Schema};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Merge `local` and `server` edits of the same `base` snapshot.
///
/// Returns `None` when any input is not a JSON object; callers fall back to
/// the server version.
pub fn three_way_merge(
    schema: &Schema,
    entity_type: &str,
    base: &Value,
    local: &Value,
    server: &Value,
) -> Option<Value> {
    let base_obj = base.as_object()?;
    let local_obj = local.as_object()?;
    let server_obj = server.as_object()?;

    let mut merged: Map<String, Value> = server_obj.clone();

    for field in schema.tracked_fields(entity_type, &[base, local, server]) {
        let base_val = base_obj.get(&field.name);
        let local_val = local_obj.get(&field.name);
        let server_val = server_obj.get(&field.name);

        if let FieldKind::KeyedList { key } = &field.kind {
            if let (Some(Value::Array(local_items)), Some(Value::Array(server_items))) =
                (local_val, server_val)
            {
                let base_items = match base_val {
                    Some(Value::Array(items)) => items.as_slice(),
                    _ => &[],
                };
                let items = merge_keyed_list(key, base_items, local_items, server_items);
                merged.insert(field.name.clone(), Value::Array(items));
                continue;
            }
        }

        if local_val != base_val && server_val == base_val {
            match local_val {
                Some(value) => {
                    merged.insert(field.name.clone(), value.clone());
                }
                None => {
                    merged.remove(&field.name);
                }
            }
        }
    }

    Some(Value::Object(merged))
}

/// Merge lists of objects identified by their `key` member.
///
/// Server items come first in server order, followed by purely local
/// additions in local order.
pub fn merge_keyed_list(
    key: &str,
    base: &[Value],
    local: &[Value],
    server: &[Value],
) -> Vec<Value> {
    let server_keys = item_keys(key, server);
    let base_keys = item_keys(key, base);

    let mut merged: Vec<Value> = server.to_vec();

    for item in local {
        match item_key(key, item) {
            Some(k) => {
                if !server_keys.contains(&k) && !base_keys.contains(&k) {
                    merged.push(item.clone());
                }
            }
            // No identity: only a value that exists on neither side is new
            None => {
                if !server.contains(item) && !base.contains(item) {
                    merged.push(item.clone());
                }
            }
        }
    }

    merged
}

fn item_key(key: &str, item: &Value) -> Option<String> {
    item.get(key).filter(|k| !k.is_null()).map(Value::to_string)
}

fn item_keys(key: &str, items: &[Value]) -> HashSet<String> {
    items.iter().filter_map(|item| item_key(key, item)).collect()
}
