use crate::catalog::types::Value;
use crate::commit::tx::{WriteKind, write_at};
use crate::error::{OrdkvError, ResourceType};
use crate::storage::engine::{EngineError, EngineTransaction};

/// Marker value of the keyed form meaning "delete this key".
pub const DELETE_MARKER: &str = "\0";

#[derive(Debug, Clone, PartialEq)]
pub enum TableOp {
    Add { value: Value, key: Option<Value> },
    Put { value: Value, key: Option<Value> },
    Delete(Value),
    /// Re-keys a record: read, delete, write under `to`.
    Move { from: Value, to: Value },
    /// Writes a copy under `to`, keeping the source.
    Copy { from: Value, to: Value },
    Clear,
}

impl TableOp {
    pub fn add(value: impl Into<Value>) -> Self {
        TableOp::Add {
            value: value.into(),
            key: None,
        }
    }

    pub fn add_at(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        TableOp::Add {
            value: value.into(),
            key: Some(key.into()),
        }
    }

    pub fn put(value: impl Into<Value>) -> Self {
        TableOp::Put {
            value: value.into(),
            key: None,
        }
    }

    pub fn put_at(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        TableOp::Put {
            value: value.into(),
            key: Some(key.into()),
        }
    }

    pub fn delete(key: impl Into<Value>) -> Self {
        TableOp::Delete(key.into())
    }

    pub fn move_key(from: impl Into<Value>, to: impl Into<Value>) -> Self {
        TableOp::Move {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn copy_key(from: impl Into<Value>, to: impl Into<Value>) -> Self {
        TableOp::Copy {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Issues the operation against `store` and returns the key it wrote,
    /// or `None` for deletes and clears.
    pub(crate) fn apply(
        self,
        native: &mut dyn EngineTransaction,
        store: &str,
    ) -> Result<Option<Value>, OrdkvError> {
        match self {
            TableOp::Add { value, key } => write(native, store, value, key, WriteKind::Add).map(Some),
            TableOp::Put { value, key } => write(native, store, value, key, WriteKind::Put).map(Some),
            TableOp::Delete(key) => {
                native.delete(store, &key)?;
                Ok(None)
            }
            TableOp::Move { from, to } => {
                let record = read_source(native, store, &from)?;
                native.delete(store, &from)?;
                write_at(native, store, record, to, WriteKind::Put).map(Some)
            }
            TableOp::Copy { from, to } => {
                let record = read_source(native, store, &from)?;
                write_at(native, store, record, to, WriteKind::Put).map(Some)
            }
            TableOp::Clear => {
                native.clear(store)?;
                Ok(None)
            }
        }
    }
}

fn write(
    native: &mut dyn EngineTransaction,
    store: &str,
    value: Value,
    key: Option<Value>,
    kind: WriteKind,
) -> Result<Value, OrdkvError> {
    match (key, kind) {
        (Some(key), kind) => write_at(native, store, value, key, kind),
        (None, WriteKind::Add) => Ok(native.add(store, value, None)?),
        (None, WriteKind::Put) => Ok(native.put(store, value, None)?),
    }
}

fn read_source(
    native: &mut dyn EngineTransaction,
    store: &str,
    key: &Value,
) -> Result<Value, OrdkvError> {
    native.get(store, key)?.ok_or_else(|| {
        EngineError::NotFound {
            resource_type: ResourceType::Record,
            resource_id: format!("{store}[{}]", key.to_json()),
        }
        .into()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpGroup {
    Add(Vec<Value>),
    Put(Vec<Value>),
    /// Keys to delete.
    Delete(Vec<Value>),
    Clear,
}

/// The operations of one store in a batch, in any of the accepted forms.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOps {
    Flat(Vec<TableOp>),
    /// `(key, value)` pairs, put under the key; a [`DELETE_MARKER`] value
    /// deletes the key instead.
    Keyed(Vec<(Value, Value)>),
    Grouped(Vec<OpGroup>),
}

impl TableOps {
    /// Flattens into issue order.
    pub fn into_ops(self) -> Vec<TableOp> {
        match self {
            TableOps::Flat(ops) => ops,
            TableOps::Keyed(pairs) => pairs
                .into_iter()
                .map(|(key, value)| {
                    if value.as_str() == Some(DELETE_MARKER) {
                        TableOp::Delete(key)
                    } else {
                        TableOp::Put {
                            value,
                            key: Some(key),
                        }
                    }
                })
                .collect(),
            TableOps::Grouped(groups) => groups
                .into_iter()
                .flat_map(|group| -> Vec<TableOp> {
                    match group {
                        OpGroup::Add(values) => values.into_iter().map(TableOp::add).collect(),
                        OpGroup::Put(values) => values.into_iter().map(TableOp::put).collect(),
                        OpGroup::Delete(keys) => keys.into_iter().map(TableOp::Delete).collect(),
                        OpGroup::Clear => vec![TableOp::Clear],
                    }
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TableOps::Flat(ops) => ops.len(),
            TableOps::Keyed(pairs) => pairs.len(),
            TableOps::Grouped(groups) => groups
                .iter()
                .map(|group| match group {
                    OpGroup::Add(values) | OpGroup::Put(values) | OpGroup::Delete(values) => {
                        values.len()
                    }
                    OpGroup::Clear => 1,
                })
                .sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses the three JSON forms:
    ///
    /// - flat: `[{"type": "add" | "put" | "del" | "move" | "copy" | "clear", "key": .., "value": ..}]`;
    ///   `move` and `copy` read `key` and write under the key given as `value`
    /// - grouped: `[{"add": [..]}, {"put": [..]}, {"del": [..]}, {"clear": {}}]`,
    ///   issued in array order
    /// - keyed: `{"<key>": <value>}`, with `"\u0000"` deleting the key
    ///
    /// Operation names are reserved: a keyed object using one as a key is
    /// rejected, as is an array mixing flat and grouped elements.
    pub fn from_json(ops: &serde_json::Value) -> Result<Self, OrdkvError> {
        match ops {
            serde_json::Value::Array(items) => {
                let mut flat = Vec::new();
                let mut groups = Vec::new();
                for item in items {
                    if item.get("type").is_some() {
                        flat.push(flat_op_from_json(item)?);
                    } else {
                        groups.push(group_from_json(item)?);
                    }
                }
                match (flat.is_empty(), groups.is_empty()) {
                    (_, true) => Ok(TableOps::Flat(flat)),
                    (true, false) => Ok(TableOps::Grouped(groups)),
                    (false, false) => Err(OrdkvError::Validation(
                        "operation array mixes typed operations and groups".into(),
                    )),
                }
            }
            serde_json::Value::Object(fields) => {
                if let Some(reserved) = fields.keys().find(|k| is_operation_name(k)) {
                    return Err(OrdkvError::Validation(format!(
                        "'{reserved}' is an operation name; write grouped operations as an \
                         array, or use the flat form to address that key"
                    )));
                }
                Ok(TableOps::Keyed(
                    fields
                        .iter()
                        .map(|(key, value)| (Value::from(key.as_str()), Value::from(value.clone())))
                        .collect(),
                ))
            }
            other => Err(OrdkvError::Validation(format!(
                "table operations must be an array or an object, got {other}"
            ))),
        }
    }
}

fn is_operation_name(name: &str) -> bool {
    matches!(name, "add" | "put" | "del" | "delete" | "move" | "copy" | "clear")
}

impl From<Vec<TableOp>> for TableOps {
    fn from(ops: Vec<TableOp>) -> Self {
        TableOps::Flat(ops)
    }
}

fn flat_op_from_json(item: &serde_json::Value) -> Result<TableOp, OrdkvError> {
    let field = |name: &str| item.get(name).cloned().map(Value::from);
    let required = |name: &str, kind: &str| {
        field(name).ok_or_else(|| OrdkvError::Validation(format!("'{kind}' operation needs '{name}'")))
    };
    let kind = item
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| OrdkvError::Validation("operation 'type' must be a string".into()))?;
    Ok(match kind {
        "add" => TableOp::Add {
            value: required("value", kind)?,
            key: field("key"),
        },
        "put" => TableOp::Put {
            value: required("value", kind)?,
            key: field("key"),
        },
        "del" | "delete" => TableOp::Delete(required("key", kind)?),
        "move" => TableOp::Move {
            from: required("key", kind)?,
            to: required("value", kind)?,
        },
        "copy" => TableOp::Copy {
            from: required("key", kind)?,
            to: required("value", kind)?,
        },
        "clear" => TableOp::Clear,
        other => {
            return Err(OrdkvError::Validation(format!(
                "unknown operation type '{other}'"
            )));
        }
    })
}

/// One element of the grouped form: an object naming exactly one operation.
fn group_from_json(item: &serde_json::Value) -> Result<OpGroup, OrdkvError> {
    let serde_json::Value::Object(fields) = item else {
        return Err(OrdkvError::Validation(format!(
            "operation must be an object, got {item}"
        )));
    };
    let mut named = fields.iter();
    let (Some((name, body)), None) = (named.next(), named.next()) else {
        return Err(OrdkvError::Validation(
            "an operation group names exactly one of add, put, del or clear; \
             typed operations need a 'type'"
                .into(),
        ));
    };
    if name == "clear" {
        return Ok(OpGroup::Clear);
    }
    let serde_json::Value::Array(items) = body else {
        return Err(OrdkvError::Validation(format!("'{name}' group must be an array")));
    };
    let values = items.iter().cloned().map(Value::from).collect();
    match name.as_str() {
        "add" => Ok(OpGroup::Add(values)),
        "put" => Ok(OpGroup::Put(values)),
        "del" | "delete" => Ok(OpGroup::Delete(values)),
        other => Err(OrdkvError::Validation(format!(
            "unknown operation group '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{OpGroup, TableOp, TableOps};
    use crate::catalog::types::Value;
    use crate::error::OrdkvErrorCode;
    use serde_json::json;

    #[test]
    fn keyed_form_turns_marker_into_delete() {
        let ops = TableOps::Keyed(vec![
            (Value::from("a"), Value::from(json!({"n": 1}))),
            (Value::from("b"), Value::from("\0")),
        ]);
        assert_eq!(ops.len(), 2);
        assert_eq!(
            ops.into_ops(),
            vec![
                TableOp::put_at("a", Value::from(json!({"n": 1}))),
                TableOp::delete("b"),
            ]
        );
    }

    #[test]
    fn grouped_form_flattens_in_group_order() {
        let ops = TableOps::Grouped(vec![
            OpGroup::Put(vec![Value::from(json!({"id": 1})), Value::from(json!({"id": 2}))]),
            OpGroup::Delete(vec![Value::Integer(3)]),
            OpGroup::Clear,
        ]);
        assert_eq!(ops.len(), 4);
        let flat = ops.into_ops();
        assert_eq!(flat[2], TableOp::delete(3));
        assert_eq!(flat[3], TableOp::Clear);
    }

    #[test]
    fn json_forms_are_told_apart() {
        let flat = TableOps::from_json(&json!([
            {"type": "add", "key": 1, "value": {"title": "B1"}},
            {"type": "move", "key": 1, "value": 2},
            {"type": "copy", "key": 2, "value": 3},
            {"type": "del", "key": 2},
            {"type": "clear"}
        ]))
        .expect("flat");
        assert_eq!(
            flat,
            TableOps::Flat(vec![
                TableOp::add_at(1, Value::from(json!({"title": "B1"}))),
                TableOp::move_key(1, 2),
                TableOp::copy_key(2, 3),
                TableOp::delete(2),
                TableOp::Clear,
            ])
        );

        let grouped = TableOps::from_json(&json!([
            {"del": [1]},
            {"add": [{"id": 4}]},
            {"clear": {}},
            {"put": [{"id": 5}]}
        ]))
        .expect("grouped");
        assert_eq!(
            grouped,
            TableOps::Grouped(vec![
                OpGroup::Delete(vec![Value::Integer(1)]),
                OpGroup::Add(vec![Value::from(json!({"id": 4}))]),
                OpGroup::Clear,
                OpGroup::Put(vec![Value::from(json!({"id": 5}))]),
            ])
        );
        assert_eq!(grouped.len(), 4);

        let keyed = TableOps::from_json(&json!({"k1": {"v": 1}, "k2": "\u{0000}"})).expect("keyed");
        assert_eq!(keyed.into_ops()[1], TableOp::delete("k2"));
    }

    #[test]
    fn clear_group_counts_whatever_its_body() {
        for body in [json!({}), json!(true), json!(null)] {
            let ops = TableOps::from_json(&json!([{"clear": body}])).expect("clear");
            assert_eq!(ops.into_ops(), vec![TableOp::Clear]);
        }
    }

    #[test]
    fn malformed_json_ops_are_validation_errors() {
        for ops in [
            json!([{"value": 1}]),
            json!([{"type": "rename"}]),
            json!([{"type": 7}]),
            json!([{"type": "copy", "key": 1}]),
            json!([{"type": "del"}]),
            json!([{"add": 5}]),
            json!([{"add": [1], "put": [2]}]),
            json!([{"type": "clear"}, {"clear": {}}]),
            json!({"del": [1]}),
            json!({"k": 1, "clear": {}}),
            json!(42),
        ] {
            let err = TableOps::from_json(&ops).expect_err("malformed");
            assert_eq!(err.code(), OrdkvErrorCode::Validation, "{ops}");
        }
    }
}
