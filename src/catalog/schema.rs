use crate::catalog::types::Value;
use serde::{Deserialize, Serialize};

/// Where a key lives inside a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyPath {
    /// Dotted field path, e.g. `"author.name"`.
    Field(String),
    /// Array key assembled from several field paths.
    Compound(Vec<String>),
}

impl KeyPath {
    pub fn field(path: impl Into<String>) -> Self {
        KeyPath::Field(path.into())
    }

    pub fn compound<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath::Compound(paths.into_iter().map(Into::into).collect())
    }

    /// Evaluates the path against a record. `None` when any component is
    /// missing.
    pub fn extract(&self, record: &Value) -> Option<Value> {
        match self {
            KeyPath::Field(path) => record.get_field(path).cloned(),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|p| record.get_field(p).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    /// Array-valued keys index each element separately.
    pub multi_entry: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSchema {
    pub name: String,
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    pub fn with_key_path(mut self, key_path: KeyPath) -> Self {
        self.key_path = Some(key_path);
        self
    }

    pub fn with_auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, key_path: KeyPath) -> Self {
        self.indexes.push(IndexDef {
            name: name.into(),
            key_path,
            unique: false,
            multi_entry: false,
        });
        self
    }

    pub fn with_unique_index(mut self, name: impl Into<String>, key_path: KeyPath) -> Self {
        self.indexes.push(IndexDef {
            name: name.into(),
            key_path,
            unique: true,
            multi_entry: false,
        });
        self
    }

    pub fn with_multi_entry_index(mut self, name: impl Into<String>, key_path: KeyPath) -> Self {
        self.indexes.push(IndexDef {
            name: name.into(),
            key_path,
            unique: false,
            multi_entry: true,
        });
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|idx| idx.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::KeyPath;
    use crate::catalog::types::Value;
    use serde_json::json;

    #[test]
    fn compound_paths_build_array_keys() {
        let record = Value::from(json!({"last": "Le Guin", "first": "Ursula"}));
        let key = KeyPath::compound(["last", "first"])
            .extract(&record)
            .expect("both fields present");
        assert_eq!(
            key,
            Value::Array(vec![Value::from("Le Guin"), Value::from("Ursula")])
        );
        assert!(KeyPath::compound(["last", "middle"]).extract(&record).is_none());
    }
}
