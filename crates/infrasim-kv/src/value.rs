//! Typed values stored in the keyspace.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{KvError, KvResult};

/// Fixed per-entry bookkeeping overhead, in bytes.
pub const ENTRY_OVERHEAD: u64 = 48;

/// The type tag of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    #[default]
    String,
    Hash,
    List,
    Set,
    SortedSet,
    Stream,
}

impl ValueType {
    /// The name `TYPE` replies with.
    pub fn redis_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Hash => "hash",
            Self::List => "list",
            Self::Set => "set",
            Self::SortedSet => "zset",
            Self::Stream => "stream",
        }
    }
}

/// One stream entry (`XADD`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

/// A stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Hash(BTreeMap<String, String>),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    /// member → score
    SortedSet(BTreeMap<String, f64>),
    Stream(Vec<StreamEntry>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Hash(_) => ValueType::Hash,
            Self::List(_) => ValueType::List,
            Self::Set(_) => ValueType::Set,
            Self::SortedSet(_) => ValueType::SortedSet,
            Self::Stream(_) => ValueType::Stream,
        }
    }

    /// Number of elements (1 for strings).
    pub fn len(&self) -> usize {
        match self {
            Self::String(_) => 1,
            Self::Hash(h) => h.len(),
            Self::List(l) => l.len(),
            Self::Set(s) => s.len(),
            Self::SortedSet(z) => z.len(),
            Self::Stream(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_hash(self) -> Option<BTreeMap<String, String>> {
        match self {
            Self::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<VecDeque<String>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn into_set(self) -> Option<BTreeSet<String>> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_sorted_set(self) -> Option<BTreeMap<String, f64>> {
        match self {
            Self::SortedSet(z) => Some(z),
            _ => None,
        }
    }

    pub fn into_stream(self) -> Option<Vec<StreamEntry>> {
        match self {
            Self::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Estimated payload size in bytes, excluding the key and entry overhead.
    pub fn payload_bytes(&self) -> u64 {
        let bytes = match self {
            Self::String(s) => s.len(),
            Self::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len() + 16).sum(),
            Self::List(l) => l.iter().map(|v| v.len() + 8).sum(),
            Self::Set(s) => s.iter().map(|v| v.len() + 8).sum(),
            Self::SortedSet(z) => z.keys().map(|m| m.len() + 16).sum(),
            Self::Stream(s) => s
                .iter()
                .map(|e| {
                    e.id.len() + e.fields.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
                })
                .sum(),
        };
        bytes as u64
    }

    /// JSON rendering used by key listings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::from(s.as_str()),
            Self::Hash(h) => serde_json::json!(h),
            Self::List(l) => serde_json::json!(l),
            Self::Set(s) => serde_json::json!(s),
            Self::SortedSet(z) => {
                let mut members: Vec<(&String, &f64)> = z.iter().collect();
                members.sort_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)));
                serde_json::Value::Array(
                    members
                        .into_iter()
                        .map(|(m, s)| serde_json::json!({"member": m, "score": s}))
                        .collect(),
                )
            }
            Self::Stream(s) => serde_json::json!(s),
        }
    }

    /// Build a value of the given type from declarative JSON config.
    pub fn from_json(value_type: ValueType, json: &serde_json::Value) -> KvResult<Self> {
        let invalid = |reason: &str| KvError::InvalidSeed {
            key: String::new(),
            reason: reason.to_string(),
        };
        match value_type {
            ValueType::String => Ok(Self::String(scalar_to_string(json))),
            ValueType::Hash => {
                let obj = json.as_object().ok_or_else(|| invalid("hash must be an object"))?;
                Ok(Self::Hash(
                    obj.iter().map(|(k, v)| (k.clone(), scalar_to_string(v))).collect(),
                ))
            }
            ValueType::List => {
                let arr = json.as_array().ok_or_else(|| invalid("list must be an array"))?;
                Ok(Self::List(arr.iter().map(scalar_to_string).collect()))
            }
            ValueType::Set => {
                let arr = json.as_array().ok_or_else(|| invalid("set must be an array"))?;
                Ok(Self::Set(arr.iter().map(scalar_to_string).collect()))
            }
            ValueType::SortedSet => {
                let obj = json
                    .as_object()
                    .ok_or_else(|| invalid("sorted set must map member to score"))?;
                let mut z = BTreeMap::new();
                for (member, score) in obj {
                    let score = score.as_f64().ok_or_else(|| invalid("score must be a number"))?;
                    z.insert(member.clone(), score);
                }
                Ok(Self::SortedSet(z))
            }
            ValueType::Stream => {
                let arr = json.as_array().ok_or_else(|| invalid("stream must be an array"))?;
                let mut entries = Vec::with_capacity(arr.len());
                for (i, item) in arr.iter().enumerate() {
                    let obj = item
                        .as_object()
                        .ok_or_else(|| invalid("stream entries must be objects"))?;
                    entries.push(StreamEntry {
                        id: format!("0-{}", i + 1),
                        fields: obj.iter().map(|(k, v)| (k.clone(), scalar_to_string(v))).collect(),
                    });
                }
                Ok(Self::Stream(entries))
            }
        }
    }
}

fn scalar_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Estimated memory footprint of a key/value pair.
pub fn entry_size(key: &str, value: &Value) -> u64 {
    key.len() as u64 + value.payload_bytes() + ENTRY_OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(ValueType::SortedSet.redis_name(), "zset");
        let json = serde_json::to_string(&ValueType::SortedSet).unwrap();
        assert_eq!(json, "\"sorted-set\"");
    }

    #[test]
    fn entry_size_counts_key_and_payload() {
        let v = Value::String("bar".to_string());
        assert_eq!(entry_size("foo", &v), 3 + 3 + ENTRY_OVERHEAD);
    }

    #[test]
    fn from_json_builds_each_type() {
        let hash = Value::from_json(ValueType::Hash, &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(hash.len(), 1);

        let list = Value::from_json(ValueType::List, &serde_json::json!(["x", "y"])).unwrap();
        assert_eq!(list.value_type(), ValueType::List);

        let zset =
            Value::from_json(ValueType::SortedSet, &serde_json::json!({"m": 2.5})).unwrap();
        assert_eq!(zset.len(), 1);

        let stream =
            Value::from_json(ValueType::Stream, &serde_json::json!([{"event": "login"}])).unwrap();
        assert_eq!(stream.len(), 1);

        assert!(Value::from_json(ValueType::Set, &serde_json::json!("nope")).is_err());
    }

    #[test]
    fn sorted_set_json_orders_by_score() {
        let mut z = BTreeMap::new();
        z.insert("b".to_string(), 1.0);
        z.insert("a".to_string(), 2.0);
        let json = Value::SortedSet(z).to_json();
        assert_eq!(json[0]["member"], "b");
        assert_eq!(json[1]["member"], "a");
    }
}
