//! Core types for Kestrel

use crate::{KestrelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer timestamp used as the primary key of every entry
pub type Timestamp = i64;

/// Separator used when joining sorted tags into a series signature
pub const TAG_SEPARATOR: char = ',';

/// Number of value-type buckets, including `Unknown`
pub const VALUE_TYPE_COUNT: usize = 4;

/// Declared type of an entry's value
///
/// Encoded on disk and in the WAL as a 32-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum ValueType {
    Unknown = 0,
    Int = 1,
    Float = 2,
    String = 3,
}

impl ValueType {
    /// Every concrete value type, in bucket order
    pub const ALL: [ValueType; 3] = [ValueType::Int, ValueType::Float, ValueType::String];

    /// Bucket index used by type-scoped maps
    pub fn index(self) -> usize {
        self as usize
    }
}

impl From<ValueType> for u32 {
    fn from(t: ValueType) -> u32 {
        t as u32
    }
}

impl TryFrom<u32> for ValueType {
    type Error = KestrelError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ValueType::Unknown),
            1 => Ok(ValueType::Int),
            2 => Ok(ValueType::Float),
            3 => Ok(ValueType::String),
            _ => Err(KestrelError::Codec(format!("invalid value type: {}", value))),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Unknown => "unknown",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
        };
        f.write_str(name)
    }
}

/// A typed scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// The declared type matching this value's variant
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
        }
    }

    /// Approximate in-memory footprint used for flush accounting
    pub fn size(&self) -> u64 {
        match self {
            Value::Int(_) | Value::Float(_) => 8,
            Value::String(s) => s.len() as u64 * 8,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// A single timestamped, typed, tagged value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Timestamp,
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Entry {
    /// Create an entry; the value type is derived from the value
    pub fn new<V, I, S>(key: Timestamp, value: V, tags: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let value = value.into();
        Self {
            key,
            value_type: value.value_type(),
            value,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Reject entries whose declared type disagrees with the value
    pub fn validate(&self) -> Result<()> {
        if self.value_type == ValueType::Unknown {
            return Err(KestrelError::InvalidEntry(format!(
                "entry at key {} has unknown value type",
                self.key
            )));
        }
        if self.value_type != self.value.value_type() {
            return Err(KestrelError::InvalidEntry(format!(
                "entry at key {} declares {} but holds {}",
                self.key,
                self.value_type,
                self.value.value_type()
            )));
        }
        if let Value::Float(v) = self.value {
            // the WAL encodes values as JSON, which has no NaN or infinity
            if !v.is_finite() {
                return Err(KestrelError::InvalidEntry(format!(
                    "entry at key {} holds non-finite float {}",
                    self.key, v
                )));
            }
        }
        Ok(())
    }

    /// Series signature: sorted tags joined by `TAG_SEPARATOR`
    pub fn signature(&self) -> String {
        series_signature(&self.tags)
    }

    /// Approximate size in bytes
    pub fn size(&self) -> u64 {
        self.value.size()
    }
}

/// Build the canonical signature of a tag set
pub fn series_signature<S: AsRef<str>>(tags: &[S]) -> String {
    let mut sorted: Vec<&str> = tags.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    let mut signature = String::new();
    for (i, tag) in sorted.iter().enumerate() {
        if i > 0 {
            signature.push(TAG_SEPARATOR);
        }
        signature.push_str(tag);
    }
    signature
}

/// True when every tag occurs in the signature as a substring
pub fn contains_tags<S: AsRef<str>>(signature: &str, tags: &[S]) -> bool {
    tags.iter().all(|tag| signature.contains(tag.as_ref()))
}

/// A (key, value) pair returned by range queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Timestamp,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: Timestamp, value: Value) -> Self {
        Self { key, value }
    }
}

/// Range query filter
///
/// `value_type` of `None` (or `Unknown`) matches every type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(rename = "type", default)]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Check a block's type and signature against an optional filter
    pub fn admits(filter: Option<&Self>, value_type: ValueType, signature: &str) -> bool {
        match filter {
            None => true,
            Some(f) => {
                let type_ok = match f.value_type {
                    None | Some(ValueType::Unknown) => true,
                    Some(t) => t == value_type,
                };
                type_ok && contains_tags(signature, &f.tags)
            }
        }
    }

    /// Value types that a scan under this filter has to visit
    pub fn scan_types(filter: Option<&Self>) -> Vec<ValueType> {
        match filter.and_then(|f| f.value_type) {
            None | Some(ValueType::Unknown) => ValueType::ALL.to_vec(),
            Some(t) => vec![t],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_sorted() {
        let a = Entry::new(1, 1i64, ["zone=b", "host=a"]);
        let b = Entry::new(2, 2i64, ["host=a", "zone=b"]);
        assert_eq!(a.signature(), "host=a,zone=b");
        assert_eq!(a.signature(), b.signature());
        assert_eq!(Entry::new(3, 3i64, Vec::<String>::new()).signature(), "");
    }

    #[test]
    fn test_entry_validation() {
        let entry = Entry::new(10, 2.5, ["cpu"]);
        assert_eq!(entry.value_type, ValueType::Float);
        assert!(entry.validate().is_ok());

        let mut bad = entry.clone();
        bad.value_type = ValueType::Int;
        assert!(matches!(bad.validate(), Err(KestrelError::InvalidEntry(_))));

        bad.value_type = ValueType::Unknown;
        assert!(bad.validate().is_err());

        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let entry = Entry::new(1, v, ["t"]);
            assert!(matches!(entry.validate(), Err(KestrelError::InvalidEntry(_))));
        }
        assert!(Entry::new(1, f64::MAX, ["t"]).validate().is_ok());
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = Entry::new(42, 7i64, ["a", "b"]);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"key":42,"value":7,"type":1,"tags":["a","b"]}"#);

        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);

        let float: Entry = serde_json::from_str(r#"{"key":1,"value":1.5,"type":2,"tags":[]}"#).unwrap();
        assert_eq!(float.value, Value::Float(1.5));
        assert!(float.validate().is_ok());

        assert!(serde_json::from_str::<Entry>(r#"{"key":1,"value":1,"type":9}"#).is_err());
    }

    #[test]
    fn test_filter_admits() {
        let filter = QueryFilter::new().with_type(ValueType::Int).with_tag("host=a");
        assert!(QueryFilter::admits(Some(&filter), ValueType::Int, "host=a,zone=b"));
        assert!(!QueryFilter::admits(Some(&filter), ValueType::Float, "host=a"));
        assert!(!QueryFilter::admits(Some(&filter), ValueType::Int, "host=b"));
        assert!(QueryFilter::admits(None, ValueType::String, "anything"));

        let any = QueryFilter::new().with_tag("zone");
        assert!(QueryFilter::admits(Some(&any), ValueType::String, "host=a,zone=b"));
        assert_eq!(QueryFilter::scan_types(Some(&any)).len(), 3);
        assert_eq!(QueryFilter::scan_types(Some(&filter)), vec![ValueType::Int]);
    }

    #[test]
    fn test_value_size() {
        assert_eq!(Value::Int(1).size(), 8);
        assert_eq!(Value::Float(1.0).size(), 8);
        assert_eq!(Value::from("abcd").size(), 32);
    }
}
