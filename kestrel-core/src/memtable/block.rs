//! In-memory block: every timestamped value of one (value type, series) pair

use super::RbTree;
use crate::{KeyValue, Timestamp, Value, ValueType};

/// Ordered values of a single series signature and value type
#[derive(Debug)]
pub struct Block {
    signature: String,
    value_type: ValueType,
    data: RbTree<Timestamp, Value>,
    min_key: Timestamp,
    max_key: Timestamp,
}

impl Block {
    /// Create an empty block; callers insert the first value right away
    pub fn new(signature: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            signature: signature.into(),
            value_type,
            data: RbTree::new(),
            min_key: Timestamp::MAX,
            max_key: Timestamp::MIN,
        }
    }

    /// Rebuild a block from decoded pairs and the bounds recorded in its header
    pub(crate) fn from_parts(
        signature: String,
        value_type: ValueType,
        data: RbTree<Timestamp, Value>,
        min_key: Timestamp,
        max_key: Timestamp,
    ) -> Self {
        Self {
            signature,
            value_type,
            data,
            min_key,
            max_key,
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Number of distinct keys
    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn min_key(&self) -> Timestamp {
        self.min_key
    }

    pub fn max_key(&self) -> Timestamp {
        self.max_key
    }

    /// Insert a value; a repeated key replaces the stored value
    pub fn insert(&mut self, key: Timestamp, value: Value) -> Option<Value> {
        self.min_key = self.min_key.min(key);
        self.max_key = self.max_key.max(key);
        self.data.insert(key, value)
    }

    pub fn get(&self, key: Timestamp) -> Option<&Value> {
        self.data.get(&key)
    }

    /// Values with `start <= key < end`
    pub fn range(&self, start: Timestamp, end: Timestamp) -> Vec<KeyValue> {
        self.data
            .range(&start, &end)
            .into_iter()
            .map(|(k, v)| KeyValue::new(*k, v.clone()))
            .collect()
    }

    /// Every pair in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&Timestamp, &Value)> {
        self.data.iter()
    }
}
