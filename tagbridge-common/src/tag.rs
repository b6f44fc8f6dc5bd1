use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error text recorded for a tag whose individual read failed.
pub const READ_FAILED: &str = "Read failed";

/// A typed value read from a controller tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Boolean (BOOL).
    Bool(bool),

    /// Integer (SINT/INT/DINT/LINT).
    Int(i64),

    /// Floating point (REAL/LREAL).
    Real(f64),

    /// Text (STRING).
    Text(String),

    /// Array of values.
    Array(Vec<TagValue>),
}

impl TagValue {
    /// Label describing the inferred type of this value.
    ///
    /// Arrays are labelled with their element count, e.g. `array[4]`.
    pub fn type_label(&self) -> String {
        match self {
            TagValue::Bool(_) => "bool".to_string(),
            TagValue::Int(_) => "int".to_string(),
            TagValue::Real(_) => "float".to_string(),
            TagValue::Text(_) => "str".to_string(),
            TagValue::Array(items) => format!("array[{}]", items.len()),
        }
    }

    /// Convert to a JSON value. Non-finite floats are stringified.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TagValue::Bool(b) => serde_json::Value::Bool(*b),
            TagValue::Int(i) => serde_json::Value::from(*i),
            TagValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
            TagValue::Text(s) => serde_json::Value::String(s.clone()),
            TagValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(TagValue::to_json).collect())
            }
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Real(r) => write!(f, "{}", r),
            TagValue::Text(s) => f.write_str(s),
            TagValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Int(v as i64)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Real(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Text(v)
    }
}

impl<T: Into<TagValue>> From<Vec<T>> for TagValue {
    fn from(v: Vec<T>) -> Self {
        TagValue::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Outcome of reading a single tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagReading {
    /// The tag was read successfully.
    Value {
        value: TagValue,
        #[serde(rename = "type")]
        type_label: String,
    },

    /// The tag could not be read.
    Error { error: String },
}

impl TagReading {
    /// Successful reading, labelled with the value's inferred type.
    pub fn value(value: impl Into<TagValue>) -> Self {
        let value = value.into();
        let type_label = value.type_label();
        TagReading::Value { value, type_label }
    }

    /// Failed reading with the standard failure text.
    pub fn failed() -> Self {
        TagReading::Error {
            error: READ_FAILED.to_string(),
        }
    }

    /// The value, if the read succeeded.
    pub fn as_value(&self) -> Option<&TagValue> {
        match self {
            TagReading::Value { value, .. } => Some(value),
            TagReading::Error { .. } => None,
        }
    }

    /// The error text, if the read failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            TagReading::Value { .. } => None,
            TagReading::Error { error } => Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TagReading::Error { .. })
    }
}

/// Result of one read batch: tag name to reading, in tag order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSnapshot(IndexMap<String, TagReading>);

impl TagSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading. A repeated tag name keeps its original position.
    pub fn insert(&mut self, tag: impl Into<String>, reading: TagReading) {
        self.0.insert(tag.into(), reading);
    }

    /// Add a reading, builder style.
    pub fn with(mut self, tag: impl Into<String>, reading: TagReading) -> Self {
        self.insert(tag, reading);
        self
    }

    pub fn get(&self, tag: &str) -> Option<&TagReading> {
        self.0.get(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagReading)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Successfully read tags, in order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.iter()
            .filter_map(|(tag, reading)| reading.as_value().map(|v| (tag, v)))
    }

    /// Names of tags whose read failed.
    pub fn failed_tags(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, reading)| reading.is_error())
            .map(|(tag, _)| tag)
            .collect()
    }
}

impl FromIterator<(String, TagReading)> for TagSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, TagReading)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Trim tag names, drop empty ones and suppress duplicates, keeping first occurrence order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = indexmap::IndexSet::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() {
            seen.insert(tag.to_string());
        }
    }
    seen.into_iter().collect()
}
