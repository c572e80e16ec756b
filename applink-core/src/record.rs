//! Mapping of SOQL query rows into typed records.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Errors raised while mapping query rows.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A record was not a JSON object.
    #[error("Expected a JSON object for a record, found {found}")]
    NotAnObject {
        /// JSON type that was found instead.
        found: &'static str,
    },
    /// A record had no `attributes.type`.
    #[error("Record is missing attributes.type")]
    MissingType,
    /// A query result did not match the expected schema.
    #[error("Failed to decode query result: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
}

/// Value of a queried field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Scalar (or null) JSON value.
    Value(Value),
    /// Parent relationship record (e.g. `Owner` in `SELECT Owner.Name …`).
    Record(Box<Record>),
}

impl FieldValue {
    /// Returns the scalar value, if this is not a nested record.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(value) => Some(value),
            FieldValue::Record(_) => None,
        }
    }

    /// Returns the nested record, if any.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            FieldValue::Record(record) => Some(record),
            FieldValue::Value(_) => None,
        }
    }

    /// Returns the value as a string slice when it is a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

/// A record returned by a SOQL query.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// sObject type (`attributes.type`).
    pub type_name: String,
    /// Queried fields, keyed by the name returned by the API.
    pub fields: BTreeMap<String, FieldValue>,
    /// Subquery results, keyed by relationship name.
    pub sub_query_results: BTreeMap<String, RecordQueryResult>,
}

impl Record {
    /// Maps a JSON query row into a record.
    pub fn from_json(value: Value) -> Result<Self, Error> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(Error::NotAnObject {
                    found: json_type(&other),
                })
            }
        };

        let type_name = object
            .remove("attributes")
            .as_ref()
            .and_then(|attributes| attributes.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(Error::MissingType)?;

        let mut fields = BTreeMap::new();
        let mut sub_query_results = BTreeMap::new();
        for (name, value) in object {
            match value {
                Value::Object(inner) if is_query_result(&inner) => {
                    let result = RecordQueryResult::from_json(Value::Object(inner))?;
                    sub_query_results.insert(name, result);
                }
                Value::Object(inner) if inner.contains_key("attributes") => {
                    let record = Record::from_json(Value::Object(inner))?;
                    fields.insert(name, FieldValue::Record(Box::new(record)));
                }
                value => {
                    fields.insert(name, FieldValue::Value(value));
                }
            }
        }

        Ok(Self {
            type_name,
            fields,
            sub_query_results,
        })
    }

    /// Looks up a field by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    /// Looks up a string field by name, ignoring ASCII case.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    /// Looks up a subquery result by relationship name, ignoring ASCII case.
    pub fn sub_query(&self, relationship: &str) -> Option<&RecordQueryResult> {
        self.sub_query_results.get(relationship).or_else(|| {
            self.sub_query_results
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(relationship))
                .map(|(_, value)| value)
        })
    }
}

/// One page of SOQL query results.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQueryResult {
    /// Whether all records have been returned.
    pub done: bool,
    /// Total number of records matching the query.
    pub total_size: u64,
    /// Records on this page.
    pub records: Vec<Record>,
    /// Relative URL of the next page, when `done` is false.
    pub next_records_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQueryResult {
    done: bool,
    total_size: u64,
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default)]
    next_records_url: Option<String>,
}

impl RecordQueryResult {
    /// Maps a JSON query response (or subquery value) into a result page.
    pub fn from_json(value: Value) -> Result<Self, Error> {
        let wire: WireQueryResult =
            serde_json::from_value(value).map_err(|source| Error::Decode { source })?;
        let records = wire
            .records
            .into_iter()
            .map(Record::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            done: wire.done,
            total_size: wire.total_size,
            records,
            next_records_url: wire.next_records_url,
        })
    }

    /// Result with no records and no further pages.
    pub(crate) fn exhausted(total_size: u64) -> Self {
        Self {
            done: true,
            total_size,
            records: Vec::new(),
            next_records_url: None,
        }
    }
}

fn is_query_result(object: &Map<String, Value>) -> bool {
    object.get("records").is_some_and(Value::is_array)
        && object.get("done").is_some_and(Value::is_boolean)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
