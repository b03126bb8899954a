//! Conversions between field maps and typed arguments and documents

use crate::error::Result;
use crewcall_types::{Fields, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Deserialize action or query arguments from a field map
pub(crate) fn parse<T: DeserializeOwned>(input: &Fields) -> Result<T> {
    let object = input
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<serde_json::Map<_, _>>();
    Ok(serde_json::from_value(Value::Object(object))?)
}

/// Serialize a document into one query row
pub(crate) fn row<T: Serialize>(doc: &T) -> Fields {
    match serde_json::to_value(doc) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => Fields::new(),
    }
}

pub(crate) fn rows<'a, T: Serialize + 'a>(docs: impl IntoIterator<Item = &'a T>) -> Vec<Fields> {
    docs.into_iter().map(row).collect()
}
