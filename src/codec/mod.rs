//! Persisted form of a [`ConditionSet`].
//!
//! The canonical format is a versioned JSON envelope:
//!
//! ```json
//! {"version":1,"conditions":[{"entity":"Contact","field_id":7,"operator":"=","value":"Jane"}]}
//! ```
//!
//! Two older formats are still read and are rewritten as canonical JSON on
//! the next save:
//! - a bare JSON array of condition objects;
//! - a PHP-serialized array of the same shape.
//!
//! In both legacy formats a set operator's value may be a comma-separated
//! string; it is split into a list on import.

mod php;

use serde::Serialize;
use tracing::warn;

use crate::{
    condition::{Condition, ConditionSet, ConditionValue, OperatorKind},
    error::Error,
};

pub const CURRENT_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    LegacyJson,
    LegacyPhp,
}

#[derive(Serialize)]
struct Envelope<'a> {
    version: u64,
    conditions: &'a ConditionSet,
}

pub fn encode(conditions: &ConditionSet) -> Result<String, Error> {
    serde_json::to_string(&Envelope {
        version: CURRENT_VERSION,
        conditions,
    })
    .map_err(|e| Error::Serialize(e.to_string()))
}

/// Like [`encode`], but an empty set clears the column.
pub fn encode_optional(conditions: &ConditionSet) -> Result<Option<String>, Error> {
    if conditions.is_empty() {
        return Ok(None);
    }
    encode(conditions).map(Some)
}

/// Lenient decode: unreadable data is logged and treated as no conditions.
pub fn decode(raw: &str) -> ConditionSet {
    match decode_strict(raw) {
        Ok((conditions, _)) => conditions,
        Err(err) => {
            warn!(error = %err, "discarding unreadable custom field condition data");
            ConditionSet::new()
        }
    }
}

/// Decodes any supported format, reporting which one was found. Individual
/// malformed conditions are kept (the compiler drops them); only data that
/// is not a condition list at all is an error.
pub fn decode_strict(raw: &str) -> Result<(ConditionSet, Format), Error> {
    let trimmed = raw.trim();
    let Some(first) = trimmed.bytes().next() else {
        return Ok((ConditionSet::new(), Format::Json));
    };

    match first {
        b'{' => {
            let value: serde_json::Value =
                serde_json::from_str(trimmed).map_err(|e| Error::Deserialize(e.to_string()))?;
            let version = value.get("version").and_then(|v| v.as_u64());
            if version != Some(CURRENT_VERSION) {
                return Err(Error::Deserialize(format!(
                    "unsupported condition format version {:?}",
                    version
                )));
            }
            let items = value
                .get("conditions")
                .and_then(|v| v.as_array())
                .ok_or_else(|| Error::Deserialize("missing conditions array".to_string()))?;
            Ok((from_items(items.iter(), false), Format::Json))
        }
        b'[' => {
            let value: serde_json::Value =
                serde_json::from_str(trimmed).map_err(|e| Error::Deserialize(e.to_string()))?;
            let items = value
                .as_array()
                .ok_or_else(|| Error::Deserialize("expected a JSON array".to_string()))?;
            Ok((from_items(items.iter(), true), Format::LegacyJson))
        }
        b'a' => {
            let value = php::unserialize(trimmed)?;
            let conditions = match &value {
                serde_json::Value::Array(items) => from_items(items.iter(), true),
                serde_json::Value::Object(map) => from_items(map.values(), true),
                _ => {
                    return Err(Error::Deserialize(
                        "expected a serialized array".to_string(),
                    ));
                }
            };
            Ok((conditions, Format::LegacyPhp))
        }
        _ => Err(Error::Deserialize(
            "unrecognized condition data format".to_string(),
        )),
    }
}

fn from_items<'a>(
    items: impl Iterator<Item = &'a serde_json::Value>,
    legacy: bool,
) -> ConditionSet {
    items
        .map(Condition::from_json)
        .map(|condition| {
            if legacy {
                split_legacy_list(condition)
            } else {
                condition
            }
        })
        .collect()
}

fn split_legacy_list(condition: Condition) -> Condition {
    let mut condition = condition;
    if condition.operator.map(|op| op.kind()) != Some(OperatorKind::Set) {
        return condition;
    }
    if let Some(ConditionValue::Single(raw)) = &condition.value {
        condition.value = Some(ConditionValue::split_list(raw));
    }
    condition
}
