use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    codec,
    condition::{Condition, ConditionSet, ConditionValue, FieldId, Logic, Operator, OperatorKind},
    mapping::EntityRef,
};

const PREFIX: &str = "custom_field_";
const CONDITIONS_KEY: &str = "custom_field_conditions";

/// Flat key/value fields posted by the schedule edit form.
///
/// The first condition row uses the bare names (`custom_field_entity`,
/// `custom_field_id`, `custom_field_operator`, `custom_field_value`),
/// further rows append `_1`, `_2`, ... and the scan stops at the first
/// suffix whose entity key is absent. A non-empty `custom_field_conditions`
/// blob takes precedence over the rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormSubmission {
    fields: HashMap<String, String>,
}

impl FormSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut consumed_self = self;
        consumed_self.fields.insert(key.into(), value.into());
        consumed_self
    }

    /// Trimmed value, `None` when absent or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn to_conditions(&self) -> ConditionSet {
        if let Some(blob) = self.get(CONDITIONS_KEY) {
            return codec::decode(blob);
        }

        let mut set = ConditionSet::new();
        let mut row = 0usize;
        loop {
            let suffix = if row == 0 {
                String::new()
            } else {
                format!("_{}", row)
            };
            if !self.has(&format!("{}entity{}", PREFIX, suffix)) {
                break;
            }
            match self.row(&suffix) {
                Some(condition) => set.push(condition),
                None => debug!(row, "skipping incomplete custom field condition row"),
            }
            row += 1;
        }
        set
    }

    fn row(&self, suffix: &str) -> Option<Condition> {
        let key = |name: &str| format!("{}{}{}", PREFIX, name, suffix);

        let entity = EntityRef::from(self.get(&key("entity"))?);
        let field_id = self
            .get(&key("id"))?
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .map(FieldId)?;
        let operator = Operator::parse(self.get(&key("operator"))?)?;

        let value = match operator.kind() {
            OperatorKind::NullCheck => None,
            OperatorKind::Set => {
                let raw = self
                    .get(&key("values"))
                    .or_else(|| self.get(&key("value")))
                    .unwrap_or_default();
                Some(ConditionValue::split_list(raw))
            }
            OperatorKind::Comparison | OperatorKind::Pattern => {
                let raw = self
                    .get(&key("value"))
                    .or_else(|| self.get(&key("date_value")))
                    .unwrap_or_default();
                Some(ConditionValue::Single(raw.to_string()))
            }
        };

        Some(Condition {
            entity: Some(entity),
            field_id: Some(field_id),
            operator: Some(operator),
            value,
            logic: self.get(&key("logic")).and_then(Logic::parse),
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormSubmission {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}
