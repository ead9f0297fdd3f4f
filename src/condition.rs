use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::mapping::EntityRef;

/// Opaque custom-field identifier. Only checked against host metadata at
/// resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub u64);

impl Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FieldId {
    fn from(id: u64) -> Self {
        FieldId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
    In,
    NotIn,
}

/// How an operator consumes its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Comparison, // single bound value
    Pattern,    // single bound value wrapped in wildcards
    NullCheck,  // no value
    Set,        // one bound value per list element
}

impl Operator {
    pub const ALL: [Operator; 12] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::Like,
        Operator::NotLike,
        Operator::GreaterThan,
        Operator::LessThan,
        Operator::GreaterThanOrEqual,
        Operator::LessThanOrEqual,
        Operator::IsNull,
        Operator::IsNotNull,
        Operator::In,
        Operator::NotIn,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThanOrEqual => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
        }
    }

    /// Human label shown by the condition-builder UI.
    pub fn label(&self) -> &'static str {
        match self {
            Operator::Equal => "Equals",
            Operator::NotEqual => "Not Equals",
            Operator::GreaterThan => "Greater Than",
            Operator::LessThan => "Less Than",
            Operator::GreaterThanOrEqual => "Greater Than or Equal",
            Operator::LessThanOrEqual => "Less Than or Equal",
            Operator::Like => "Contains",
            Operator::NotLike => "Does Not Contain",
            Operator::IsNull => "Is Empty",
            Operator::IsNotNull => "Is Not Empty",
            Operator::In => "Is One Of",
            Operator::NotIn => "Is Not One Of",
        }
    }

    pub fn kind(&self) -> OperatorKind {
        match self {
            Operator::Equal
            | Operator::NotEqual
            | Operator::GreaterThan
            | Operator::LessThan
            | Operator::GreaterThanOrEqual
            | Operator::LessThanOrEqual => OperatorKind::Comparison,
            Operator::Like | Operator::NotLike => OperatorKind::Pattern,
            Operator::IsNull | Operator::IsNotNull => OperatorKind::NullCheck,
            Operator::In | Operator::NotIn => OperatorKind::Set,
        }
    }

    /// Accepts the SQL spelling in any case and with any inner spacing.
    pub fn parse(raw: &str) -> Option<Operator> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        let op = match normalized.as_str() {
            "=" | "==" => Operator::Equal,
            "!=" | "<>" => Operator::NotEqual,
            ">" => Operator::GreaterThan,
            "<" => Operator::LessThan,
            ">=" => Operator::GreaterThanOrEqual,
            "<=" => Operator::LessThanOrEqual,
            "LIKE" => Operator::Like,
            "NOT LIKE" => Operator::NotLike,
            "IS NULL" => Operator::IsNull,
            "IS NOT NULL" => Operator::IsNotNull,
            "IN" => Operator::In,
            "NOT IN" => Operator::NotIn,
            _ => return None,
        };
        Some(op)
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl Logic {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }

    pub fn parse(raw: &str) -> Option<Logic> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AND" | "&&" => Some(Logic::And),
            "OR" | "||" => Some(Logic::Or),
            _ => None,
        }
    }
}

impl Serialize for Logic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Single(String),
    List(Vec<String>),
}

impl ConditionValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            ConditionValue::Single(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ConditionValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Splits a comma-separated string into a trimmed list, dropping empty
    /// elements. Used by the form and legacy import paths only.
    pub fn split_list(raw: &str) -> ConditionValue {
        ConditionValue::List(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        ConditionValue::Single(value.to_string())
    }
}

impl From<String> for ConditionValue {
    fn from(value: String) -> Self {
        ConditionValue::Single(value)
    }
}

impl<S: Into<String>> From<Vec<S>> for ConditionValue {
    fn from(values: Vec<S>) -> Self {
        ConditionValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// One user-authored filter clause.
///
/// The required parts are optional here because persisted and submitted
/// data is parsed leniently; [`Condition::well_formed`] is the gate the
/// compiler goes through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Condition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ConditionValue>,
    /// Connector to the previous condition. Ignored on the first one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logic: Option<Logic>,
}

/// Borrowed view of a condition whose entity, field and operator are all
/// present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellFormed<'a> {
    pub entity: &'a EntityRef,
    pub field_id: FieldId,
    pub operator: Operator,
    pub value: Option<&'a ConditionValue>,
    pub logic: Logic,
}

impl Condition {
    pub fn new(entity: EntityRef, field_id: impl Into<FieldId>, operator: Operator) -> Self {
        Self {
            entity: Some(entity),
            field_id: Some(field_id.into()),
            operator: Some(operator),
            value: None,
            logic: None,
        }
    }

    pub fn value(self, value: impl Into<ConditionValue>) -> Self {
        let mut consumed_self = self;
        consumed_self.value = Some(value.into());
        consumed_self
    }

    pub fn logic(self, logic: Logic) -> Self {
        let mut consumed_self = self;
        consumed_self.logic = Some(logic);
        consumed_self
    }

    pub fn is_well_formed(&self) -> bool {
        self.well_formed().is_some()
    }

    /// Entity, field and operator are present, the field id is non-zero and
    /// the entity name is canonical. Exactly these conditions decode back
    /// unchanged after encoding.
    pub fn well_formed(&self) -> Option<WellFormed<'_>> {
        Some(WellFormed {
            entity: self.entity.as_ref().filter(|e| e.is_canonical())?,
            field_id: self.field_id.filter(|id| id.0 != 0)?,
            operator: self.operator?,
            value: self.value.as_ref(),
            logic: self.logic.unwrap_or_default(),
        })
    }

    /// Builds a condition from loosely-typed JSON. Anything that cannot be
    /// interpreted is left as `None` rather than rejected.
    pub fn from_json(raw: &serde_json::Value) -> Condition {
        let Some(obj) = raw.as_object() else {
            return Condition::default();
        };

        let entity = obj
            .get("entity")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(EntityRef::from);

        let field_id = obj.get("field_id").and_then(parse_field_id);

        let operator = obj
            .get("operator")
            .and_then(|v| v.as_str())
            .and_then(Operator::parse);

        let value = obj.get("value").and_then(parse_value);

        let logic = obj
            .get("logic")
            .and_then(|v| v.as_str())
            .and_then(Logic::parse);

        Condition {
            entity,
            field_id,
            operator,
            value,
            logic,
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Condition::from_json(&raw))
    }
}

// Zero is never a valid host id, so it counts as missing.
fn parse_field_id(raw: &serde_json::Value) -> Option<FieldId> {
    let id = match raw {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (id != 0).then_some(FieldId(id))
}

fn scalar_to_string(raw: &serde_json::Value) -> Option<String> {
    match raw {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

fn parse_value(raw: &serde_json::Value) -> Option<ConditionValue> {
    match raw {
        serde_json::Value::Array(items) => Some(ConditionValue::List(
            items.iter().filter_map(scalar_to_string).collect(),
        )),
        // PHP arrays with non-sequential keys arrive as objects.
        serde_json::Value::Object(map) => Some(ConditionValue::List(
            map.values().filter_map(scalar_to_string).collect(),
        )),
        other => scalar_to_string(other).map(ConditionValue::Single),
    }
}

/// Ordered condition list attached to a schedule. Order defines alias
/// numbering and left-to-right AND/OR evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, condition: Condition) {
        self.0.push(condition);
    }

    pub fn with(self, condition: Condition) -> Self {
        let mut consumed_self = self;
        consumed_self.0.push(condition);
        consumed_self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.0.iter()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }

    /// Well-formed conditions in their original relative order.
    pub fn well_formed(&self) -> impl Iterator<Item = WellFormed<'_>> {
        self.0.iter().filter_map(Condition::well_formed)
    }
}

impl From<Vec<Condition>> for ConditionSet {
    fn from(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }
}

impl FromIterator<Condition> for ConditionSet {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ConditionSet {
    type Item = Condition;
    type IntoIter = std::vec::IntoIter<Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConditionSet {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse("="), Some(Operator::Equal));
        assert_eq!(Operator::parse("<>"), Some(Operator::NotEqual));
        assert_eq!(Operator::parse("not   like"), Some(Operator::NotLike));
        assert_eq!(Operator::parse(" is not null "), Some(Operator::IsNotNull));
        assert_eq!(Operator::parse("BETWEEN"), None);
        for op in Operator::ALL {
            assert_eq!(Operator::parse(op.as_sql()), Some(op));
        }
    }

    #[test]
    fn test_operator_kinds() {
        assert_eq!(Operator::GreaterThan.kind(), OperatorKind::Comparison);
        assert_eq!(Operator::NotLike.kind(), OperatorKind::Pattern);
        assert_eq!(Operator::IsNull.kind(), OperatorKind::NullCheck);
        assert_eq!(Operator::NotIn.kind(), OperatorKind::Set);
    }

    #[test]
    fn test_well_formed_requires_entity_field_operator() {
        let full = Condition::new(EntityRef::Contact, 7, Operator::Equal).value("Jane");
        let view = full.well_formed().unwrap();
        assert_eq!(view.field_id, FieldId(7));
        assert_eq!(view.logic, Logic::And);

        let mut missing_entity = full.clone();
        missing_entity.entity = None;
        assert!(!missing_entity.is_well_formed());

        let mut missing_field = full.clone();
        missing_field.field_id = None;
        assert!(!missing_field.is_well_formed());

        let mut missing_operator = full;
        missing_operator.operator = None;
        assert!(!missing_operator.is_well_formed());
    }

    #[test]
    fn test_zero_field_and_blank_entity_are_not_well_formed() {
        assert!(!Condition::new(EntityRef::Contact, 0, Operator::IsNull).is_well_formed());
        for name in ["", "   ", " Grant", "Household"] {
            let c = Condition::new(EntityRef::Other(name.into()), 4, Operator::IsNull);
            assert!(!c.is_well_formed(), "{name:?}");
        }
        assert!(Condition::new(EntityRef::Other("Grant".into()), 4, Operator::IsNull).is_well_formed());
    }

    #[test]
    fn test_value_is_optional_for_well_formedness() {
        let c = Condition::new(EntityRef::Event, 3, Operator::IsNull);
        assert!(c.is_well_formed());
        assert!(c.well_formed().unwrap().value.is_none());
    }

    #[test]
    fn test_from_json_lenient() {
        let c = Condition::from_json(&json!({
            "entity": "Contact",
            "field_id": "12",
            "operator": "in",
            "value": ["a", 2, true, null],
            "logic": "or"
        }));
        assert_eq!(c.entity, Some(EntityRef::Contact));
        assert_eq!(c.field_id, Some(FieldId(12)));
        assert_eq!(c.operator, Some(Operator::In));
        assert_eq!(
            c.value,
            Some(ConditionValue::List(vec![
                "a".to_string(),
                "2".to_string(),
                "1".to_string()
            ]))
        );
        assert_eq!(c.logic, Some(Logic::Or));
    }

    #[test]
    fn test_from_json_malformed_parts_become_none() {
        let c = Condition::from_json(&json!({
            "entity": "",
            "field_id": "abc",
            "operator": "BETWEEN",
            "logic": "XOR"
        }));
        assert_eq!(c, Condition::default());

        let zero = Condition::from_json(&json!({"entity": "Contact", "field_id": 0, "operator": "="}));
        assert!(zero.field_id.is_none());

        assert_eq!(Condition::from_json(&json!("nope")), Condition::default());
    }

    #[test]
    fn test_well_formed_preserves_order() {
        let set = ConditionSet::new()
            .with(Condition::new(EntityRef::Contact, 1, Operator::Equal).value("a"))
            .with(Condition::default())
            .with(Condition::new(EntityRef::Event, 2, Operator::IsNull))
            .with(Condition {
                entity: Some(EntityRef::Contact),
                ..Default::default()
            })
            .with(Condition::new(EntityRef::Participant, 3, Operator::Like).value("b"));

        let ids: Vec<u64> = set.well_formed().map(|c| c.field_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            ConditionValue::split_list(" a, b ,,c "),
            ConditionValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(
            ConditionValue::split_list(" , "),
            ConditionValue::List(Vec::new())
        );
    }
}
