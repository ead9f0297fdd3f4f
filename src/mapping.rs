use std::{collections::HashMap, fmt::Display, str::FromStr};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

pub const ACTIVITY_TABLE: &str = "civicrm_activity";
pub const MEMBERSHIP_TABLE: &str = "civicrm_membership";
pub const PARTICIPANT_TABLE: &str = "civicrm_participant";
pub const EVENT_TABLE: &str = "civicrm_event";
pub const CONTACT_TABLE: &str = "civicrm_contact";

/// Alias of the mapping's base recipient row in every host query.
pub const BASE_ALIAS: &str = "e";

/// Category of base entity a reminder's recipients are computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    Membership,
    Event,
    Activity,
    Contact,
}

impl MappingType {
    pub const ALL: [MappingType; 4] = [
        MappingType::Membership,
        MappingType::Event,
        MappingType::Activity,
        MappingType::Contact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MappingType::Membership => "membership",
            MappingType::Event => "event",
            MappingType::Activity => "activity",
            MappingType::Contact => "contact",
        }
    }

    /// Host table the base recipient row (`e`) is selected from.
    pub fn base_table(&self) -> &'static str {
        match self {
            MappingType::Membership => MEMBERSHIP_TABLE,
            MappingType::Event => PARTICIPANT_TABLE,
            MappingType::Activity => ACTIVITY_TABLE,
            MappingType::Contact => CONTACT_TABLE,
        }
    }

    /// Entities a condition may reference under this mapping, in UI order.
    pub fn supported_entities(&self) -> Vec<EntityRef> {
        let mut entities: Vec<EntityRef> = JOIN_STRATEGIES
            .keys()
            .filter(|(mapping, _)| mapping == self)
            .map(|(_, entity)| entity.clone())
            .collect();
        entities.sort_by_key(|e| e.as_str().to_string());
        entities
    }
}

impl Display for MappingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "membership" | "member" | "civicrm_membership" => Ok(MappingType::Membership),
            "event" | "participant" | "civicrm_participant" => Ok(MappingType::Event),
            "activity" | "civicrm_activity" => Ok(MappingType::Activity),
            "contact" | "civicrm_contact" => Ok(MappingType::Contact),
            other => Err(Error::Unsupported(format!("mapping type {:?}", other))),
        }
    }
}

/// Logical record a condition's custom field lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Contact,
    Event,
    Participant,
    Activity,
    Membership,
    Contribution,
    Other(String),
}

impl EntityRef {
    pub fn as_str(&self) -> &str {
        match self {
            EntityRef::Contact => "Contact",
            EntityRef::Event => "Event",
            EntityRef::Participant => "Participant",
            EntityRef::Activity => "Activity",
            EntityRef::Membership => "Membership",
            EntityRef::Contribution => "Contribution",
            EntityRef::Other(name) => name,
        }
    }

    /// Values of the host's `extends` column that belong to this entity.
    /// Contact fields may be attached to any contact subtype.
    pub fn extends_values(&self) -> Vec<&str> {
        match self {
            EntityRef::Contact => vec!["Contact", "Individual", "Organization", "Household"],
            other => vec![other.as_str()],
        }
    }
}

impl EntityRef {
    /// True when the name is the one `From<&str>` yields for it, so it
    /// survives a store and reload unchanged.
    pub fn is_canonical(&self) -> bool {
        let trimmed = self.as_str().trim();
        !trimmed.is_empty() && EntityRef::from(trimmed) == *self
    }
}

impl From<&str> for EntityRef {
    fn from(raw: &str) -> Self {
        match raw {
            "Contact" | "Individual" | "Organization" | "Household" => EntityRef::Contact,
            "Event" => EntityRef::Event,
            "Participant" => EntityRef::Participant,
            "Activity" => EntityRef::Activity,
            "Membership" => EntityRef::Membership,
            "Contribution" => EntityRef::Contribution,
            other => EntityRef::Other(other.to_string()),
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EntityRef::from(raw.as_str()))
    }
}

/// Intermediate table walked between the base row and the field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hop {
    table: &'static str,
    prefix: &'static str,
    /// Column on this hop matched against the previous link.
    on_column: &'static str,
    /// Column on this hop the next link is matched against.
    exit_column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinStrategy {
    /// Column on the base row the chain starts from.
    anchor: &'static str,
    hops: &'static [Hop],
}

const ACTIVITY_BY_SOURCE_CONTACT: Hop = Hop {
    table: ACTIVITY_TABLE,
    prefix: "act",
    on_column: "source_contact_id",
    exit_column: "id",
};

const MEMBERSHIP_BY_CONTACT: Hop = Hop {
    table: MEMBERSHIP_TABLE,
    prefix: "mem",
    on_column: "contact_id",
    exit_column: "id",
};

const PARTICIPANT_BY_CONTACT: Hop = Hop {
    table: PARTICIPANT_TABLE,
    prefix: "part",
    on_column: "contact_id",
    exit_column: "event_id",
};

const EVENT_BY_ID: Hop = Hop {
    table: EVENT_TABLE,
    prefix: "evt",
    on_column: "id",
    exit_column: "id",
};

const fn direct(anchor: &'static str) -> JoinStrategy {
    JoinStrategy { anchor, hops: &[] }
}

static JOIN_STRATEGIES: Lazy<HashMap<(MappingType, EntityRef), JoinStrategy>> = Lazy::new(|| {
    use EntityRef as E;
    use MappingType as M;

    HashMap::from([
        ((M::Membership, E::Contact), direct("contact_id")),
        ((M::Membership, E::Membership), direct("id")),
        (
            (M::Membership, E::Activity),
            JoinStrategy {
                anchor: "contact_id",
                hops: &[ACTIVITY_BY_SOURCE_CONTACT],
            },
        ),
        ((M::Event, E::Contact), direct("contact_id")),
        ((M::Event, E::Event), direct("event_id")),
        ((M::Event, E::Participant), direct("id")),
        (
            (M::Event, E::Activity),
            JoinStrategy {
                anchor: "contact_id",
                hops: &[ACTIVITY_BY_SOURCE_CONTACT],
            },
        ),
        ((M::Activity, E::Contact), direct("contact_id")),
        ((M::Activity, E::Activity), direct("id")),
        (
            (M::Activity, E::Membership),
            JoinStrategy {
                anchor: "contact_id",
                hops: &[MEMBERSHIP_BY_CONTACT],
            },
        ),
        (
            (M::Activity, E::Event),
            JoinStrategy {
                anchor: "contact_id",
                hops: &[PARTICIPANT_BY_CONTACT, EVENT_BY_ID],
            },
        ),
        ((M::Contact, E::Contact), direct("id")),
    ])
});

/// One `LEFT JOIN <table> <alias> ON <left> = <right>` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    pub table: String,
    pub alias: String,
    pub left: String,
    pub right: String,
}

impl JoinStep {
    pub fn to_sql(&self) -> String {
        format!(
            "LEFT JOIN {} {} ON {} = {}",
            self.table, self.alias, self.left, self.right
        )
    }
}

/// Join chain from the base row to a custom-field table. The field table
/// is always the last step and is reachable as [`JoinClause::alias`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub alias: String,
    pub steps: Vec<JoinStep>,
}

impl JoinClause {
    pub fn to_sql(&self) -> String {
        self.steps
            .iter()
            .map(JoinStep::to_sql)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Resolves the join chain for `entity` under `mapping`, or `None` when the
/// pair is not supported.
pub fn join_path(
    mapping: MappingType,
    entity: &EntityRef,
    table_name: &str,
    alias: &str,
) -> Option<JoinClause> {
    let strategy = JOIN_STRATEGIES.get(&(mapping, entity.clone()))?;

    let mut steps = Vec::with_capacity(strategy.hops.len() + 1);
    let mut previous = format!("{}.{}", BASE_ALIAS, strategy.anchor);

    for hop in strategy.hops {
        let hop_alias = format!("{}_{}", hop.prefix, alias);
        steps.push(JoinStep {
            table: hop.table.to_string(),
            alias: hop_alias.clone(),
            left: format!("{}.{}", hop_alias, hop.on_column),
            right: previous,
        });
        previous = format!("{}.{}", hop_alias, hop.exit_column);
    }

    steps.push(JoinStep {
        table: table_name.to_string(),
        alias: alias.to_string(),
        left: format!("{}.entity_id", alias),
        right: previous,
    });

    Some(JoinClause {
        alias: alias.to_string(),
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "civicrm_value_info_1";

    fn sql(mapping: MappingType, entity: EntityRef) -> Option<String> {
        join_path(mapping, &entity, TABLE, "cf_1000").map(|j| j.to_sql())
    }

    #[test]
    fn test_direct_joins() {
        let cases = [
            (MappingType::Membership, EntityRef::Contact, "e.contact_id"),
            (MappingType::Membership, EntityRef::Membership, "e.id"),
            (MappingType::Event, EntityRef::Contact, "e.contact_id"),
            (MappingType::Event, EntityRef::Event, "e.event_id"),
            (MappingType::Event, EntityRef::Participant, "e.id"),
            (MappingType::Activity, EntityRef::Contact, "e.contact_id"),
            (MappingType::Activity, EntityRef::Activity, "e.id"),
            (MappingType::Contact, EntityRef::Contact, "e.id"),
        ];

        for (mapping, entity, anchor) in cases {
            let join = join_path(mapping, &entity, TABLE, "cf_1000").unwrap();
            assert_eq!(join.steps.len(), 1, "{mapping}/{entity}");
            assert_eq!(
                join.to_sql(),
                format!("LEFT JOIN {TABLE} cf_1000 ON cf_1000.entity_id = {anchor}")
            );
        }
    }

    #[test]
    fn test_activity_via_source_contact() {
        for mapping in [MappingType::Membership, MappingType::Event] {
            assert_eq!(
                sql(mapping, EntityRef::Activity).unwrap(),
                "LEFT JOIN civicrm_activity act_cf_1000 ON act_cf_1000.source_contact_id = e.contact_id \
                 LEFT JOIN civicrm_value_info_1 cf_1000 ON cf_1000.entity_id = act_cf_1000.id"
            );
        }
    }

    #[test]
    fn test_activity_mapping_membership() {
        assert_eq!(
            sql(MappingType::Activity, EntityRef::Membership).unwrap(),
            "LEFT JOIN civicrm_membership mem_cf_1000 ON mem_cf_1000.contact_id = e.contact_id \
             LEFT JOIN civicrm_value_info_1 cf_1000 ON cf_1000.entity_id = mem_cf_1000.id"
        );
    }

    #[test]
    fn test_activity_mapping_event_goes_through_participant() {
        let join = join_path(MappingType::Activity, &EntityRef::Event, TABLE, "cf_1004").unwrap();
        assert_eq!(join.alias, "cf_1004");
        assert_eq!(join.steps.len(), 3);
        assert_eq!(
            join.to_sql(),
            "LEFT JOIN civicrm_participant part_cf_1004 ON part_cf_1004.contact_id = e.contact_id \
             LEFT JOIN civicrm_event evt_cf_1004 ON evt_cf_1004.id = part_cf_1004.event_id \
             LEFT JOIN civicrm_value_info_1 cf_1004 ON cf_1004.entity_id = evt_cf_1004.id"
        );
    }

    #[test]
    fn test_unsupported_pairs() {
        assert!(sql(MappingType::Event, EntityRef::Contribution).is_none());
        assert!(sql(MappingType::Contact, EntityRef::Event).is_none());
        assert!(sql(MappingType::Membership, EntityRef::Participant).is_none());
        assert!(sql(MappingType::Activity, EntityRef::Other("Grant".into())).is_none());
    }

    #[test]
    fn test_supported_entities() {
        assert_eq!(
            MappingType::Event.supported_entities(),
            vec![
                EntityRef::Activity,
                EntityRef::Contact,
                EntityRef::Event,
                EntityRef::Participant
            ]
        );
        assert_eq!(
            MappingType::Contact.supported_entities(),
            vec![EntityRef::Contact]
        );
    }

    #[test]
    fn test_mapping_type_parse() {
        assert_eq!(
            "Membership".parse::<MappingType>().unwrap(),
            MappingType::Membership
        );
        assert_eq!(
            "civicrm_participant".parse::<MappingType>().unwrap(),
            MappingType::Event
        );
        assert!(matches!(
            "grant".parse::<MappingType>(),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(MappingType::Event.base_table(), "civicrm_participant");
    }

    #[test]
    fn test_entity_ref_from_str() {
        assert_eq!(EntityRef::from("Individual"), EntityRef::Contact);
        assert_eq!(
            EntityRef::from("Grant"),
            EntityRef::Other("Grant".to_string())
        );
        assert_eq!(EntityRef::Other("Grant".into()).as_str(), "Grant");
    }

    #[test]
    fn test_entity_ref_is_canonical() {
        assert!(EntityRef::Contact.is_canonical());
        assert!(EntityRef::Other("Grant".into()).is_canonical());
        assert!(!EntityRef::Other("".into()).is_canonical());
        assert!(!EntityRef::Other("Grant ".into()).is_canonical());
        assert!(!EntityRef::Other("Event".into()).is_canonical());
    }
}
