use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, trace, warn};

use crate::{
    condition::{ConditionSet, FieldId, Logic},
    config::FilterConfig,
    field::FieldResolver,
    mapping::{self, EntityRef, MappingType},
    predicate::{self, Target},
    query::{BoundParam, ParamType, QueryBuilder},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownField,
    UnsupportedEntity,
    /// Alias or parameter numbering ran past `u32::MAX`.
    NumberingExhausted,
    /// Join applied, but the value did not fit the operator.
    NoPredicate,
}

impl SkipReason {
    fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UnknownField => "unknown_field",
            SkipReason::UnsupportedEntity => "unsupported_entity",
            SkipReason::NumberingExhausted => "numbering_exhausted",
            SkipReason::NoPredicate => "no_predicate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub field_id: FieldId,
    pub entity: EntityRef,
    pub reason: SkipReason,
}

/// What one `augment` call did to the query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AugmentReport {
    pub malformed: usize,
    pub joins: Vec<String>,
    pub predicates: usize,
    pub params: usize,
    pub skipped: Vec<Skipped>,
}

impl AugmentReport {
    pub fn is_noop(&self) -> bool {
        self.joins.is_empty() && self.predicates == 0
    }
}

/// Applies `conditions` to `base` under `mapping` and returns the query.
pub async fn augment<Q: QueryBuilder>(
    resolver: &mut FieldResolver<'_>,
    config: &FilterConfig,
    base: Q,
    conditions: &ConditionSet,
    mapping: MappingType,
) -> Q {
    augment_with_report(resolver, config, base, conditions, mapping)
        .await
        .0
}

/// [`augment`], also returning a report of applied and skipped conditions.
pub async fn augment_with_report<Q: QueryBuilder>(
    resolver: &mut FieldResolver<'_>,
    config: &FilterConfig,
    base: Q,
    conditions: &ConditionSet,
    mapping: MappingType,
) -> (Q, AugmentReport) {
    let start = Instant::now();
    let mut query = base;
    let style = query.placeholder_style();
    let mut report = AugmentReport::default();

    let mut next_param = config.param_base;
    let mut fragments: Vec<(Logic, String)> = Vec::new();
    let mut params: Vec<BoundParam> = Vec::new();

    report.malformed = conditions.iter().filter(|c| !c.is_well_formed()).count();
    if report.malformed > 0 {
        trace!(count = report.malformed, "dropping malformed conditions");
    }

    for (position, condition) in conditions.well_formed().enumerate() {
        let Some(alias) = config.alias(position) else {
            warn!(field_id = %condition.field_id, "alias numbering exhausted, skipping condition");
            report.skipped.push(Skipped {
                field_id: condition.field_id,
                entity: condition.entity.clone(),
                reason: SkipReason::NumberingExhausted,
            });
            continue;
        };

        let Some(field) = resolver.resolve(condition.field_id).await else {
            debug!(field_id = %condition.field_id, "skipping condition on unknown custom field");
            report.skipped.push(Skipped {
                field_id: condition.field_id,
                entity: condition.entity.clone(),
                reason: SkipReason::UnknownField,
            });
            continue;
        };

        let Some(join) = mapping::join_path(mapping, condition.entity, &field.table_name, &alias)
        else {
            debug!(
                field_id = %condition.field_id,
                entity = %condition.entity,
                %mapping,
                "skipping condition on entity unsupported for mapping"
            );
            report.skipped.push(Skipped {
                field_id: condition.field_id,
                entity: condition.entity.clone(),
                reason: SkipReason::UnsupportedEntity,
            });
            continue;
        };

        query.add_join(&join.alias, &join.to_sql());
        report.joins.push(join.alias.clone());

        let target = Target {
            alias: &join.alias,
            column: &field.column_name,
            ty: if config.typed_params {
                field.param_type()
            } else {
                ParamType::String
            },
        };

        match predicate::compile(
            &target,
            condition.operator,
            condition.value,
            next_param,
            style,
        ) {
            Some(predicate) => {
                next_param += predicate.params.len() as u32;
                fragments.push((condition.logic, predicate.fragment));
                params.extend(predicate.params);
            }
            None => {
                debug!(
                    field_id = %condition.field_id,
                    operator = %condition.operator,
                    "condition value does not fit operator, join kept without predicate"
                );
                report.skipped.push(Skipped {
                    field_id: condition.field_id,
                    entity: condition.entity.clone(),
                    reason: SkipReason::NoPredicate,
                });
            }
        }
    }

    report.predicates = fragments.len();
    report.params = params.len();

    if let Some(combined) = combine(&fragments) {
        query.add_where(&combined, params);
    }

    counter!("reminder_filters.conditions.applied").increment(report.predicates as u64);
    for skipped in &report.skipped {
        counter!("reminder_filters.conditions.skipped", "reason" => skipped.reason.as_str())
            .increment(1);
    }
    histogram!("reminder_filters.augment.duration_ms", "mapping" => mapping.as_str())
        .record(start.elapsed().as_secs_f64() * 1000.0);

    (query, report)
}

/// Folds fragments left to right with each one's connector; the first
/// connector is ignored. Every step is parenthesized, so `a OR b AND c`
/// evaluates as `(a OR b) AND c` regardless of SQL precedence.
fn combine(fragments: &[(Logic, String)]) -> Option<String> {
    let ((_, first), rest) = fragments.split_first()?;
    let mut out = format!("({})", first);
    for (logic, fragment) in rest {
        out = format!("({} {} ({}))", out, logic.as_sql(), fragment);
    }
    Some(out)
}
