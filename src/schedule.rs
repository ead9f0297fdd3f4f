use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    adapters::MetadataAdapter,
    augment::{AugmentReport, augment_with_report},
    codec,
    condition::ConditionSet,
    config::FilterConfig,
    error::Error,
    field::FieldResolver,
    mapping::MappingType,
    query::QueryBuilder,
};

/// Host-owned reminder definition, reduced to what filtering reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub title: String,
    pub mapping: MappingType,
    pub is_active: bool,
    /// Persisted condition list, see [`crate::codec`].
    pub filter_data: Option<String>,
}

impl Schedule {
    pub fn new(id: i64, title: impl Into<String>, mapping: MappingType) -> Self {
        Self {
            id,
            title: title.into(),
            mapping,
            is_active: true,
            filter_data: None,
        }
    }

    pub fn with_conditions(self, conditions: &ConditionSet) -> Result<Self, Error> {
        let mut consumed_self = self;
        consumed_self.filter_data = codec::encode_optional(conditions)?;
        Ok(consumed_self)
    }

    /// Decoded condition list. Missing or corrupt data yields an empty set.
    pub fn conditions(&self) -> ConditionSet {
        self.filter_data
            .as_deref()
            .map(codec::decode)
            .unwrap_or_default()
    }
}

/// One dispatch run. Owns the field cache shared by every schedule the run
/// processes; schedules are prepared one at a time.
pub struct Dispatcher<'a> {
    resolver: FieldResolver<'a>,
    config: Cow<'a, FilterConfig>,
}

impl<'a> Dispatcher<'a> {
    /// Typed parameters are switched on when `metadata` requires them.
    pub fn new(metadata: &'a dyn MetadataAdapter, config: &'a FilterConfig) -> Self {
        let config = if metadata.requires_typed_params() && !config.typed_params {
            Cow::Owned(FilterConfig {
                typed_params: true,
                ..config.clone()
            })
        } else {
            Cow::Borrowed(config)
        };
        Self {
            resolver: FieldResolver::new(metadata),
            config,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Narrows `base` by the schedule's conditions.
    pub async fn prepare<Q: QueryBuilder>(&mut self, schedule: &Schedule, base: Q) -> Q {
        self.prepare_with_report(schedule, base).await.0
    }

    pub async fn prepare_with_report<Q: QueryBuilder>(
        &mut self,
        schedule: &Schedule,
        base: Q,
    ) -> (Q, AugmentReport) {
        let conditions = schedule.conditions();
        if conditions.is_empty() {
            return (base, AugmentReport::default());
        }

        let (query, report) = augment_with_report(
            &mut self.resolver,
            &self.config,
            base,
            &conditions,
            schedule.mapping,
        )
        .await;

        debug!(
            schedule_id = schedule.id,
            mapping = %schedule.mapping,
            joins = report.joins.len(),
            predicates = report.predicates,
            skipped = report.skipped.len(),
            "applied custom field conditions"
        );
        (query, report)
    }

    pub fn cached_fields(&self) -> usize {
        self.resolver.cached_len()
    }
}
