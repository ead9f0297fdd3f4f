//! # reminder-custom-fields
//!
//! Narrows the recipients of a scheduled reminder by conditions on custom
//! field values. A schedule carries an ordered list of conditions such as
//! *membership level = Gold* or *event track IN (A, B)*; before the host
//! runs its recipient query, each condition is compiled into a LEFT JOIN to
//! the field's storage table plus a parameterised predicate, and the
//! predicates are AND-ed onto the query as one group.
//!
//! Filtering is best-effort. A malformed condition, a deleted field, an
//! entity the schedule's mapping cannot reach, or an unreadable stored
//! condition list only removes that filtering; it never fails the run.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use reminder_custom_fields::{Engine, adapters::sqlite::SqliteAdapter, query::RecipientQuery};
//!
//! let adapter = SqliteAdapter::new_file("crm.db").await?;
//! adapter.init_schema().await?;
//!
//! let engine = Engine::new(Box::new(adapter));
//! for (schedule, query) in engine
//!     .prepare_all(None, |s| {
//!         RecipientQuery::new("e.id", format!("{} e", s.mapping.base_table()))
//!     })
//!     .await?
//! {
//!     // hand `query` to the host executor
//! }
//! ```
//!
//! ## Pieces
//!
//! - [`condition`]: the condition model and its lenient parsing.
//! - [`codec`]: the stored format, a versioned JSON envelope, with import
//!   of the two older formats.
//! - [`mapping`]: which custom-data entities each mapping type can reach,
//!   and the join chain to each.
//! - [`predicate`] and [`augment`]: compilation onto a [`query::QueryBuilder`].
//! - [`form`] and [`listing`]: the admin form boundary and the field picker.
//! - [`adapters`]: host metadata and schedule storage (memory, Postgres,
//!   SQLite).
//!
//! ## Feature flags
//!
//! | Flag       | Default | Description                         |
//! |------------|---------|-------------------------------------|
//! | `postgres` | ✓       | PostgreSQL adapter via sqlx         |
//! | `sqlite`   | ✓       | SQLite adapter (in-memory or file)  |

pub mod adapters;
pub mod augment;
pub mod codec;
pub mod condition;
pub mod config;
pub mod error;
pub mod field;
pub mod form;
pub mod listing;
pub mod mapping;
pub mod predicate;
pub mod query;
pub mod schedule;

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, warn};

pub use crate::adapters::{Adapter, MetadataAdapter, ScheduleStore};
pub use crate::augment::{AugmentReport, augment, augment_with_report};
pub use crate::condition::{Condition, ConditionSet, ConditionValue, FieldId, Logic, Operator};
pub use crate::config::FilterConfig;
pub use crate::error::Error;
pub use crate::form::FormSubmission;
pub use crate::listing::FieldListing;
pub use crate::mapping::{EntityRef, MappingType};
pub use crate::query::{QueryBuilder, RecipientQuery};
pub use crate::schedule::{Dispatcher, Schedule};

/// Entry point tying a storage adapter to a compiler configuration.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<ReminderFilters>,
}

pub struct ReminderFilters {
    adapter: Box<dyn Adapter>,
    config: FilterConfig,
}

impl Engine {
    pub fn new(adapter: Box<dyn Adapter>) -> Self {
        Self {
            inner: Arc::new(ReminderFilters {
                adapter,
                config: FilterConfig::default(),
            }),
        }
    }

    pub fn with_config(adapter: Box<dyn Adapter>, config: FilterConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ReminderFilters { adapter, config }),
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.inner.config
    }

    /// A fresh dispatch run. Field metadata is cached for the lifetime of
    /// the returned dispatcher.
    pub fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(self.inner.adapter.as_metadata(), &self.inner.config)
    }

    pub async fn active_schedules(
        &self,
        mapping: Option<MappingType>,
    ) -> Result<Vec<Schedule>, Error> {
        self.inner.adapter.active_schedules(mapping).await
    }

    /// Prepares every active schedule in one run, sharing the field cache.
    /// `base` builds the unfiltered recipient query for a schedule.
    pub async fn prepare_all<Q, F>(
        &self,
        mapping: Option<MappingType>,
        base: F,
    ) -> Result<Vec<(Schedule, Q)>, Error>
    where
        Q: QueryBuilder,
        F: Fn(&Schedule) -> Q,
    {
        let start = Instant::now();
        let schedules = self.inner.adapter.active_schedules(mapping).await?;
        let mut dispatcher = self.dispatcher();
        let mut prepared = Vec::with_capacity(schedules.len());
        for schedule in schedules {
            let query = dispatcher.prepare(&schedule, base(&schedule)).await;
            prepared.push((schedule, query));
        }
        histogram!("reminder_filters.dispatch.duration_ms")
            .record(start.elapsed().as_millis() as f64);
        Ok(prepared)
    }

    /// Stored conditions of a schedule. Unreadable data yields an empty set.
    pub async fn conditions(&self, schedule_id: i64) -> Result<ConditionSet, Error> {
        self.inner
            .adapter
            .fetch_schedule(schedule_id)
            .await?
            .map(|schedule| schedule.conditions())
            .ok_or(Error::NotFound)
    }

    /// Stores `conditions` in the canonical format. An empty set clears the
    /// column.
    pub async fn save_conditions(
        &self,
        schedule_id: i64,
        conditions: &ConditionSet,
    ) -> Result<(), Error> {
        let blob = codec::encode_optional(conditions)?;
        self.inner
            .adapter
            .save_filter_data(schedule_id, blob)
            .await
    }

    /// Parses a form post and stores the result, returning what was stored.
    pub async fn save_form(
        &self,
        schedule_id: i64,
        form: &FormSubmission,
    ) -> Result<ConditionSet, Error> {
        let conditions = form.to_conditions();
        self.save_conditions(schedule_id, &conditions).await?;
        Ok(conditions)
    }

    pub async fn available_fields(&self, entity: &EntityRef) -> Result<Vec<FieldListing>, Error> {
        listing::available_fields(self.inner.adapter.as_metadata(), entity).await
    }

    /// Rewrites condition data stored in an older format as canonical JSON,
    /// on inactive schedules too. Unreadable data is left as it is. Returns
    /// the number of schedules rewritten.
    pub async fn migrate_legacy(&self) -> Result<usize, Error> {
        let mut migrated = 0;
        for schedule in self.inner.adapter.schedules_with_filter_data().await? {
            let Some(raw) = schedule.filter_data.as_deref() else {
                continue;
            };
            match codec::decode_strict(raw) {
                Ok((_, codec::Format::Json)) => {}
                Ok((conditions, format)) => {
                    let blob = codec::encode_optional(&conditions)?;
                    self.inner
                        .adapter
                        .save_filter_data(schedule.id, blob)
                        .await?;
                    info!(schedule_id = schedule.id, ?format, "migrated condition data");
                    migrated += 1;
                }
                Err(err) => {
                    warn!(schedule_id = schedule.id, error = %err, "leaving unreadable condition data");
                }
            }
        }
        Ok(migrated)
    }
}
