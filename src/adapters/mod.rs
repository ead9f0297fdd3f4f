#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod memory;

use async_trait::async_trait;

use crate::{
    condition::FieldId,
    error::Error,
    field::{FieldRecord, FieldSummary},
    mapping::MappingType,
    schedule::Schedule,
};

/// -----------------------------
/// Adapter contract
/// -----------------------------

/// Host custom-field metadata.
#[async_trait]
pub trait MetadataAdapter: Send + Sync {
    /// `Ok(None)` when the field does not exist.
    async fn get_field(&self, field_id: FieldId) -> Result<Option<FieldRecord>, Error>;

    /// Active fields whose group extends `extends`, in no particular order.
    async fn get_fields_for_entity(&self, extends: &str) -> Result<Vec<FieldSummary>, Error>;

    async fn get_group_title(&self, group_id: i64) -> Result<Option<String>, Error>;

    /// True when the store's driver sends every parameter with its declared
    /// type, so a text parameter cannot be compared against a numeric or
    /// date column. Dispatchers over such a store always bind typed.
    fn requires_typed_params(&self) -> bool {
        false
    }
}

/// Host schedule storage. Only the persisted condition column is ever
/// written.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Active schedules, optionally restricted to one mapping type, ordered
    /// by id.
    async fn active_schedules(
        &self,
        mapping: Option<MappingType>,
    ) -> Result<Vec<Schedule>, Error>;

    /// Every schedule with stored condition data, active or not, ordered
    /// by id. Rows with an unsupported mapping type are skipped.
    async fn schedules_with_filter_data(&self) -> Result<Vec<Schedule>, Error>;

    async fn fetch_schedule(&self, schedule_id: i64) -> Result<Option<Schedule>, Error>;

    /// Fails with [`Error::NotFound`] when the schedule does not exist.
    async fn save_filter_data(
        &self,
        schedule_id: i64,
        filter_data: Option<String>,
    ) -> Result<(), Error>;
}

pub trait Adapter: MetadataAdapter + ScheduleStore + Send + Sync + 'static {
    fn as_metadata(&self) -> &dyn MetadataAdapter;
}

impl<T> Adapter for T
where
    T: MetadataAdapter + ScheduleStore + Send + Sync + 'static,
{
    fn as_metadata(&self) -> &dyn MetadataAdapter {
        self
    }
}
