use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    adapters::{MetadataAdapter, ScheduleStore},
    condition::FieldId,
    error::Error,
    field::{FieldRecord, FieldSummary},
    mapping::MappingType,
    schedule::Schedule,
};

#[derive(Debug, Clone)]
struct GroupRow {
    title: String,
    extends: String,
    table_name: String,
    is_active: bool,
}

#[derive(Debug, Clone)]
struct FieldRow {
    group_id: i64,
    label: String,
    column_name: String,
    data_type: String,
    html_type: String,
    is_active: bool,
}

#[derive(Clone, Default)]
struct MemoryStore {
    groups: Arc<Mutex<BTreeMap<i64, GroupRow>>>,
    fields: Arc<Mutex<HashMap<FieldId, FieldRow>>>,
    schedules: Arc<Mutex<BTreeMap<i64, Schedule>>>,
    field_lookups: Arc<AtomicUsize>,
    fail_lookups: Arc<AtomicBool>,
    typed_params: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process metadata and schedule store, for tests and for hosts that
/// hand metadata over up front.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom group and returns its id.
    pub fn add_group(&self, title: &str, extends: &str, table_name: &str) -> i64 {
        let mut groups = lock(&self.store.groups);
        let id = groups.keys().next_back().map_or(1, |last| last + 1);
        groups.insert(
            id,
            GroupRow {
                title: title.to_string(),
                extends: extends.to_string(),
                table_name: table_name.to_string(),
                is_active: true,
            },
        );
        id
    }

    pub fn add_field(
        &self,
        id: u64,
        group_id: i64,
        label: &str,
        column_name: &str,
        data_type: &str,
        html_type: &str,
    ) {
        lock(&self.store.fields).insert(
            FieldId(id),
            FieldRow {
                group_id,
                label: label.to_string(),
                column_name: column_name.to_string(),
                data_type: data_type.to_string(),
                html_type: html_type.to_string(),
                is_active: true,
            },
        );
    }

    pub fn deactivate_field(&self, id: u64) {
        if let Some(field) = lock(&self.store.fields).get_mut(&FieldId(id)) {
            field.is_active = false;
        }
    }

    pub fn remove_field(&self, id: u64) {
        lock(&self.store.fields).remove(&FieldId(id));
    }

    pub fn remove_group(&self, group_id: i64) {
        lock(&self.store.groups).remove(&group_id);
    }

    pub fn add_schedule(&self, schedule: Schedule) {
        lock(&self.store.schedules).insert(schedule.id, schedule);
    }

    /// Number of `get_field` calls served so far.
    pub fn field_lookups(&self) -> usize {
        self.store.field_lookups.load(Ordering::SeqCst)
    }

    /// Makes every metadata call fail with a storage error.
    pub fn fail_lookups(&self, fail: bool) {
        self.store.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Makes the store report that its driver binds parameters typed.
    pub fn require_typed_params(&self, required: bool) {
        self.store.typed_params.store(required, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.store.fail_lookups.load(Ordering::SeqCst) {
            return Err(Error::Storage("metadata service unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataAdapter for MemoryAdapter {
    async fn get_field(&self, field_id: FieldId) -> Result<Option<FieldRecord>, Error> {
        self.store.field_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let fields = lock(&self.store.fields);
        let Some(field) = fields.get(&field_id) else {
            return Ok(None);
        };
        let groups = lock(&self.store.groups);
        let Some(group) = groups.get(&field.group_id) else {
            return Ok(None);
        };

        Ok(Some(FieldRecord {
            table_name: group.table_name.clone(),
            column_name: field.column_name.clone(),
            data_type: field.data_type.clone(),
            html_type: field.html_type.clone(),
            extends: group.extends.clone(),
        }))
    }

    async fn get_fields_for_entity(&self, extends: &str) -> Result<Vec<FieldSummary>, Error> {
        self.check_available()?;

        let fields = lock(&self.store.fields);
        let groups = lock(&self.store.groups);
        let mut out: Vec<FieldSummary> = fields
            .iter()
            .filter(|(_, field)| field.is_active)
            .filter(|(_, field)| {
                groups
                    .get(&field.group_id)
                    .is_some_and(|g| g.is_active && g.extends == extends)
            })
            .map(|(id, field)| FieldSummary {
                id: *id,
                label: field.label.clone(),
                data_type: field.data_type.clone(),
                html_type: field.html_type.clone(),
                custom_group_id: field.group_id,
            })
            .collect();
        out.sort_by_key(|f| f.id);
        Ok(out)
    }

    async fn get_group_title(&self, group_id: i64) -> Result<Option<String>, Error> {
        self.check_available()?;
        Ok(lock(&self.store.groups)
            .get(&group_id)
            .map(|g| g.title.clone()))
    }

    fn requires_typed_params(&self) -> bool {
        self.store.typed_params.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduleStore for MemoryAdapter {
    async fn active_schedules(
        &self,
        mapping: Option<MappingType>,
    ) -> Result<Vec<Schedule>, Error> {
        Ok(lock(&self.store.schedules)
            .values()
            .filter(|s| s.is_active)
            .filter(|s| mapping.is_none_or(|m| s.mapping == m))
            .cloned()
            .collect())
    }

    async fn schedules_with_filter_data(&self) -> Result<Vec<Schedule>, Error> {
        Ok(lock(&self.store.schedules)
            .values()
            .filter(|s| s.filter_data.is_some())
            .cloned()
            .collect())
    }

    async fn fetch_schedule(&self, schedule_id: i64) -> Result<Option<Schedule>, Error> {
        Ok(lock(&self.store.schedules).get(&schedule_id).cloned())
    }

    async fn save_filter_data(
        &self,
        schedule_id: i64,
        filter_data: Option<String>,
    ) -> Result<(), Error> {
        let mut schedules = lock(&self.store.schedules);
        let schedule = schedules.get_mut(&schedule_id).ok_or(Error::NotFound)?;
        schedule.filter_data = filter_data;
        Ok(())
    }
}
