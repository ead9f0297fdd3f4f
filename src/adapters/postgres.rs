use std::{str::FromStr, time::Instant};

use async_trait::async_trait;
use metrics::histogram;
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query as PgQuery,
};
use tracing::debug;

use crate::{
    adapters::{MetadataAdapter, ScheduleStore},
    condition::FieldId,
    error::Error,
    field::{FieldRecord, FieldSummary},
    mapping::MappingType,
    query::{BoundParam, Positional, RecipientQuery, TypedValue},
    schedule::Schedule,
};

/// PostgreSQL adapter over the host's custom field and schedule tables.
///
/// Postgres does not coerce text parameters against numeric or date
/// columns, so configurations used with this adapter should enable
/// `FilterConfig::typed_params`.
///
/// Schema:
/// ```sql
/// CREATE TABLE public.civicrm_custom_group (
///     id BIGSERIAL PRIMARY KEY,
///     title TEXT NOT NULL,
///     extends TEXT NOT NULL,
///     table_name TEXT NOT NULL,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE
/// );
///
/// CREATE TABLE public.civicrm_custom_field (
///     id BIGSERIAL PRIMARY KEY,
///     custom_group_id BIGINT NOT NULL REFERENCES civicrm_custom_group(id) ON DELETE CASCADE,
///     label TEXT NOT NULL,
///     column_name TEXT NOT NULL,
///     data_type TEXT NOT NULL,
///     html_type TEXT NOT NULL,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE
/// );
///
/// CREATE TABLE public.civicrm_action_schedule (
///     id BIGSERIAL PRIMARY KEY,
///     title TEXT NOT NULL,
///     mapping_id TEXT NOT NULL,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     custom_field_filter_data TEXT
/// );
/// ```
pub struct PostgresAdapter {
    pub(crate) pool: PgPool,
}

impl PostgresAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the metadata and schedule tables when missing, and adds the
    /// filter column to a schedule table that predates it.
    pub async fn init_schema(&self) -> Result<(), Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS public.civicrm_custom_group (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                extends TEXT NOT NULL,
                table_name TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            );
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS public.civicrm_custom_field (
                id BIGSERIAL PRIMARY KEY,
                custom_group_id BIGINT NOT NULL
                    REFERENCES public.civicrm_custom_group(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                column_name TEXT NOT NULL,
                data_type TEXT NOT NULL,
                html_type TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            );
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_custom_field_group
                ON public.civicrm_custom_field(custom_group_id)
                WHERE is_active;
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS public.civicrm_action_schedule (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                mapping_id TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            );
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            ALTER TABLE public.civicrm_action_schedule
                ADD COLUMN IF NOT EXISTS custom_field_filter_data TEXT;
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        Ok(())
    }

    /// Runs an augmented recipient query and returns the first column of
    /// every row, which must be an integer id.
    pub async fn fetch_recipient_ids(&self, query: &RecipientQuery) -> Result<Vec<i64>, Error> {
        let start = Instant::now();
        let (sql, binds) = query.to_positional(Positional::Dollar);

        let rows = Self::query_bind_params(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        histogram!("reminder_filters.recipients.duration_ms", "backend" => "postgres")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>(0)
                    .map_err(|e| Error::Deserialize(e.to_string()))
            })
            .collect()
    }

    fn query_bind_params<'a>(
        mut query: PgQuery<'a, Postgres, PgArguments>,
        params: &[BoundParam],
    ) -> PgQuery<'a, Postgres, PgArguments> {
        for param in params {
            query = match param.typed_value() {
                TypedValue::Text(s) => query.bind(s),
                TypedValue::Integer(i) => query.bind(i),
                TypedValue::Float(f) => query.bind(f),
                TypedValue::Boolean(b) => query.bind(b),
                TypedValue::Timestamp(t) => query.bind(t),
            };
        }
        query
    }

    fn map_row_to_schedule(row: &PgRow) -> Result<Schedule, Error> {
        let de = |e: sqlx::Error| Error::Deserialize(e.to_string());
        let mapping_raw: String = row.try_get("mapping_id").map_err(de)?;

        Ok(Schedule {
            id: row.try_get("id").map_err(de)?,
            title: row.try_get("title").map_err(de)?,
            mapping: MappingType::from_str(&mapping_raw)?,
            is_active: row.try_get("is_active").map_err(de)?,
            filter_data: row.try_get("custom_field_filter_data").map_err(de)?,
        })
    }

    fn collect_schedules(
        rows: &[PgRow],
        mapping: Option<MappingType>,
    ) -> Result<Vec<Schedule>, Error> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::map_row_to_schedule(row) {
                Ok(schedule) if mapping.is_none_or(|m| schedule.mapping == m) => out.push(schedule),
                Ok(_) => {}
                // Host mapping types this crate does not filter.
                Err(Error::Unsupported(what)) => debug!(%what, "skipping schedule"),
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl MetadataAdapter for PostgresAdapter {
    async fn get_field(&self, field_id: FieldId) -> Result<Option<FieldRecord>, Error> {
        let id = i64::try_from(field_id.0).map_err(|_| Error::NotFound)?;
        let row = sqlx::query(
            r#"
            SELECT g.table_name, f.column_name, f.data_type, f.html_type, g.extends
            FROM public.civicrm_custom_field f
            JOIN public.civicrm_custom_group g ON g.id = f.custom_group_id
            WHERE f.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let de = |e: sqlx::Error| Error::Deserialize(e.to_string());
        Ok(Some(FieldRecord {
            table_name: row.try_get("table_name").map_err(de)?,
            column_name: row.try_get("column_name").map_err(de)?,
            data_type: row.try_get("data_type").map_err(de)?,
            html_type: row.try_get("html_type").map_err(de)?,
            extends: row.try_get("extends").map_err(de)?,
        }))
    }

    async fn get_fields_for_entity(&self, extends: &str) -> Result<Vec<FieldSummary>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT f.id, f.label, f.data_type, f.html_type, f.custom_group_id
            FROM public.civicrm_custom_field f
            JOIN public.civicrm_custom_group g ON g.id = f.custom_group_id
            WHERE g.extends = $1 AND g.is_active AND f.is_active
            ORDER BY f.id
            "#,
        )
        .bind(extends)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        let de = |e: sqlx::Error| Error::Deserialize(e.to_string());
        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id").map_err(de)?;
                let id = u64::try_from(id)
                    .map_err(|_| Error::Deserialize(format!("negative custom field id {}", id)))?;
                Ok(FieldSummary {
                    id: FieldId(id),
                    label: row.try_get("label").map_err(de)?,
                    data_type: row.try_get("data_type").map_err(de)?,
                    html_type: row.try_get("html_type").map_err(de)?,
                    custom_group_id: row.try_get("custom_group_id").map_err(de)?,
                })
            })
            .collect()
    }

    async fn get_group_title(&self, group_id: i64) -> Result<Option<String>, Error> {
        sqlx::query_scalar("SELECT title FROM public.civicrm_custom_group WHERE id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    // Postgres has no implicit cast from a text parameter to integer,
    // numeric or timestamp columns.
    fn requires_typed_params(&self) -> bool {
        true
    }
}

#[async_trait]
impl ScheduleStore for PostgresAdapter {
    async fn active_schedules(
        &self,
        mapping: Option<MappingType>,
    ) -> Result<Vec<Schedule>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, mapping_id, is_active, custom_field_filter_data
            FROM public.civicrm_action_schedule
            WHERE is_active
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        Self::collect_schedules(&rows, mapping)
    }

    async fn schedules_with_filter_data(&self) -> Result<Vec<Schedule>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, mapping_id, is_active, custom_field_filter_data
            FROM public.civicrm_action_schedule
            WHERE custom_field_filter_data IS NOT NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        Self::collect_schedules(&rows, None)
    }

    async fn fetch_schedule(&self, schedule_id: i64) -> Result<Option<Schedule>, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, title, mapping_id, is_active, custom_field_filter_data
            FROM public.civicrm_action_schedule
            WHERE id = $1
            "#,
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        row.as_ref().map(Self::map_row_to_schedule).transpose()
    }

    async fn save_filter_data(
        &self,
        schedule_id: i64,
        filter_data: Option<String>,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE public.civicrm_action_schedule SET custom_field_filter_data = $1 WHERE id = $2",
        )
        .bind(filter_data)
        .bind(schedule_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}
