use std::{collections::HashMap, sync::Arc};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{adapters::MetadataAdapter, condition::FieldId, query::ParamType};

/// Storage location of a custom field as reported by host metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub html_type: String,
    pub extends: String,
}

/// Listing entry for the condition-builder UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub id: FieldId,
    pub label: String,
    pub data_type: String,
    pub html_type: String,
    pub custom_group_id: i64,
}

/// Resolved, immutable physical location of a custom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub html_type: String,
}

impl FieldInfo {
    pub fn from_record(field_id: FieldId, record: FieldRecord) -> Self {
        Self {
            field_id,
            table_name: record.table_name,
            column_name: record.column_name,
            data_type: record.data_type,
            html_type: record.html_type,
        }
    }

    /// Binder type for values compared against this field's column.
    pub fn param_type(&self) -> ParamType {
        match self.data_type.as_str() {
            "Int" | "StateProvince" | "Country" | "ContactReference" | "File" => {
                ParamType::Integer
            }
            "Float" | "Money" => ParamType::Float,
            "Boolean" => ParamType::Boolean,
            "Date" => ParamType::Timestamp,
            _ => ParamType::String,
        }
    }
}

/// True for plain `[A-Za-z_][A-Za-z0-9_]*` identifiers. Table and column
/// names are spliced into SQL text, so anything else is refused.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Per-run field metadata cache.
///
/// Built once per dispatch run and borrowed mutably by whoever compiles
/// conditions, so it cannot be shared across threads without the caller
/// adding its own synchronization. Definitive misses are cached alongside
/// hits; storage errors are not, so a later schedule in the same run may
/// retry the lookup.
pub struct FieldResolver<'a> {
    metadata: &'a dyn MetadataAdapter,
    cache: HashMap<FieldId, Option<Arc<FieldInfo>>>,
}

impl<'a> FieldResolver<'a> {
    pub fn new(metadata: &'a dyn MetadataAdapter) -> Self {
        Self {
            metadata,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, field_id: FieldId) -> Option<Arc<FieldInfo>> {
        if let Some(cached) = self.cache.get(&field_id) {
            counter!("reminder_filters.resolver.cache_hits").increment(1);
            return cached.clone();
        }
        counter!("reminder_filters.resolver.cache_misses").increment(1);

        let resolved = match self.metadata.get_field(field_id).await {
            Ok(Some(record)) => {
                if is_sql_identifier(&record.table_name) && is_sql_identifier(&record.column_name)
                {
                    Some(Arc::new(FieldInfo::from_record(field_id, record)))
                } else {
                    warn!(
                        %field_id,
                        table = %record.table_name,
                        column = %record.column_name,
                        "custom field storage is not a plain identifier, ignoring field"
                    );
                    None
                }
            }
            Ok(None) => {
                debug!(%field_id, "custom field not found");
                None
            }
            Err(err) => {
                warn!(%field_id, error = %err, "custom field lookup failed");
                return None;
            }
        };

        self.cache.insert(field_id, resolved.clone());
        resolved
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
