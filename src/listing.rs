use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::{adapters::MetadataAdapter, condition::FieldId, error::Error, mapping::EntityRef};

pub const UNKNOWN_GROUP: &str = "Unknown Group";

/// One selectable field in the schedule form's field picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldListing {
    pub id: FieldId,
    pub label: String,
    pub data_type: String,
    pub html_type: String,
    pub group_title: String,
}

/// Active fields attached to `entity`, sorted by label. Contact fields of
/// every contact subtype are included.
///
/// A field-list failure is returned; a group-title failure only degrades the
/// title to [`UNKNOWN_GROUP`].
pub async fn available_fields(
    metadata: &dyn MetadataAdapter,
    entity: &EntityRef,
) -> Result<Vec<FieldListing>, Error> {
    let mut summaries = Vec::new();
    for extends in entity.extends_values() {
        summaries.extend(metadata.get_fields_for_entity(extends).await?);
    }
    summaries.sort_by(|a, b| a.label.cmp(&b.label).then(a.id.cmp(&b.id)));
    summaries.dedup_by_key(|f| f.id);

    let mut titles: HashMap<i64, String> = HashMap::new();
    let mut out = Vec::with_capacity(summaries.len());
    for field in summaries {
        let group_title = match titles.get(&field.custom_group_id) {
            Some(title) => title.clone(),
            None => {
                let title = match metadata.get_group_title(field.custom_group_id).await {
                    Ok(Some(title)) => title,
                    Ok(None) => UNKNOWN_GROUP.to_string(),
                    Err(err) => {
                        warn!(
                            group_id = field.custom_group_id,
                            error = %err,
                            "custom group title lookup failed"
                        );
                        UNKNOWN_GROUP.to_string()
                    }
                };
                titles.insert(field.custom_group_id, title.clone());
                title
            }
        };

        out.push(FieldListing {
            id: field.id,
            label: field.label,
            data_type: field.data_type,
            html_type: field.html_type,
            group_title,
        });
    }
    Ok(out)
}
