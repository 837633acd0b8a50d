//! Reference table sync
//!
//! HS codes and exporters are rebuilt from tracking records. Each record with
//! both key fields filled in maps to one reference row keyed by that pair:
//! missing rows are created, rows whose details differ are updated and the
//! rest are skipped. A failing record is counted and the job moves on.

use crate::config::SyncConfig;
use crate::models::{Exporter, HsCode, Record, Tracking, CREATED_AT};
use crate::query::Query;
use crate::services::backend::{BackendError, ObjectBackend};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A reference class derived from tracking records
pub trait ReferenceRecord: Record {
    /// Name used in logs
    const LABEL: &'static str;

    /// Key fields, named the same on `Tracking` and on the reference class
    const KEY_FIELDS: [&'static str; 2];

    /// The row a tracking record maps to, `None` when a key is blank
    fn from_tracking(tracking: &Tracking) -> Option<Self>;

    fn key(&self) -> [&str; 2];

    /// Non-key fields, as persisted
    fn details(&self) -> Map<String, Value>;
}

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

fn present(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl ReferenceRecord for HsCode {
    const LABEL: &'static str = "HS code";
    const KEY_FIELDS: [&'static str; 2] = ["hsCode", "productName"];

    fn from_tracking(tracking: &Tracking) -> Option<Self> {
        Some(HsCode {
            object_id: None,
            hs_code: present(&tracking.hs_code)?,
            product_name: present(&tracking.product_name)?,
            supervision_category: tracking.supervision_category.clone(),
            specification: tracking.specification.clone(),
        })
    }

    fn key(&self) -> [&str; 2] {
        [&self.hs_code, &self.product_name]
    }

    fn details(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("supervisionCategory".into(), text(&self.supervision_category));
        map.insert("specification".into(), text(&self.specification));
        map
    }
}

impl ReferenceRecord for Exporter {
    const LABEL: &'static str = "exporter";
    const KEY_FIELDS: [&'static str; 2] = ["foreignConsignee", "shipperRecordNo"];

    fn from_tracking(tracking: &Tracking) -> Option<Self> {
        Some(Exporter {
            object_id: None,
            foreign_consignee: present(&tracking.foreign_consignee)?,
            shipper_record_no: present(&tracking.shipper_record_no)?,
            customs_no: tracking.customs_no.clone(),
        })
    }

    fn key(&self) -> [&str; 2] {
        [&self.foreign_consignee, &self.shipper_record_no]
    }

    fn details(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("customsNo".into(), text(&self.customs_no));
        map
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errors: u32,
}

enum Outcome {
    Created,
    Updated,
    Skipped,
}

pub struct SyncService {
    backend: Arc<dyn ObjectBackend>,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(backend: Arc<dyn ObjectBackend>, config: SyncConfig) -> Self {
        Self { backend, config }
    }

    pub async fn sync_hs_codes(&self) -> Result<SyncReport, BackendError> {
        self.sync::<HsCode>().await
    }

    pub async fn sync_exporters(&self) -> Result<SyncReport, BackendError> {
        self.sync::<Exporter>().await
    }

    /// Rebuild `T` from every tracking record that has both key fields
    pub async fn sync<T: ReferenceRecord>(&self) -> Result<SyncReport, BackendError> {
        let [first, second] = T::KEY_FIELDS;
        let decoded = Query::of::<Tracking>()
            .exists(first)
            .exists(second)
            .ascending(CREATED_AT)
            .find_all_decoded::<Tracking>(self.backend.as_ref(), self.config.page_size)
            .await?;
        tracing::info!(
            "Syncing {} from {} tracking record(s)",
            T::LABEL,
            decoded.records.len() + decoded.failed.len()
        );

        let mut report = SyncReport::default();
        for (object_id, e) in &decoded.failed {
            tracing::warn!("Unreadable tracking record {}: {}", object_id, e);
            report.errors += 1;
        }
        let sources = decoded.records;
        let chunk_size = self.config.chunk_size.max(1);
        let chunks = sources.len().div_ceil(chunk_size);

        for (index, chunk) in sources.chunks(chunk_size).enumerate() {
            for tracking in chunk {
                let Some(row) = T::from_tracking(tracking) else {
                    continue;
                };
                match self.sync_row(&row).await {
                    Ok(Outcome::Created) => report.created += 1,
                    Ok(Outcome::Updated) => report.updated += 1,
                    Ok(Outcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!("Failed to sync {} {:?}: {}", T::LABEL, row.key(), e);
                        report.errors += 1;
                    }
                }
            }
            tracing::debug!("{} sync: chunk {}/{} done", T::LABEL, index + 1, chunks);
        }

        tracing::info!(
            "{} sync finished: {} created, {} updated, {} skipped, {} errors",
            T::LABEL,
            report.created,
            report.updated,
            report.skipped,
            report.errors
        );
        Ok(report)
    }

    async fn sync_row<T: ReferenceRecord>(&self, row: &T) -> Result<Outcome, BackendError> {
        let [first, second] = T::KEY_FIELDS;
        let [first_value, second_value] = row.key();
        let existing = Query::of::<T>()
            .equal_to(first, first_value)
            .equal_to(second, second_value)
            .first(self.backend.as_ref())
            .await?;

        let details = row.details();
        match existing {
            None => {
                self.backend.save(T::CLASS_NAME, row.to_fields()?).await?;
                Ok(Outcome::Created)
            }
            Some(doc) => {
                let changed = details
                    .iter()
                    .any(|(field, value)| doc.get(field).unwrap_or(&Value::Null) != value);
                if !changed {
                    return Ok(Outcome::Skipped);
                }
                self.backend
                    .update(T::CLASS_NAME, &doc.object_id, details)
                    .await?;
                Ok(Outcome::Updated)
            }
        }
    }
}
