//! Home dashboard
//!
//! Four work queues derived from tracking records. Each card has a count and
//! a detail list, newest records first.

use crate::models::{CustomsStatus, Operation, Tracking, CREATED_AT};
use crate::query::Query;
use crate::services::backend::{BackendError, ObjectBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Marker in the customs number for records still waiting on documents
pub const MISSING_DOCUMENTS_MARKER: &str = "缺";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardCard {
    /// Released, but no quarantine certificate on file
    QuarantinePending,
    InspectionPending,
    /// Pre-entry number assigned, no operation yet
    UnprintedCheck,
    MissingDocuments,
}

impl DashboardCard {
    pub const ALL: [DashboardCard; 4] = [
        DashboardCard::QuarantinePending,
        DashboardCard::InspectionPending,
        DashboardCard::UnprintedCheck,
        DashboardCard::MissingDocuments,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DashboardCard::QuarantinePending => "检疫证未出",
            DashboardCard::InspectionPending => "查验未完成",
            DashboardCard::UnprintedCheck => "未打印核对单",
            DashboardCard::MissingDocuments => "缺资料",
        }
    }

    pub fn matches(&self, tracking: &Tracking) -> bool {
        match self {
            DashboardCard::QuarantinePending => {
                tracking.is_released() && !tracking.has_quarantine_certificate()
            }
            DashboardCard::InspectionPending => tracking
                .customs_status
                .is_some_and(|status| status.needs_inspection()),
            DashboardCard::UnprintedCheck => {
                !tracking.pre_entry_no.trim().is_empty() && tracking.operation.is_none()
            }
            DashboardCard::MissingDocuments => {
                tracking.customs_no.contains(MISSING_DOCUMENTS_MARKER)
            }
        }
    }

    /// Server-side narrowing; `matches` is applied to what comes back
    fn query(&self) -> Query {
        let base = Query::of::<Tracking>().descending(CREATED_AT);
        match self {
            DashboardCard::QuarantinePending => base.contained_in(
                "customsStatus",
                CustomsStatus::Released.stored_values(),
            ),
            DashboardCard::InspectionPending => base.contained_in(
                "customsStatus",
                CustomsStatus::INSPECTION
                    .iter()
                    .flat_map(|status| status.stored_values()),
            ),
            DashboardCard::UnprintedCheck => base
                .exists("preEntryNo")
                .not_equal_to("preEntryNo", "")
                .not_contained_in(
                    "operation",
                    Operation::ALL.iter().flat_map(|op| op.stored_values()),
                ),
            DashboardCard::MissingDocuments => {
                base.contains("customsNo", MISSING_DOCUMENTS_MARKER)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub quarantine_pending: u64,
    pub inspection_pending: u64,
    pub unprinted_check: u64,
    pub missing_documents: u64,
}

impl DashboardCounts {
    /// Counts over records already in memory
    pub fn from_records(records: &[Tracking]) -> Self {
        let count = |card: DashboardCard| records.iter().filter(|t| card.matches(t)).count() as u64;
        Self {
            quarantine_pending: count(DashboardCard::QuarantinePending),
            inspection_pending: count(DashboardCard::InspectionPending),
            unprinted_check: count(DashboardCard::UnprintedCheck),
            missing_documents: count(DashboardCard::MissingDocuments),
        }
    }

    pub fn get(&self, card: DashboardCard) -> u64 {
        match card {
            DashboardCard::QuarantinePending => self.quarantine_pending,
            DashboardCard::InspectionPending => self.inspection_pending,
            DashboardCard::UnprintedCheck => self.unprinted_check,
            DashboardCard::MissingDocuments => self.missing_documents,
        }
    }
}

pub struct DashboardService {
    backend: Arc<dyn ObjectBackend>,
    page_size: u32,
}

impl DashboardService {
    pub fn new(backend: Arc<dyn ObjectBackend>, page_size: u32) -> Self {
        Self { backend, page_size }
    }

    /// Records behind one card
    pub async fn details(&self, card: DashboardCard) -> Result<Vec<Tracking>, BackendError> {
        let records = card
            .query()
            .find_all_decoded::<Tracking>(self.backend.as_ref(), self.page_size)
            .await?
            .warn_failed();
        Ok(records.into_iter().filter(|t| card.matches(t)).collect())
    }

    pub async fn counts(&self) -> Result<DashboardCounts, BackendError> {
        let mut counts = DashboardCounts::default();
        for card in DashboardCard::ALL {
            // Only the quarantine card needs the attachments inspected
            let n = match card {
                DashboardCard::QuarantinePending => self.details(card).await?.len() as u64,
                _ => card.query().count(self.backend.as_ref()).await?,
            };
            match card {
                DashboardCard::QuarantinePending => counts.quarantine_pending = n,
                DashboardCard::InspectionPending => counts.inspection_pending = n,
                DashboardCard::UnprintedCheck => counts.unprinted_check = n,
                DashboardCard::MissingDocuments => counts.missing_documents = n,
            }
        }
        tracing::debug!("Dashboard counts: {:?}", counts);
        Ok(counts)
    }
}
