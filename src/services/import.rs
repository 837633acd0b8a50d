//! Spreadsheet import and export
//!
//! Sheets are exchanged as a JSON array of rows, the first row holding the
//! headers. Tracking sheets locate columns by header text; customs sheets
//! follow the fixed column order of the customs template.

use crate::models::{
    parse_date, CustomsStatus, Operation, Record, Tracking, TRACKING_CLASS,
};
use crate::query::Query;
use crate::services::backend::{BackendError, ObjectBackend};
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Sheet has no data rows")]
    Empty,

    #[error("Invalid sheet: {0}")]
    InvalidSheet(String),

    #[error("Failed to read sheet: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse sheet: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Header row plus data rows, every cell as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Sheet {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Parse `[[header...], [cell...], ...]`. Numeric cells keep their text.
    pub fn from_value(value: Value) -> Result<Self, ImportError> {
        let Value::Array(rows) = value else {
            return Err(ImportError::InvalidSheet("expected an array of rows".into()));
        };
        let mut rows = rows.into_iter().map(|row| match row {
            Value::Array(cells) => Ok(cells.iter().map(cell_text).collect::<Vec<_>>()),
            _ => Err(ImportError::InvalidSheet("every row must be an array".into())),
        });
        let headers = rows.next().ok_or(ImportError::Empty)??;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Self { headers, rows })
    }

    pub fn to_value(&self) -> Value {
        let mut rows = Vec::with_capacity(self.rows.len() + 1);
        rows.push(serde_json::json!(self.headers));
        rows.extend(self.rows.iter().map(|row| serde_json::json!(row)));
        Value::Array(rows)
    }

    pub async fn read(path: &Path) -> Result<Self, ImportError> {
        let content = tokio::fs::read(path).await?;
        Self::from_value(serde_json::from_slice(&content)?)
    }

    pub async fn write(&self, path: &Path) -> Result<(), ImportError> {
        let content = serde_json::to_vec_pretty(&self.to_value())?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Column whose header contains one of `candidates`, tried in order
    pub fn find_column(&self, candidates: &[&str]) -> Option<usize> {
        find_column_index(&self.headers, candidates)
    }
}

/// Case-insensitive header substring match; the first candidate that hits wins
pub fn find_column_index(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        let candidate = candidate.to_lowercase();
        headers
            .iter()
            .position(|h| !h.is_empty() && h.to_lowercase().contains(&candidate))
    })
}

static YMD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})[-/年.](\d{1,2})[-/月.](\d{1,2})日?").expect("valid date regex")
});
static MDY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[-/](\d{1,2})[-/](\d{4})").expect("valid date regex"));

/// Day 0 of the 1900 date system is 1899-12-30 (25569 days before 1970-01-01)
const SERIAL_UNIX_EPOCH: i64 = 25569;

fn ymd(year: &str, month: &str, day: &str) -> Option<String> {
    let date = NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Normalize a spreadsheet date cell to `YYYY-MM-DD`.
///
/// Accepts `yyyy-mm-dd`, `yyyy/m/d`, `yyyy年m月d日`, `m/d/yyyy` and day
/// serial numbers. Anything else comes back trimmed but unchanged.
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    if let Some(c) = YMD.captures(raw) {
        if let Some(date) = ymd(&c[1], &c[2], &c[3]) {
            return date;
        }
    }
    if let Some(c) = MDY.captures(raw) {
        if let Some(date) = ymd(&c[3], &c[1], &c[2]) {
            return date;
        }
    }
    if let Ok(serial) = raw.parse::<f64>() {
        if (1.0..2_958_466.0).contains(&serial) {
            let days = serial.floor() as i64 - SERIAL_UNIX_EPOCH;
            if let Some(date) = NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(Duration::days(days)))
            {
                return date.format("%Y-%m-%d").to_string();
            }
        }
    }
    raw.to_string()
}

/// Tracking sheet columns: record field and the header texts that name it
const TRACKING_COLUMNS: [(&str, &[&str]); 10] = [
    ("containerNo", &["柜号", "container"]),
    ("arrivalDate", &["到港日期", "arrival"]),
    ("billNo", &["提单号", "bill"]),
    ("country", &["国家", "country"]),
    ("productName", &["商品描述", "品名", "product"]),
    ("shipper", &["发货人", "shipper"]),
    ("preEntryNo", &["预录入号", "pre-entry"]),
    ("customsNo", &["报关单号", "customs no"]),
    ("euDeposit", &["欧盟保证金", "deposit"]),
    ("operation", &["操作", "operation"]),
];

/// Column order of the customs import template
pub const CUSTOMS_TEMPLATE_FIELDS: [&str; 31] = [
    "containerNo",
    "arrivalDate",
    "billNo",
    "customsNo",
    "country",
    "productName",
    "preEntryNo",
    "declareDate",
    "customsStatus",
    "instruction",
    "euDeposit",
    "domesticConsignee",
    "consumptionUnit",
    "foreignConsignee",
    "hsCode",
    "supervisionCategory",
    "specification",
    "goodsValue",
    "currency",
    "factoryNo",
    "shipperRecordNo",
    "packageCount",
    "netWeight",
    "grossWeight",
    "certificate105",
    "certificate325",
    "certificate519",
    "certificate113",
    "inspectionSpec",
    "productionDate",
    "remark",
];

pub const CUSTOMS_TEMPLATE_HEADERS: [&str; 31] = [
    "柜号", "到港日期", "提单号", "报关单号", "国家", "品名", "预录入号", "申报日期",
    "报关状态", "指令", "欧盟保证金", "境内收发货人", "消费使用单位", "境外收发货人",
    "HS编码", "监管类别名称", "规格型号", "货值", "币制", "厂号", "发货人备案号",
    "件数", "净重", "毛重", "105证书", "325证书", "519证书", "113证书",
    "检验检疫货物规格", "生产日期", "备注",
];

const CUSTOMS_DATE_FIELDS: [&str; 3] = ["arrivalDate", "declareDate", "productionDate"];

pub fn tracking_template() -> Sheet {
    let headers = ["柜号", "到港日期", "提单号", "国家", "品名", "发货人", "预录入号", "报关单号", "欧盟保证金", "操作"];
    Sheet::new(headers.iter().map(|h| h.to_string()).collect(), Vec::new())
}

pub fn customs_template() -> Sheet {
    Sheet::new(
        CUSTOMS_TEMPLATE_HEADERS.iter().map(|h| h.to_string()).collect(),
        Vec::new(),
    )
}

/// Export declared records in the customs layout
pub fn export_customs(records: &[Tracking]) -> Sheet {
    let headers = [
        "到港日期", "申报日期", "预录入号", "提单号", "柜号", "报关单号", "欧盟保证金", "国家",
        "品名", "报关状态", "指令", "境内收发货人", "消费使用单位", "境外收发货人", "HS编码",
        "监管类别名称", "规格型号", "货值", "币制", "厂号", "发货人备案号", "件数", "净重",
        "毛重", "105证书", "325证书", "519证书", "113证书", "检验检疫货物规格", "生产日期",
        "备注",
    ];
    let rows = records
        .iter()
        .map(|t| {
            vec![
                t.arrival_date.clone(),
                t.declare_date.clone(),
                t.pre_entry_no.clone(),
                t.bill_no.clone(),
                t.container_no.clone(),
                t.customs_no.clone(),
                t.eu_deposit.clone(),
                t.country.clone(),
                t.product_name.clone(),
                t.customs_status.map(|s| s.label().to_string()).unwrap_or_default(),
                t.instruction.clone(),
                t.domestic_consignee.clone(),
                t.consumption_unit.clone(),
                t.foreign_consignee.clone(),
                t.hs_code.clone(),
                t.supervision_category.clone(),
                t.specification.clone(),
                t.goods_value.clone(),
                t.currency.clone(),
                t.factory_no.clone(),
                t.shipper_record_no.clone(),
                t.package_count.clone(),
                t.net_weight.clone(),
                t.gross_weight.clone(),
                t.certificate_105.clone(),
                t.certificate_325.clone(),
                t.certificate_519.clone(),
                t.certificate_113.clone(),
                t.inspection_spec.clone(),
                t.production_date.clone(),
                t.remark.clone(),
            ]
        })
        .collect();
    Sheet::new(headers.iter().map(|h| h.to_string()).collect(), rows)
}

/// A row that could not be imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    /// 1-based sheet row, the header being row 1
    pub row: usize,
    pub cells: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: u32,
    pub updated: u32,
    pub failed: Vec<FailedRow>,
}

impl ImportReport {
    /// Failed rows with their reason appended, ready to fix and re-import
    pub fn failed_sheet(&self, headers: &[String]) -> Sheet {
        let mut headers = headers.to_vec();
        headers.push("错误原因".to_string());
        let rows = self
            .failed
            .iter()
            .map(|f| {
                let mut cells = f.cells.clone();
                cells.resize(headers.len() - 1, String::new());
                cells.push(f.reason.clone());
                cells
            })
            .collect();
        Sheet::new(headers, rows)
    }

    fn fail(&mut self, index: usize, cells: &[String], reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Import row {} failed: {}", index + 2, reason);
        self.failed.push(FailedRow {
            row: index + 2,
            cells: cells.to_vec(),
            reason,
        });
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Reject rows whose container number is already stored
    pub skip_duplicates: bool,
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn cell(row: &[String], index: Option<usize>) -> String {
    index
        .and_then(|i| row.get(i))
        .map(|c| c.trim().to_string())
        .unwrap_or_default()
}

/// Validate the mandatory columns shared by both imports
fn check_required(container_no: &str, arrival_date: &str) -> Result<(), String> {
    if container_no.is_empty() {
        return Err("Container number is required".into());
    }
    if arrival_date.is_empty() {
        return Err("Arrival date is required".into());
    }
    if parse_date(arrival_date).is_none() {
        return Err(format!("Invalid arrival date: {}", arrival_date));
    }
    Ok(())
}

pub struct ImportService {
    backend: Arc<dyn ObjectBackend>,
    page_size: u32,
}

impl ImportService {
    pub fn new(backend: Arc<dyn ObjectBackend>, page_size: u32) -> Self {
        Self { backend, page_size }
    }

    async fn stored_container_numbers(&self) -> Result<HashSet<String>, BackendError> {
        let docs = Query::of::<Tracking>()
            .exists("containerNo")
            .select(["containerNo"])
            .find_all(self.backend.as_ref(), self.page_size)
            .await?;
        Ok(docs
            .iter()
            .filter_map(|d| d.get_str("containerNo"))
            .map(|c| c.trim().to_string())
            .collect())
    }

    fn tracking_from_row(columns: &[Option<usize>], row: &[String]) -> Result<Tracking, String> {
        let value = |field: &str| -> String {
            let index = TRACKING_COLUMNS
                .iter()
                .position(|(f, _)| *f == field)
                .and_then(|i| columns[i]);
            cell(row, index)
        };

        let container_no = value("containerNo");
        let arrival_date = normalize_date(&value("arrivalDate"));
        check_required(&container_no, &arrival_date)?;

        let operation = match value("operation") {
            op if op.is_empty() => None,
            op => Some(op.parse::<Operation>().map_err(|e| e.to_string())?),
        };

        Ok(Tracking {
            container_no,
            arrival_date,
            bill_no: value("billNo"),
            country: value("country"),
            product_name: value("productName"),
            shipper: value("shipper"),
            pre_entry_no: value("preEntryNo"),
            customs_no: value("customsNo"),
            eu_deposit: value("euDeposit"),
            operation,
            ..Tracking::default()
        })
    }

    /// Create a tracking record per data row
    pub async fn import_tracking(
        &self,
        sheet: &Sheet,
        options: ImportOptions,
    ) -> Result<ImportReport, ImportError> {
        if sheet.rows.iter().all(|r| is_blank(r)) {
            return Err(ImportError::Empty);
        }
        let columns: Vec<Option<usize>> = TRACKING_COLUMNS
            .iter()
            .map(|(_, candidates)| sheet.find_column(candidates))
            .collect();

        let mut known = if options.skip_duplicates {
            self.stored_container_numbers().await?
        } else {
            HashSet::new()
        };

        let mut report = ImportReport::default();
        for (index, row) in sheet.rows.iter().enumerate() {
            if is_blank(row) {
                continue;
            }
            let tracking = match Self::tracking_from_row(&columns, row) {
                Ok(t) => t,
                Err(reason) => {
                    report.fail(index, row, reason);
                    continue;
                }
            };
            if options.skip_duplicates && known.contains(&tracking.container_no) {
                report.fail(index, row, format!("Container {} already exists", tracking.container_no));
                continue;
            }

            let fields = match tracking.to_fields() {
                Ok(fields) => fields,
                Err(e) => {
                    report.fail(index, row, e.to_string());
                    continue;
                }
            };
            match self.backend.save(TRACKING_CLASS, fields).await {
                Ok(_) => {
                    report.created += 1;
                    known.insert(tracking.container_no);
                }
                Err(e) => report.fail(index, row, e.to_string()),
            }
        }

        tracing::info!(
            "Tracking import: {} created, {} failed",
            report.created,
            report.failed.len()
        );
        Ok(report)
    }

    fn customs_fields(row: &[String]) -> Result<Map<String, Value>, String> {
        let mut fields = Map::new();
        for (index, field) in CUSTOMS_TEMPLATE_FIELDS.iter().enumerate() {
            let mut value = cell(row, Some(index));
            if CUSTOMS_DATE_FIELDS.contains(field) {
                value = normalize_date(&value);
            }
            fields.insert(field.to_string(), Value::String(value));
        }

        let container_no = fields.get("containerNo").and_then(Value::as_str).unwrap_or_default();
        let arrival_date = fields.get("arrivalDate").and_then(Value::as_str).unwrap_or_default();
        check_required(container_no, arrival_date)?;

        let status = fields
            .get("customsStatus")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !status.is_empty() {
            let status = status.parse::<CustomsStatus>().map_err(|e| e.to_string())?;
            fields.insert("customsStatus".into(), Value::String(status.code().into()));
        }
        fields.insert(
            "operation".into(),
            Value::String(Operation::Declared.code().into()),
        );
        Ok(fields)
    }

    /// Upsert declared records by container number
    pub async fn import_customs(&self, sheet: &Sheet) -> Result<ImportReport, ImportError> {
        if sheet.rows.iter().all(|r| is_blank(r)) {
            return Err(ImportError::Empty);
        }

        let mut report = ImportReport::default();
        for (index, row) in sheet.rows.iter().enumerate() {
            if is_blank(row) {
                continue;
            }
            let fields = match Self::customs_fields(row) {
                Ok(fields) => fields,
                Err(reason) => {
                    report.fail(index, row, reason);
                    continue;
                }
            };
            match self.upsert_by_container(fields).await {
                Ok(true) => report.created += 1,
                Ok(false) => report.updated += 1,
                Err(e) => report.fail(index, row, e.to_string()),
            }
        }

        tracing::info!(
            "Customs import: {} created, {} updated, {} failed",
            report.created,
            report.updated,
            report.failed.len()
        );
        Ok(report)
    }

    /// Returns `true` when a record was created
    async fn upsert_by_container(&self, fields: Map<String, Value>) -> Result<bool, BackendError> {
        let container_no = fields
            .get("containerNo")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let existing = Query::of::<Tracking>()
            .equal_to("containerNo", container_no)
            .ascending("createdAt")
            .first(self.backend.as_ref())
            .await?;

        match existing {
            Some(doc) => {
                self.backend
                    .update(TRACKING_CLASS, &doc.object_id, fields)
                    .await?;
                Ok(false)
            }
            None => {
                self.backend.save(TRACKING_CLASS, fields).await?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object::tests::{fields, setup_test_service};
    use serde_json::json;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_normalize_date_formats() {
        assert_eq!(normalize_date("2024-01-15"), "2024-01-15");
        assert_eq!(normalize_date("2024/1/5"), "2024-01-05");
        assert_eq!(normalize_date("2024年3月9日"), "2024-03-09");
        assert_eq!(normalize_date("1/15/2024"), "2024-01-15");
        assert_eq!(normalize_date("45306"), "2024-01-15");
        assert_eq!(normalize_date("45306.75"), "2024-01-15");
        assert_eq!(normalize_date(" "), "");
        assert_eq!(normalize_date("soon"), "soon");
        assert_eq!(normalize_date("2024-13-40"), "2024-13-40");
    }

    #[test]
    fn test_find_column_index_prefers_candidate_order() {
        let headers = strings(&["序号", "品名(商品描述)", "Container No."]);
        assert_eq!(find_column_index(&headers, &["商品描述", "品名"]), Some(1));
        assert_eq!(find_column_index(&headers, &["CONTAINER"]), Some(2));
        assert_eq!(find_column_index(&headers, &["柜号"]), None);
    }

    #[test]
    fn test_sheet_from_value_stringifies_cells() {
        let sheet = Sheet::from_value(json!([["柜号", "到港日期"], ["C1", 45306], ["C2", null]])).unwrap();
        assert_eq!(sheet.rows[0], strings(&["C1", "45306"]));
        assert_eq!(sheet.rows[1], strings(&["C2", ""]));
        assert!(matches!(Sheet::from_value(json!([])), Err(ImportError::Empty)));
        assert!(Sheet::from_value(json!({"a": 1})).is_err());
    }

    #[tokio::test]
    async fn test_failed_rows_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");
        let report = ImportReport {
            failed: vec![FailedRow {
                row: 3,
                cells: strings(&["C9"]),
                reason: "缺少到港日期".into(),
            }],
            ..ImportReport::default()
        };

        report
            .failed_sheet(&strings(&["柜号", "到港日期"]))
            .write(&path)
            .await
            .unwrap();
        let sheet = Sheet::read(&path).await.unwrap();
        assert_eq!(sheet.headers, strings(&["柜号", "到港日期", "错误原因"]));
        assert_eq!(sheet.rows, vec![strings(&["C9", "", "缺少到港日期"])]);

        let missing = Sheet::read(&dir.path().join("absent.json")).await;
        assert!(matches!(missing, Err(ImportError::Io(_))));
    }

    #[tokio::test]
    async fn test_import_tracking_reports_failed_rows() {
        let (_dir, service) = setup_test_service().await;
        service
            .save("Tracking", fields(json!({"containerNo": "DUP1"})))
            .await
            .unwrap();
        let importer = ImportService::new(service.clone(), 1000);
        let sheet = Sheet::new(
            strings(&["柜号", "到港日期", "提单号", "操作"]),
            vec![
                strings(&["C1", "2024/1/15", "B1", "申报"]),
                strings(&["", "2024-01-15", "B2", ""]),
                strings(&["C3", "", "", ""]),
                strings(&["C4", "2024-01-15", "", "shipped"]),
                strings(&["DUP1", "2024-01-15", "", ""]),
                strings(&["", "", "", ""]),
                strings(&["C1", "45306", "", ""]),
            ],
        );

        let report = importer
            .import_tracking(&sheet, ImportOptions { skip_duplicates: true })
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        let failed_rows: Vec<usize> = report.failed.iter().map(|f| f.row).collect();
        assert_eq!(failed_rows, vec![3, 4, 5, 6, 8]);

        let stored: Vec<Tracking> = Query::of::<Tracking>()
            .equal_to("containerNo", "C1")
            .find_as(service.as_ref())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].arrival_date, "2024-01-15");
        assert_eq!(stored[0].operation, Some(Operation::Declared));

        let failed = report.failed_sheet(&sheet.headers);
        assert_eq!(failed.headers.last().map(String::as_str), Some("错误原因"));
        assert_eq!(failed.rows.len(), 5);
        assert_eq!(failed.rows[0].len(), 5);
    }

    #[tokio::test]
    async fn test_import_customs_upserts_and_declares() {
        let (_dir, service) = setup_test_service().await;
        let existing = service
            .save(
                "Tracking",
                fields(json!({"containerNo": "C1", "operation": "checked", "remark": "old"})),
            )
            .await
            .unwrap();
        let importer = ImportService::new(service.clone(), 1000);

        let mut row1 = vec![String::new(); 31];
        row1[0] = "C1".into();
        row1[1] = "2024-01-15".into();
        row1[8] = "放行".into();
        row1[14] = "0303".into();
        let mut row2 = vec![String::new(); 31];
        row2[0] = "C2".into();
        row2[1] = "45306".into();
        let mut bad = row2.clone();
        bad[0] = "C3".into();
        bad[8] = "lost".into();

        let report = importer
            .import_customs(&Sheet::new(customs_template().headers, vec![row1, row2, bad]))
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.failed.len(), 1);

        let records: Vec<Tracking> = Query::of::<Tracking>()
            .ascending("containerNo")
            .find_as(service.as_ref())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].object_id.as_deref(), Some(existing.object_id.as_str()));
        assert!(records.iter().all(Tracking::is_declared));
        assert_eq!(records[0].customs_status, Some(CustomsStatus::Released));
        assert_eq!(records[0].hs_code, "0303");
        assert_eq!(records[1].arrival_date, "2024-01-15");

        let sheet = export_customs(&records);
        assert_eq!(sheet.headers.len(), 31);
        assert_eq!(sheet.rows[0][4], "C1");
        assert_eq!(sheet.rows[0][9], "放行");
    }
}
