//! Tracking records
//!
//! A `Tracking` row follows one container from arrival through customs
//! declaration and release. The customs view is the subset whose operation is
//! `Declared`; the customs detail fields are only filled in for those.

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::object::Record;

pub const TRACKING_CLASS: &str = "Tracking";

/// Attachment type that counts as the quarantine certificate on the dashboard
pub const QUARANTINE_CERTIFICATE: &str = "检疫证";

/// Workflow step of a tracking record.
///
/// Stored as the snake_case code; the Chinese labels used by older data and
/// spreadsheets are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Checked,
    Printed,
    Declared,
    AskDeclare,
    ManifestReady,
    AwaitingNotice,
    Cancelled,
    ReadyToDeclare,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::Checked,
        Operation::Printed,
        Operation::Declared,
        Operation::AskDeclare,
        Operation::ManifestReady,
        Operation::AwaitingNotice,
        Operation::Cancelled,
        Operation::ReadyToDeclare,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Operation::Checked => "checked",
            Operation::Printed => "printed",
            Operation::Declared => "declared",
            Operation::AskDeclare => "ask_declare",
            Operation::ManifestReady => "manifest_ready",
            Operation::AwaitingNotice => "awaiting_notice",
            Operation::Cancelled => "cancelled",
            Operation::ReadyToDeclare => "ready_to_declare",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Operation::Checked => "已核",
            Operation::Printed => "打单",
            Operation::Declared => "申报",
            Operation::AskDeclare => "问申报",
            Operation::ManifestReady => "有舱单",
            Operation::AwaitingNotice => "等通知申报",
            Operation::Cancelled => "取消",
            Operation::ReadyToDeclare => "可以报",
        }
    }

    /// Stored values that mean this operation (code and legacy label)
    pub fn stored_values(&self) -> [&'static str; 2] {
        [self.code(), self.label()]
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Operation::ALL
            .into_iter()
            .find(|op| op.code() == s || op.label() == s)
            .ok_or_else(|| anyhow!("Invalid operation: {}", s))
    }
}

/// Customs clearance state of a tracking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomsStatus {
    Released,
    DestinationInspection,
    Concluded,
    PortInspection,
    NoElectronicInfo,
    CombinedInspection,
    Suspended,
    Cancelled,
}

impl CustomsStatus {
    pub const ALL: [CustomsStatus; 8] = [
        CustomsStatus::Released,
        CustomsStatus::DestinationInspection,
        CustomsStatus::Concluded,
        CustomsStatus::PortInspection,
        CustomsStatus::NoElectronicInfo,
        CustomsStatus::CombinedInspection,
        CustomsStatus::Suspended,
        CustomsStatus::Cancelled,
    ];

    /// Statuses that still need an inspection to be arranged
    pub const INSPECTION: [CustomsStatus; 3] = [
        CustomsStatus::DestinationInspection,
        CustomsStatus::PortInspection,
        CustomsStatus::CombinedInspection,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            CustomsStatus::Released => "released",
            CustomsStatus::DestinationInspection => "destination_inspection",
            CustomsStatus::Concluded => "concluded",
            CustomsStatus::PortInspection => "port_inspection",
            CustomsStatus::NoElectronicInfo => "no_electronic_info",
            CustomsStatus::CombinedInspection => "combined_inspection",
            CustomsStatus::Suspended => "suspended",
            CustomsStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CustomsStatus::Released => "放行",
            CustomsStatus::DestinationInspection => "目的地查验",
            CustomsStatus::Concluded => "审结",
            CustomsStatus::PortInspection => "口岸查验",
            CustomsStatus::NoElectronicInfo => "无电子信息",
            CustomsStatus::CombinedInspection => "合并检查",
            CustomsStatus::Suspended => "挂起",
            CustomsStatus::Cancelled => "删单",
        }
    }

    pub fn stored_values(&self) -> [&'static str; 2] {
        [self.code(), self.label()]
    }

    /// Released and cancelled records drop off the tracking workbench
    pub fn closes_tracking(&self) -> bool {
        matches!(self, CustomsStatus::Released | CustomsStatus::Cancelled)
    }

    pub fn needs_inspection(&self) -> bool {
        CustomsStatus::INSPECTION.contains(self)
    }
}

impl fmt::Display for CustomsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CustomsStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        CustomsStatus::ALL
            .into_iter()
            .find(|status| status.code() == s || status.label() == s)
            .ok_or_else(|| anyhow!("Invalid customs status: {}", s))
    }
}

/// Optional enum stored as its code, with the empty string meaning "none".
pub(crate) mod optional_code {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Display,
    {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
        T::Err: Display,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => s.parse().map(Some).map_err(D::Error::custom),
        }
    }
}

/// File attached to a tracking record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Unique within the owning record; never reused while the record lives
    pub id: u32,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub upload_time: String,
    #[serde(default)]
    pub file_url: String,
    #[serde(default)]
    pub file_id: String,
}

/// A container shipment and its customs declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tracking {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    pub arrival_date: String,
    pub declare_date: String,
    pub pre_entry_no: String,
    pub bill_no: String,
    pub container_no: String,
    pub customs_no: String,
    pub eu_deposit: String,
    pub country: String,
    pub product_name: String,
    pub shipper: String,
    #[serde(with = "optional_code")]
    pub operation: Option<Operation>,
    #[serde(with = "optional_code")]
    pub customs_status: Option<CustomsStatus>,
    pub instruction: String,
    pub remark: String,

    // Customs declaration details
    pub domestic_consignee: String,
    pub consumption_unit: String,
    pub foreign_consignee: String,
    pub hs_code: String,
    pub supervision_category: String,
    pub specification: String,
    pub goods_value: String,
    pub currency: String,
    pub factory_no: String,
    pub shipper_record_no: String,
    pub package_count: String,
    pub net_weight: String,
    pub gross_weight: String,
    #[serde(rename = "certificate105")]
    pub certificate_105: String,
    #[serde(rename = "certificate325")]
    pub certificate_325: String,
    #[serde(rename = "certificate519")]
    pub certificate_519: String,
    #[serde(rename = "certificate113")]
    pub certificate_113: String,
    pub inspection_spec: String,
    pub production_date: String,

    pub attachments: Vec<Attachment>,
}

impl Record for Tracking {
    const CLASS_NAME: &'static str = TRACKING_CLASS;

    fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }
}

impl Tracking {
    /// Declared records make up the customs view
    pub fn is_declared(&self) -> bool {
        self.operation == Some(Operation::Declared)
    }

    pub fn is_released(&self) -> bool {
        self.customs_status == Some(CustomsStatus::Released)
    }

    /// Whether the record belongs on the tracking workbench
    pub fn is_open(&self) -> bool {
        !self
            .customs_status
            .map(|status| status.closes_tracking())
            .unwrap_or(false)
    }

    pub fn arrival(&self) -> Option<NaiveDate> {
        parse_date(&self.arrival_date)
    }

    pub fn declared_on(&self) -> Option<NaiveDate> {
        parse_date(&self.declare_date)
    }

    pub fn has_quarantine_certificate(&self) -> bool {
        self.attachments
            .iter()
            .any(|a| a.kind == QUARANTINE_CERTIFICATE && !a.file_url.is_empty())
    }

    /// Container number and arrival date are mandatory for every record
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.container_no.trim().is_empty() {
            missing.push("containerNo");
        }
        if self.arrival_date.trim().is_empty() {
            missing.push("arrivalDate");
        }
        missing
    }
}

/// Parse a stored `YYYY-MM-DD` date (a time suffix is ignored)
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
