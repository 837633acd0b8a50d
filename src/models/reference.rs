//! Reference tables rebuilt from tracking records

use serde::{Deserialize, Serialize};

use super::object::Record;

pub const HS_CODE_CLASS: &str = "HS_Code_Base";
pub const EXPORTER_CLASS: &str = "Exporter_Base";

/// Commodity code entry, keyed by (hs_code, product_name).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HsCode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub hs_code: String,
    pub product_name: String,
    pub supervision_category: String,
    pub specification: String,
}

impl Record for HsCode {
    const CLASS_NAME: &'static str = HS_CODE_CLASS;

    fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }
}

/// Foreign exporter entry, keyed by (foreign_consignee, shipper_record_no).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Exporter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub foreign_consignee: String,
    pub shipper_record_no: String,
    pub customs_no: String,
}

impl Record for Exporter {
    const CLASS_NAME: &'static str = EXPORTER_CLASS;

    fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }
}
