//! Derived views over tracking data
//!
//! Every filter works two ways: `matches` for records already in memory and
//! `apply` to narrow a server-side [`Query`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use crate::models::{parse_date, CustomsStatus, Exporter, HsCode, Tracking};
use crate::query::Query;
use crate::services::attachment::{file_entries, FileEntry};
use crate::services::import::normalize_date;

/// Separators accepted between the two ends of a date range
const RANGE_SEPARATORS: [&str; 3] = [" to ", "至", " - "];

/// Inclusive day range typed into a date filter box.
///
/// Input that does not parse matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    Range { start: NaiveDate, end: NaiveDate },
    Invalid,
}

fn parse_day(input: &str) -> Option<NaiveDate> {
    parse_date(&normalize_date(input.trim()))
}

impl DateFilter {
    /// `None` for blank input
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let bounds = match RANGE_SEPARATORS
            .iter()
            .find_map(|sep| input.split_once(sep))
        {
            Some((start, end)) => parse_day(start).zip(parse_day(end)),
            None => parse_day(input).map(|day| (day, day)),
        };

        Some(match bounds {
            Some((start, end)) => DateFilter::Range { start, end },
            None => DateFilter::Invalid,
        })
    }

    pub fn on(day: NaiveDate) -> Self {
        DateFilter::Range {
            start: day,
            end: day,
        }
    }

    pub fn contains(&self, date: Option<NaiveDate>) -> bool {
        match (self, date) {
            (DateFilter::Range { start, end }, Some(date)) => *start <= date && date <= *end,
            _ => false,
        }
    }

    /// Stored dates are `YYYY-MM-DD`, optionally with a time, so string
    /// bounds cover whole days.
    pub fn apply(&self, query: Query, field: &str) -> Query {
        match self {
            DateFilter::Range { start, end } => query
                .greater_than_or_equal_to(field, start.format("%Y-%m-%d").to_string())
                .less_than_or_equal_to(field, format!("{} 23:59:59", end.format("%Y-%m-%d"))),
            // Contradictory pair, matches nothing
            DateFilter::Invalid => query.does_not_exist(field).exists(field),
        }
    }
}

/// Customs status filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Is(CustomsStatus),
    /// Everything except released, unset included
    NotReleased,
}

impl StatusFilter {
    pub fn matches(&self, status: Option<CustomsStatus>) -> bool {
        match self {
            StatusFilter::Is(expected) => status == Some(*expected),
            StatusFilter::NotReleased => status != Some(CustomsStatus::Released),
        }
    }

    pub fn apply(&self, query: Query) -> Query {
        match self {
            StatusFilter::Is(status) => query.contained_in("customsStatus", status.stored_values()),
            StatusFilter::NotReleased => {
                query.not_contained_in("customsStatus", CustomsStatus::Released.stored_values())
            }
        }
    }
}

impl FromStr for StatusFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "not_released" | "非放行" => Ok(StatusFilter::NotReleased),
            other => Ok(StatusFilter::Is(other.parse()?)),
        }
    }
}

fn contains_text(value: &str, needle: &str) -> bool {
    let needle = needle.trim();
    needle.is_empty() || value.contains(needle)
}

fn contains_clause(query: Query, field: &str, needle: &str) -> Query {
    let needle = needle.trim();
    if needle.is_empty() {
        query
    } else {
        query.contains(field, needle)
    }
}

/// Tracking workbench filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingFilter {
    pub bill_no: String,
    pub container_no: String,
    pub customs_status: Option<StatusFilter>,
    pub arrival_date: Option<DateFilter>,
    pub declare_date: Option<DateFilter>,
}

impl TrackingFilter {
    pub fn matches(&self, t: &Tracking) -> bool {
        contains_text(&t.bill_no, &self.bill_no)
            && contains_text(&t.container_no, &self.container_no)
            && self
                .customs_status
                .is_none_or(|filter| filter.matches(t.customs_status))
            && self.arrival_date.is_none_or(|f| f.contains(t.arrival()))
            && self.declare_date.is_none_or(|f| f.contains(t.declared_on()))
    }

    pub fn apply(&self, mut query: Query) -> Query {
        query = contains_clause(query, "billNo", &self.bill_no);
        query = contains_clause(query, "containerNo", &self.container_no);
        if let Some(status) = self.customs_status {
            query = status.apply(query);
        }
        if let Some(date) = self.arrival_date {
            query = date.apply(query, "arrivalDate");
        }
        if let Some(date) = self.declare_date {
            query = date.apply(query, "declareDate");
        }
        query
    }
}

/// Customs list filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomsFilter {
    pub bill_no: String,
    pub container_no: String,
    pub customs_no: String,
    pub arrival_date: Option<DateFilter>,
    pub declare_date: Option<DateFilter>,
}

impl CustomsFilter {
    pub fn matches(&self, t: &Tracking) -> bool {
        contains_text(&t.bill_no, &self.bill_no)
            && contains_text(&t.container_no, &self.container_no)
            && contains_text(&t.customs_no, &self.customs_no)
            && self.arrival_date.is_none_or(|f| f.contains(t.arrival()))
            && self.declare_date.is_none_or(|f| f.contains(t.declared_on()))
    }

    pub fn apply(&self, mut query: Query) -> Query {
        query = contains_clause(query, "billNo", &self.bill_no);
        query = contains_clause(query, "containerNo", &self.container_no);
        query = contains_clause(query, "customsNo", &self.customs_no);
        if let Some(date) = self.arrival_date {
            query = date.apply(query, "arrivalDate");
        }
        if let Some(date) = self.declare_date {
            query = date.apply(query, "declareDate");
        }
        query
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HsCodeFilter {
    pub hs_code: String,
    pub product_name: String,
}

impl HsCodeFilter {
    pub fn matches(&self, entry: &HsCode) -> bool {
        contains_text(&entry.hs_code, &self.hs_code)
            && contains_text(&entry.product_name, &self.product_name)
    }

    pub fn apply(&self, query: Query) -> Query {
        let query = contains_clause(query, "hsCode", &self.hs_code);
        contains_clause(query, "productName", &self.product_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExporterFilter {
    pub foreign_consignee: String,
    pub shipper_record_no: String,
}

impl ExporterFilter {
    pub fn matches(&self, entry: &Exporter) -> bool {
        contains_text(&entry.foreign_consignee, &self.foreign_consignee)
            && contains_text(&entry.shipper_record_no, &self.shipper_record_no)
    }

    pub fn apply(&self, query: Query) -> Query {
        let query = contains_clause(query, "foreignConsignee", &self.foreign_consignee);
        contains_clause(query, "shipperRecordNo", &self.shipper_record_no)
    }
}

/// Arrival date ascending; records without a usable date first
pub fn by_arrival(a: &Tracking, b: &Tracking) -> Ordering {
    a.arrival().cmp(&b.arrival())
}

/// Open records (not released or cancelled) matching `filter`
pub fn workbench(records: &[Tracking], filter: &TrackingFilter) -> Vec<Tracking> {
    let mut rows: Vec<Tracking> = records
        .iter()
        .filter(|t| t.is_open() && filter.matches(t))
        .cloned()
        .collect();
    rows.sort_by(by_arrival);
    rows
}

/// Declared records matching `filter`
pub fn customs(records: &[Tracking], filter: &CustomsFilter) -> Vec<Tracking> {
    let mut rows: Vec<Tracking> = records
        .iter()
        .filter(|t| t.is_declared() && filter.matches(t))
        .cloned()
        .collect();
    rows.sort_by(by_arrival);
    rows
}

/// Attachment count per object id
pub fn attachment_counts(records: &[Tracking]) -> HashMap<String, usize> {
    records
        .iter()
        .filter_map(|t| Some((t.object_id.clone()?, t.attachments.len())))
        .collect()
}

/// Every attachment of every record, newest upload first
pub fn files(records: &[Tracking]) -> Vec<FileEntry> {
    let mut entries: Vec<FileEntry> = records.iter().flat_map(file_entries).collect();
    entries.sort_by(|a, b| b.upload_time.cmp(&a.upload_time));
    entries
}
