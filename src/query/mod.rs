//! Typed object queries
//!
//! A [`Query`] is built with chainable, by-value methods and compiles two
//! ways: to the `{className, conditions, options, orQueries}` payload sent to
//! the store endpoint, and to SQL over the document table (see [`sql`]).
//! Conditions on one field accumulate, so a date range is two conditions on
//! the same field. When or-groups are present they replace the top-level
//! conditions.

pub mod sql;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::models::{Document, DocumentError, Record, CREATED_AT, OBJECT_ID, UPDATED_AT};
use crate::services::backend::{BackendError, ObjectBackend};

/// Page size used when a query sets no limit
pub const DEFAULT_LIMIT: u32 = 100;
/// Largest page a single query may request
pub const MAX_LIMIT: u32 = 1000;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,99}$").expect("valid identifier regex"));

/// Query construction and decoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid class name: {0:?}")]
    InvalidClassName(String),
    #[error("Invalid field name: {0:?}")]
    InvalidField(String),
    #[error("Unknown query operator: {0}")]
    UnknownOperator(String),
    #[error("Invalid value for {operator}: {message}")]
    InvalidValue { operator: String, message: String },
    #[error("Limit {0} exceeds the maximum of {MAX_LIMIT}")]
    LimitTooLarge(u32),
}

pub fn validate_class_name(name: &str) -> Result<(), QueryError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(QueryError::InvalidClassName(name.to_string()))
    }
}

pub fn validate_field_name(name: &str) -> Result<(), QueryError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(QueryError::InvalidField(name.to_string()))
    }
}

/// A predicate on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    EqualTo(Value),
    /// Case-sensitive substring match on text fields
    Contains(String),
    GreaterThanOrEqualTo(Value),
    LessThanOrEqualTo(Value),
    /// Also matches records where the field is absent
    NotEqualTo(Value),
    ContainedIn(Vec<Value>),
    /// Also matches records where the field is absent
    NotContainedIn(Vec<Value>),
    Exists,
    DoesNotExist,
}

impl Condition {
    pub fn operator(&self) -> &'static str {
        match self {
            Condition::EqualTo(_) => "equalTo",
            Condition::Contains(_) => "contains",
            Condition::GreaterThanOrEqualTo(_) => "greaterThanOrEqualTo",
            Condition::LessThanOrEqualTo(_) => "lessThanOrEqualTo",
            Condition::NotEqualTo(_) => "notEqualTo",
            Condition::ContainedIn(_) => "containedIn",
            Condition::NotContainedIn(_) => "notContainedIn",
            Condition::Exists => "exists",
            Condition::DoesNotExist => "doesNotExist",
        }
    }

    /// `{operator, value}`
    pub fn to_wire(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "operator".to_string(),
            Value::String(self.operator().to_string()),
        );
        let value = match self {
            Condition::EqualTo(v)
            | Condition::GreaterThanOrEqualTo(v)
            | Condition::LessThanOrEqualTo(v)
            | Condition::NotEqualTo(v) => Some(v.clone()),
            Condition::Contains(s) => Some(Value::String(s.clone())),
            Condition::ContainedIn(vs) | Condition::NotContainedIn(vs) => {
                Some(Value::Array(vs.clone()))
            }
            Condition::Exists | Condition::DoesNotExist => None,
        };
        if let Some(value) = value {
            map.insert("value".to_string(), value);
        }
        Value::Object(map)
    }

    /// Decode a `{operator, value}` object
    fn from_operator_object(map: &Map<String, Value>) -> Result<Self, QueryError> {
        let operator = map
            .get("operator")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let value = map.get("value").cloned().unwrap_or(Value::Null);
        let invalid = |message: &str| QueryError::InvalidValue {
            operator: operator.to_string(),
            message: message.to_string(),
        };

        Ok(match operator {
            "equalTo" => Condition::EqualTo(value),
            "contains" => match value {
                Value::String(s) => Condition::Contains(s),
                Value::Number(n) => Condition::Contains(n.to_string()),
                _ => return Err(invalid("expected a string")),
            },
            "greaterThanOrEqualTo" => Condition::GreaterThanOrEqualTo(value),
            "lessThanOrEqualTo" => Condition::LessThanOrEqualTo(value),
            "notEqualTo" => Condition::NotEqualTo(value),
            "containedIn" => match value {
                Value::Array(vs) => Condition::ContainedIn(vs),
                _ => return Err(invalid("expected an array")),
            },
            "notContainedIn" => match value {
                Value::Array(vs) => Condition::NotContainedIn(vs),
                _ => return Err(invalid("expected an array")),
            },
            "exists" => Condition::Exists,
            "doesNotExist" => Condition::DoesNotExist,
            other => return Err(QueryError::UnknownOperator(other.to_string())),
        })
    }

    /// Decode one entry of a conditions map: a literal (implicit equalTo),
    /// an operator object, or an array of operator objects.
    pub fn from_wire(value: &Value) -> Result<Vec<Self>, QueryError> {
        match value {
            Value::Object(map) if map.contains_key("operator") => {
                Ok(vec![Self::from_operator_object(map)?])
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(is_operator_object) => {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(Self::from_operator_object)
                    .collect()
            }
            literal => Ok(vec![Condition::EqualTo(literal.clone())]),
        }
    }

    /// Evaluate against a field value (`None` when the field is absent)
    pub fn matches(&self, field: Option<&Value>) -> bool {
        let present = field.filter(|v| !v.is_null());
        match self {
            Condition::EqualTo(Value::Null) => present.is_none(),
            Condition::EqualTo(expected) => present.is_some_and(|v| values_equal(v, expected)),
            Condition::NotEqualTo(Value::Null) => present.is_some(),
            Condition::NotEqualTo(expected) => !present.is_some_and(|v| values_equal(v, expected)),
            Condition::Contains(needle) => present
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            Condition::GreaterThanOrEqualTo(bound) => present
                .and_then(|v| compare_same_type(v, bound))
                .is_some_and(|o| o != Ordering::Less),
            Condition::LessThanOrEqualTo(bound) => present
                .and_then(|v| compare_same_type(v, bound))
                .is_some_and(|o| o != Ordering::Greater),
            Condition::ContainedIn(options) => {
                present.is_some_and(|v| options.iter().any(|o| values_equal(v, o)))
            }
            Condition::NotContainedIn(options) => {
                !present.is_some_and(|v| options.iter().any(|o| values_equal(v, o)))
            }
            Condition::Exists => field.is_some(),
            Condition::DoesNotExist => field.is_none(),
        }
    }
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.contains_key("operator"))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for in-memory sorting: absent/null, numbers, text, other.
fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_same_type(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A condition bound to a field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub condition: Condition,
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Query options on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ascending: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descending: Option<String>,
    /// Multi-key order, comma separated, `-` prefix for descending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

/// `query` action payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    pub class_name: String,
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default)]
    pub options: QueryOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or_queries: Vec<Map<String, Value>>,
}

/// `count` action payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountPayload {
    pub class_name: String,
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or_queries: Vec<Map<String, Value>>,
}

/// A query over one record class.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    class_name: String,
    conditions: Vec<FieldCondition>,
    or_groups: Vec<Vec<FieldCondition>>,
    limit: Option<u32>,
    skip: u32,
    order: Vec<SortKey>,
    select: Vec<String>,
    include: Vec<String>,
}

impl Query {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            conditions: Vec::new(),
            or_groups: Vec::new(),
            limit: None,
            skip: 0,
            order: Vec::new(),
            select: Vec::new(),
            include: Vec::new(),
        }
    }

    /// Query over the class of record type `T`
    pub fn of<T: Record>() -> Self {
        Self::new(T::CLASS_NAME)
    }

    fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.conditions.push(FieldCondition {
            field: field.into(),
            condition,
        });
        self
    }

    pub fn equal_to(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::EqualTo(value.into()))
    }

    pub fn contains(self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.with(field, Condition::Contains(needle.into()))
    }

    pub fn greater_than_or_equal_to(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::GreaterThanOrEqualTo(value.into()))
    }

    pub fn less_than_or_equal_to(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::LessThanOrEqualTo(value.into()))
    }

    pub fn not_equal_to(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::NotEqualTo(value.into()))
    }

    pub fn contained_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.with(field, Condition::ContainedIn(values))
    }

    pub fn not_contained_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.with(field, Condition::NotContainedIn(values))
    }

    pub fn exists(self, field: impl Into<String>) -> Self {
        self.with(field, Condition::Exists)
    }

    pub fn does_not_exist(self, field: impl Into<String>) -> Self {
        self.with(field, Condition::DoesNotExist)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u32) -> Self {
        self.skip = skip;
        self
    }

    /// Replace the sort order with one ascending key
    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.order = vec![SortKey {
            field: field.into(),
            descending: false,
        }];
        self
    }

    /// Replace the sort order with one descending key
    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.order = vec![SortKey {
            field: field.into(),
            descending: true,
        }];
        self
    }

    /// Append a descending tie-break key to the current order
    pub fn add_descending(mut self, field: impl Into<String>) -> Self {
        self.order.push(SortKey {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Accepted for compatibility; embedded values are always returned whole.
    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Match records satisfying any of `queries`' condition sets.
    pub fn or<I>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = Query>,
    {
        self.or_groups
            .extend(queries.into_iter().map(|q| q.conditions));
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn conditions(&self) -> &[FieldCondition] {
        &self.conditions
    }

    pub fn or_groups(&self) -> &[Vec<FieldCondition>] {
        &self.or_groups
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.order
    }

    pub fn selected(&self) -> &[String] {
        &self.select
    }

    pub fn skip_count(&self) -> u32 {
        self.skip
    }

    /// Effective page size
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// Check names and limits before the query reaches storage
    pub fn validate(&self) -> Result<(), QueryError> {
        validate_class_name(&self.class_name)?;
        let fields = self
            .conditions
            .iter()
            .chain(self.or_groups.iter().flatten())
            .map(|c| c.field.as_str())
            .chain(self.order.iter().map(|k| k.field.as_str()))
            .chain(self.select.iter().map(String::as_str));
        for field in fields {
            validate_field_name(field)?;
        }
        if let Some(limit) = self.limit {
            if limit > MAX_LIMIT {
                return Err(QueryError::LimitTooLarge(limit));
            }
        }
        Ok(())
    }

    /// The conditions that apply: the or-groups when present, otherwise
    /// the top-level conditions as a single group.
    pub fn effective_groups(&self) -> Vec<&[FieldCondition]> {
        if self.or_groups.is_empty() {
            vec![self.conditions.as_slice()]
        } else {
            self.or_groups.iter().map(Vec::as_slice).collect()
        }
    }

    /// Evaluate the filter part of the query against a document
    pub fn matches(&self, doc: &Document) -> bool {
        if doc.class_name != self.class_name {
            return false;
        }
        self.effective_groups().into_iter().any(|group| {
            group
                .iter()
                .all(|fc| fc.condition.matches(field_value(doc, &fc.field).as_ref()))
        })
    }

    /// Filter, sort and page `docs` in memory with the same rules as SQL
    pub fn apply(&self, docs: &[Document]) -> Vec<Document> {
        let mut matched: Vec<&Document> = docs.iter().filter(|d| self.matches(d)).collect();
        matched.sort_by(|a, b| {
            for key in &self.order {
                let ordering = compare_for_sort(
                    field_value(a, &key.field).as_ref(),
                    field_value(b, &key.field).as_ref(),
                );
                let ordering = if key.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        matched
            .into_iter()
            .skip(self.skip as usize)
            .take(self.effective_limit() as usize)
            .cloned()
            .collect()
    }

    pub fn to_payload(&self) -> QueryPayload {
        let mut options = QueryOptions {
            limit: self.limit,
            skip: (self.skip > 0).then_some(self.skip),
            select: self.select.clone(),
            include: self.include.clone(),
            ..QueryOptions::default()
        };
        match self.order.as_slice() {
            [] => {}
            [key] if key.descending => options.descending = Some(key.field.clone()),
            [key] => options.ascending = Some(key.field.clone()),
            keys => {
                options.order = Some(
                    keys.iter()
                        .map(|k| {
                            if k.descending {
                                format!("-{}", k.field)
                            } else {
                                k.field.clone()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(","),
                )
            }
        }

        QueryPayload {
            class_name: self.class_name.clone(),
            conditions: encode_conditions(&self.conditions),
            options,
            or_queries: self.or_groups.iter().map(|g| encode_conditions(g)).collect(),
        }
    }

    pub fn to_count_payload(&self) -> CountPayload {
        CountPayload {
            class_name: self.class_name.clone(),
            conditions: encode_conditions(&self.conditions),
            or_queries: self.or_groups.iter().map(|g| encode_conditions(g)).collect(),
        }
    }

    pub fn from_payload(payload: QueryPayload) -> Result<Self, QueryError> {
        let QueryPayload {
            class_name,
            conditions,
            options,
            or_queries,
        } = payload;

        let mut query = Query::new(class_name);
        query.conditions = decode_conditions(&conditions)?;
        query.or_groups = or_queries
            .iter()
            .map(decode_conditions)
            .collect::<Result<_, _>>()?;
        query.limit = options.limit;
        query.skip = options.skip.unwrap_or(0);
        query.select = options.select;
        query.include = options.include;

        // An explicit multi-key order wins; otherwise descending overrides
        // ascending, as the hosted store did.
        if let Some(order) = options.order.filter(|o| !o.trim().is_empty()) {
            query.order = order
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| match k.strip_prefix('-') {
                    Some(field) => SortKey {
                        field: field.to_string(),
                        descending: true,
                    },
                    None => SortKey {
                        field: k.to_string(),
                        descending: false,
                    },
                })
                .collect();
        } else if let Some(field) = options.descending {
            query = query.descending(field);
        } else if let Some(field) = options.ascending {
            query = query.ascending(field);
        }

        query.validate()?;
        Ok(query)
    }

    pub fn from_count_payload(payload: CountPayload) -> Result<Self, QueryError> {
        Self::from_payload(QueryPayload {
            class_name: payload.class_name,
            conditions: payload.conditions,
            options: QueryOptions::default(),
            or_queries: payload.or_queries,
        })
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    pub async fn find(&self, backend: &dyn ObjectBackend) -> Result<Vec<Document>, BackendError> {
        backend.find(self).await
    }

    pub async fn first(&self, backend: &dyn ObjectBackend) -> Result<Option<Document>, BackendError> {
        let query = self.clone().limit(1);
        Ok(backend.find(&query).await?.into_iter().next())
    }

    pub async fn count(&self, backend: &dyn ObjectBackend) -> Result<u64, BackendError> {
        backend.count(self).await
    }

    /// Fetch every match, paging `page_size` at a time from this query's skip
    pub async fn find_all(
        &self,
        backend: &dyn ObjectBackend,
        page_size: u32,
    ) -> Result<Vec<Document>, BackendError> {
        let page_size = page_size.clamp(1, MAX_LIMIT);
        let mut all = Vec::new();
        let mut skip = self.skip;
        loop {
            let page = backend
                .find(&self.clone().skip(skip).limit(page_size))
                .await?;
            let fetched = page.len();
            all.extend(page);
            if fetched < page_size as usize {
                break;
            }
            skip += page_size;
        }
        Ok(all)
    }

    /// Typed variant of [`Query::find`]
    pub async fn find_as<T: Record>(&self, backend: &dyn ObjectBackend) -> Result<Vec<T>, BackendError> {
        decode_all(self.find(backend).await?)
    }

    /// Typed variant of [`Query::find_all`]
    pub async fn find_all_as<T: Record>(
        &self,
        backend: &dyn ObjectBackend,
        page_size: u32,
    ) -> Result<Vec<T>, BackendError> {
        decode_all(self.find_all(backend, page_size).await?)
    }

    /// Like [`Query::find_all_as`], but a document that does not decode as
    /// `T` is set aside instead of failing the whole fetch
    pub async fn find_all_decoded<T: Record>(
        &self,
        backend: &dyn ObjectBackend,
        page_size: u32,
    ) -> Result<Decoded<T>, BackendError> {
        Ok(Decoded::from_documents(self.find_all(backend, page_size).await?))
    }
}

fn decode_all<T: Record>(docs: Vec<Document>) -> Result<Vec<T>, BackendError> {
    docs.iter()
        .map(|d| d.decode::<T>().map_err(BackendError::from))
        .collect()
}

/// Documents decoded one by one
#[derive(Debug)]
pub struct Decoded<T> {
    pub records: Vec<T>,
    /// objectId and decode error of every document that was set aside
    pub failed: Vec<(String, DocumentError)>,
}

impl<T: Record> Decoded<T> {
    pub fn from_documents(docs: Vec<Document>) -> Self {
        let mut records = Vec::with_capacity(docs.len());
        let mut failed = Vec::new();
        for doc in docs {
            match doc.decode::<T>() {
                Ok(record) => records.push(record),
                Err(e) => failed.push((doc.object_id, e)),
            }
        }
        Self { records, failed }
    }

    /// Log every set-aside document and keep the records
    pub fn warn_failed(self) -> Vec<T> {
        for (object_id, e) in &self.failed {
            tracing::warn!("Skipping {} {}: {}", T::CLASS_NAME, object_id, e);
        }
        self.records
    }
}

/// Value of a field, including the bookkeeping keys
fn field_value(doc: &Document, field: &str) -> Option<Value> {
    match field {
        OBJECT_ID => Some(Value::String(doc.object_id.clone())),
        CREATED_AT => Some(Value::String(crate::models::wire_timestamp(doc.created_at))),
        UPDATED_AT => Some(Value::String(crate::models::wire_timestamp(doc.updated_at))),
        _ => doc.get(field).cloned(),
    }
}

fn encode_conditions(conditions: &[FieldCondition]) -> Map<String, Value> {
    let mut map: Map<String, Value> = Map::new();
    for fc in conditions {
        let encoded = fc.condition.to_wire();
        match map.get_mut(&fc.field) {
            None => {
                map.insert(fc.field.clone(), encoded);
            }
            Some(Value::Array(list)) => list.push(encoded),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, encoded]);
            }
        }
    }
    map
}

fn decode_conditions(map: &Map<String, Value>) -> Result<Vec<FieldCondition>, QueryError> {
    let mut conditions = Vec::new();
    for (field, value) in map {
        validate_field_name(field)?;
        for condition in Condition::from_wire(value)? {
            conditions.push(FieldCondition {
                field: field.clone(),
                condition,
            });
        }
    }
    Ok(conditions)
}
