//! Compile queries to SQLite
//!
//! Documents live in one `objects` table with the fields in a JSON `data`
//! column. Field names are validated identifiers, so JSON paths are inlined
//! as literals; that keeps `json_extract(data, '$.containerNo')` identical to
//! the indexed expression. Values are always bound.

use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};

use super::{Condition, FieldCondition, Query, QueryError};
use crate::models::{CREATED_AT, OBJECT_ID, UPDATED_AT};

const SELECT_COLUMNS: &str =
    "SELECT object_id, class_name, data, created_at, updated_at FROM objects WHERE class_name = ";

/// Column for bookkeeping fields, `None` for document fields
fn column_for(field: &str) -> Option<&'static str> {
    match field {
        OBJECT_ID => Some("object_id"),
        CREATED_AT => Some("created_at"),
        UPDATED_AT => Some("updated_at"),
        _ => None,
    }
}

fn field_expr(field: &str) -> String {
    match column_for(field) {
        Some(column) => column.to_string(),
        None => format!("json_extract(data, '$.{}')", field),
    }
}

fn push_value(builder: &mut QueryBuilder<'static, Sqlite>, value: &Value) {
    match value {
        Value::Null => {
            builder.push("NULL");
        }
        Value::Bool(b) => {
            builder.push_bind(*b);
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else {
                builder.push_bind(n.as_f64().unwrap_or_default());
            }
        }
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        Value::Array(_) | Value::Object(_) => {
            builder.push("json(");
            builder.push_bind(value.to_string());
            builder.push(")");
        }
    }
}

fn push_list(builder: &mut QueryBuilder<'static, Sqlite>, values: &[Value]) {
    builder.push("(");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        push_value(builder, value);
    }
    builder.push(")");
}

fn push_condition(builder: &mut QueryBuilder<'static, Sqlite>, fc: &FieldCondition) {
    let expr = field_expr(&fc.field);
    match &fc.condition {
        Condition::EqualTo(Value::Null) => {
            builder.push(format!("{} IS NULL", expr));
        }
        Condition::EqualTo(value) => {
            builder.push(format!("{} = ", expr));
            push_value(builder, value);
        }
        Condition::NotEqualTo(Value::Null) => {
            builder.push(format!("{} IS NOT NULL", expr));
        }
        Condition::NotEqualTo(value) => {
            builder.push(format!("({} IS NULL OR {} <> ", expr, expr));
            push_value(builder, value);
            builder.push(")");
        }
        Condition::Contains(needle) => {
            builder.push(format!("(typeof({}) = 'text' AND instr({}, ", expr, expr));
            builder.push_bind(needle.clone());
            builder.push(") > 0)");
        }
        Condition::GreaterThanOrEqualTo(value) => {
            builder.push(format!("{} >= ", expr));
            push_value(builder, value);
        }
        Condition::LessThanOrEqualTo(value) => {
            builder.push(format!("{} <= ", expr));
            push_value(builder, value);
        }
        Condition::ContainedIn(values) if values.is_empty() => {
            builder.push("0");
        }
        Condition::ContainedIn(values) => {
            builder.push(format!("{} IN ", expr));
            push_list(builder, values);
        }
        Condition::NotContainedIn(values) if values.is_empty() => {
            builder.push("1");
        }
        Condition::NotContainedIn(values) => {
            builder.push(format!("({} IS NULL OR {} NOT IN ", expr, expr));
            push_list(builder, values);
            builder.push(")");
        }
        Condition::Exists => match column_for(&fc.field) {
            Some(_) => {
                builder.push("1");
            }
            None => {
                builder.push(format!("json_type(data, '$.{}') IS NOT NULL", fc.field));
            }
        },
        Condition::DoesNotExist => match column_for(&fc.field) {
            Some(_) => {
                builder.push("0");
            }
            None => {
                builder.push(format!("json_type(data, '$.{}') IS NULL", fc.field));
            }
        },
    }
}

fn push_group(builder: &mut QueryBuilder<'static, Sqlite>, group: &[FieldCondition]) {
    if group.is_empty() {
        builder.push("1");
        return;
    }
    for (i, fc) in group.iter().enumerate() {
        if i > 0 {
            builder.push(" AND ");
        }
        push_condition(builder, fc);
    }
}

fn push_where(builder: &mut QueryBuilder<'static, Sqlite>, query: &Query) {
    builder.push_bind(query.class_name().to_string());
    let groups = query.effective_groups();
    if groups.len() == 1 && groups[0].is_empty() {
        return;
    }
    builder.push(" AND (");
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push("(");
        push_group(builder, group);
        builder.push(")");
    }
    builder.push(")");
}

/// `SELECT` with ordering and paging applied
pub fn select(query: &Query) -> Result<QueryBuilder<'static, Sqlite>, QueryError> {
    query.validate()?;
    let mut builder = QueryBuilder::new(SELECT_COLUMNS);
    push_where(&mut builder, query);

    builder.push(" ORDER BY ");
    for key in query.sort_keys() {
        builder.push(format!(
            "{} {}, ",
            field_expr(&key.field),
            if key.descending { "DESC" } else { "ASC" }
        ));
    }
    // Insertion order breaks ties so paging is stable
    builder.push("id ASC LIMIT ");
    builder.push_bind(i64::from(query.effective_limit()));
    builder.push(" OFFSET ");
    builder.push_bind(i64::from(query.skip_count()));
    Ok(builder)
}

/// `SELECT COUNT(*)` ignoring ordering and paging
pub fn count(query: &Query) -> Result<QueryBuilder<'static, Sqlite>, QueryError> {
    query.validate()?;
    let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM objects WHERE class_name = ");
    push_where(&mut builder, query);
    Ok(builder)
}
