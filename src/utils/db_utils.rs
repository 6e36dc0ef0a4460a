use chrono::NaiveDate;
use serde_json::Value;
use sqlx::{Executor, MySql};

use crate::error::{ApiError, ApiResult};

/// Bindable value for a dynamically built statement.
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    Date(NaiveDate),
    Null,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Non-empty string
    Text,
    /// String or null; blank strings are stored as null
    OptionalText,
    /// Unsigned id or null
    OptionalId,
    /// `YYYY-MM-DD`
    Date,
    /// One of a fixed set of lowercase strings
    OneOf(&'static [&'static str]),
}

/// A column a caller may change, and the shape its JSON value must have.
#[derive(Debug, Clone, Copy)]
pub struct UpdateField {
    pub column: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Builds `UPDATE table SET ... WHERE id_column = ?` from a JSON object.
///
/// Only columns listed in `allowed` can appear in the statement.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[UpdateField],
    id_column: &str,
    id_value: u64,
) -> ApiResult<SqlUpdate> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ApiError::bad_request("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let mut assignments = Vec::with_capacity(obj.len());
    let mut values = Vec::with_capacity(obj.len() + 1);

    for (key, value) in obj {
        let field = allowed
            .iter()
            .find(|f| f.column == key)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown or read-only field: {key}")))?;

        values.push(convert(field, value)?);
        assignments.push(format!("{} = ?", field.column));
    }

    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate {
        sql: format!(
            "UPDATE {} SET {} WHERE {} = ?",
            table,
            assignments.join(", "),
            id_column
        ),
        values,
    })
}

fn convert(field: &UpdateField, value: &Value) -> ApiResult<SqlValue> {
    let column = field.column;
    let invalid = |what: &str| ApiError::bad_request(format!("Field {column} must be {what}"));

    match (field.kind, value) {
        (FieldKind::Text, Value::String(s)) if !s.trim().is_empty() => {
            Ok(SqlValue::String(s.trim().to_string()))
        }
        (FieldKind::Text, _) => Err(invalid("a non-empty string")),

        (FieldKind::OptionalText, Value::Null) => Ok(SqlValue::Null),
        (FieldKind::OptionalText, Value::String(s)) if s.trim().is_empty() => Ok(SqlValue::Null),
        (FieldKind::OptionalText, Value::String(s)) => Ok(SqlValue::String(s.trim().to_string())),
        (FieldKind::OptionalText, _) => Err(invalid("a string or null")),

        (FieldKind::OptionalId, Value::Null) => Ok(SqlValue::Null),
        (FieldKind::OptionalId, Value::Number(n)) => {
            n.as_u64().map(SqlValue::U64).ok_or_else(|| invalid("a positive integer or null"))
        }
        (FieldKind::OptionalId, _) => Err(invalid("a positive integer or null")),

        (FieldKind::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(SqlValue::Date)
            .map_err(|_| invalid("a date formatted YYYY-MM-DD")),
        (FieldKind::Date, _) => Err(invalid("a date formatted YYYY-MM-DD")),

        (FieldKind::OneOf(options), Value::String(s)) => {
            let lowered = s.trim().to_ascii_lowercase();
            if options.contains(&lowered.as_str()) {
                Ok(SqlValue::String(lowered))
            } else {
                Err(invalid(&format!("one of: {}", options.join(", "))))
            }
        }
        (FieldKind::OneOf(options), _) => Err(invalid(&format!("one of: {}", options.join(", ")))),
    }
}

/// Runs the statement and returns the affected row count.
pub async fn execute_update<'e, E>(executor: E, update: SqlUpdate) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = MySql>,
{
    let SqlUpdate { sql, values } = update;
    let mut query = sqlx::query(&sql);

    for value in values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(executor).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: &[UpdateField] = &[
        UpdateField { column: "first_name", kind: FieldKind::Text },
        UpdateField { column: "phone", kind: FieldKind::OptionalText },
        UpdateField { column: "department_id", kind: FieldKind::OptionalId },
        UpdateField { column: "joining_date", kind: FieldKind::Date },
        UpdateField { column: "status", kind: FieldKind::OneOf(&["active", "inactive"]) },
    ];

    fn message(err: ApiError) -> String {
        match err {
            ApiError::BadRequest(m) => m,
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn builds_statement_for_allowed_columns() {
        let payload = json!({
            "first_name": "  Jane ",
            "status": "Inactive",
            "department_id": 4,
            "joining_date": "2025-02-03",
            "phone": null
        });
        let update = build_update_sql("employees", &payload, FIELDS, "id", 9).unwrap();

        // serde_json maps iterate in key order
        assert_eq!(
            update.sql,
            "UPDATE employees SET department_id = ?, first_name = ?, joining_date = ?, phone = ?, status = ? WHERE id = ?"
        );
        assert_eq!(
            update.values,
            vec![
                SqlValue::U64(4),
                SqlValue::String("Jane".to_string()),
                SqlValue::Date(NaiveDate::from_ymd_opt(2025, 2, 3).unwrap()),
                SqlValue::Null,
                SqlValue::String("inactive".to_string()),
                SqlValue::U64(9),
            ]
        );
    }

    #[test]
    fn unknown_columns_never_reach_sql() {
        let payload = json!({ "id = 1; DROP TABLE employees; --": "x" });
        let msg = message(build_update_sql("employees", &payload, FIELDS, "id", 1).unwrap_err());
        assert!(msg.starts_with("Unknown or read-only field"));
    }

    #[test]
    fn rejects_wrong_shapes() {
        let cases = [
            json!({ "first_name": "" }),
            json!({ "first_name": 5 }),
            json!({ "department_id": -1 }),
            json!({ "department_id": "4" }),
            json!({ "joining_date": "03/02/2025" }),
            json!({ "status": "retired" }),
            json!({ "phone": [] }),
        ];
        for payload in cases {
            assert!(
                build_update_sql("employees", &payload, FIELDS, "id", 1).is_err(),
                "accepted {payload}"
            );
        }
    }

    #[test]
    fn blank_optional_text_becomes_null() {
        let update =
            build_update_sql("employees", &json!({ "phone": "   " }), FIELDS, "id", 1).unwrap();
        assert_eq!(update.values[0], SqlValue::Null);
    }

    #[test]
    fn empty_or_non_object_payload() {
        assert!(message(build_update_sql("employees", &json!({}), FIELDS, "id", 1).unwrap_err())
            .contains("No fields"));
        assert!(message(build_update_sql("employees", &json!([1]), FIELDS, "id", 1).unwrap_err())
            .contains("JSON object"));
    }
}
