//! Column type inference (§4.G "Type inference").

use crate::db::Value;

/// Column types the ingestion pipeline can infer and store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Integer,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Text,
}

impl InferredType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "bigint",
            Self::Numeric => "double precision",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamptz",
            Self::Text => "text",
        }
    }
}

/// Max cells sampled per column (§4.G "sample up to N cells, default 500").
pub const SAMPLE_LIMIT: usize = 500;
/// Minimum parser success rate to accept a type (§4.G, default 0.9).
pub const ACCEPT_THRESHOLD: f64 = 0.9;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%m-%d-%Y"];

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

fn cell_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_display_string()),
    }
}

fn strip_numeric_formatting(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace() && *c != ',').collect()
}

fn try_integer(s: &str) -> bool {
    let t = strip_numeric_formatting(s);
    !t.is_empty() && t.parse::<i64>().is_ok()
}

fn try_numeric(s: &str) -> bool {
    let t = strip_numeric_formatting(s);
    !t.is_empty() && t.parse::<f64>().is_ok()
}

fn try_boolean(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "y" | "n" | "1" | "0"
    )
}

fn try_date(s: &str) -> bool {
    let t = s.trim();
    DATE_FORMATS.iter().any(|f| chrono::NaiveDate::parse_from_str(t, f).is_ok())
}

fn try_timestamp(s: &str) -> bool {
    let t = s.trim();
    if chrono::DateTime::parse_from_rfc3339(t).is_ok() {
        return true;
    }
    TIMESTAMP_FORMATS.iter().any(|f| chrono::NaiveDateTime::parse_from_str(t, f).is_ok())
}

fn success_rate(samples: &[String], parser: impl Fn(&str) -> bool) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().filter(|s| parser(s)).count() as f64 / samples.len() as f64
}

/// Infers one column's type by trying parsers in the fixed order
/// `integer → numeric → boolean → date → timestamp → text`, accepting the
/// first whose success rate clears `ACCEPT_THRESHOLD` (§4.G).
pub fn infer_column_type(values: &[&Value]) -> InferredType {
    let samples: Vec<String> = values.iter().filter_map(|v| cell_text(v)).take(SAMPLE_LIMIT).collect();
    if samples.is_empty() {
        return InferredType::Text;
    }

    if success_rate(&samples, try_integer) >= ACCEPT_THRESHOLD {
        return InferredType::Integer;
    }
    if success_rate(&samples, try_numeric) >= ACCEPT_THRESHOLD {
        return InferredType::Numeric;
    }
    if success_rate(&samples, try_boolean) >= ACCEPT_THRESHOLD {
        return InferredType::Boolean;
    }
    if success_rate(&samples, try_date) >= ACCEPT_THRESHOLD {
        return InferredType::Date;
    }
    if success_rate(&samples, try_timestamp) >= ACCEPT_THRESHOLD {
        return InferredType::Timestamp;
    }
    InferredType::Text
}

pub fn infer_column_types(rows: &[Vec<Value>], col_count: usize) -> Vec<InferredType> {
    (0..col_count)
        .map(|c| {
            let values: Vec<&Value> = rows.iter().filter_map(|r| r.get(c)).collect();
            infer_column_type(&values)
        })
        .collect()
}

/// Converts one raw cell to its inferred type for storage. Returns `None`
/// on a conversion failure (caller stores `NULL` and logs a warning rather
/// than dropping the row, §4.G "Storage").
pub fn convert_cell(value: &Value, ty: InferredType) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    let text = cell_text(value)?;
    match ty {
        InferredType::Text => Some(Value::String(text)),
        InferredType::Integer => strip_numeric_formatting(&text).parse::<i64>().ok().map(Value::Int),
        InferredType::Numeric => strip_numeric_formatting(&text).parse::<f64>().ok().map(Value::Float),
        InferredType::Boolean => match text.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "n" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        InferredType::Date | InferredType::Timestamp => {
            if try_date(&text) || try_timestamp(&text) {
                Some(Value::String(text))
            } else {
                None
            }
        }
    }
}
