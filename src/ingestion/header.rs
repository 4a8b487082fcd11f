//! Header strategy (§4.G "Header strategy", "Pivot/matrix/semi-structured").

use std::collections::HashSet;

use crate::db::Value;

use super::region::is_empty_cell;

/// Header vocabulary used by the fourth scorer (§4.G "row matching a
/// built-in header vocabulary").
const HEADER_VOCAB: &[&str] = &[
    "id", "name", "email", "phone", "date", "address", "price", "quantity", "total", "status",
    "type", "description", "created", "updated", "code", "number", "amount", "category",
    "username", "title", "value", "key", "city", "state", "zip", "country", "url", "notes",
];

/// Best score threshold below which generated `column_N` headers are used
/// instead (§4.G).
pub const MIN_HEADER_SCORE: f64 = 0.3;

/// Scans up to the first five rows with four independent scorers and takes
/// the argmax, ties broken toward the earliest row (§4.G). Returns the
/// winning row's index alongside the headers so the caller can exclude it
/// from the data rows; the index is meaningless when headers were
/// generated (`column_N`), since no source row was consumed.
pub fn infer_headers(rows: &[Vec<Value>]) -> (usize, Vec<String>) {
    let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if rows.is_empty() || col_count == 0 {
        return (0, Vec::new());
    }

    let scan_limit = rows.len().min(5);
    let first_non_empty = rows
        .iter()
        .position(|r| r.iter().any(|c| !is_empty_cell(c)))
        .unwrap_or(0);

    let mut best_idx = 0usize;
    let mut best_score = f64::MIN;
    for (idx, row) in rows.iter().take(scan_limit).enumerate() {
        let score = score_row(row, idx == first_non_empty);
        if score > best_score {
            best_score = score;
            best_idx = idx;
        }
    }

    let headers = if best_score < MIN_HEADER_SCORE {
        generated_headers(col_count)
    } else {
        rows[best_idx]
            .iter()
            .enumerate()
            .map(|(i, c)| match cell_text(c) {
                Some(text) => sanitize_ident(&text),
                None => format!("column_{}", i + 1),
            })
            .collect()
    };

    (best_idx, dedup_headers(headers))
}

fn score_row(row: &[Value], is_first_non_empty: bool) -> f64 {
    let total = row.len().max(1) as f64;
    let s1 = if is_first_non_empty { 1.0 } else { 0.0 };

    let text_count = row.iter().filter(|c| is_text_typed(c)).count();
    let s2 = text_count as f64 / total;

    let unique: HashSet<String> = row.iter().map(value_key).collect();
    let s3 = unique.len() as f64 / total;

    let vocab_hits = row
        .iter()
        .filter(|c| {
            cell_text(c)
                .map(|text| {
                    let lower = text.to_lowercase();
                    HEADER_VOCAB.iter().any(|v| lower.contains(v))
                })
                .unwrap_or(false)
        })
        .count();
    let s4 = vocab_hits as f64 / total;

    (s1 + s2 + s3 + s4) / 4.0
}

fn value_key(v: &Value) -> String {
    v.to_display_string().trim().to_lowercase()
}

fn cell_text(v: &Value) -> Option<String> {
    if is_empty_cell(v) {
        None
    } else {
        Some(v.to_display_string())
    }
}

/// Non-empty and not parseable as a number (the scorer's "text-typed").
fn is_text_typed(v: &Value) -> bool {
    match cell_text(v) {
        None => false,
        Some(text) => {
            let stripped: String = text.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
            stripped.parse::<f64>().is_err()
        }
    }
}

pub fn generated_headers(col_count: usize) -> Vec<String> {
    (1..=col_count).map(|n| format!("column_{n}")).collect()
}

/// Pivot layout flattens to `{row_label, col1, col2, ...}` (§4.G).
pub fn pivot_headers(col_count: usize) -> Vec<String> {
    let mut headers = vec!["row_label".to_string()];
    headers.extend((1..col_count).map(|n| format!("col{n}")));
    headers
}

/// Matrix layout emits `col_1..col_N` (§4.G).
pub fn matrix_headers(col_count: usize) -> Vec<String> {
    (1..=col_count).map(|n| format!("col_{n}")).collect()
}

pub fn key_value_headers() -> Vec<String> {
    vec!["key".to_string(), "value".to_string()]
}

pub fn list_headers() -> Vec<String> {
    vec!["item".to_string()]
}

/// Totally unstructured fallback: one row per source cell (§4.G).
pub fn triple_headers() -> Vec<String> {
    vec!["row_num".to_string(), "col_letter".to_string(), "value".to_string()]
}

pub fn column_letter(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (idx % 26) as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Lowercases, replaces non-alphanumerics with `_`, collapses repeats,
/// forces a leading letter, and caps length at 50 (§4.G "Storage").
pub fn sanitize_ident(name: &str) -> String {
    let mut collapsed = String::new();
    let mut prev_underscore = false;
    for ch in name.chars() {
        let mapped = if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        collapsed.push(mapped);
    }
    let trimmed = collapsed.trim_matches('_');
    let mut result = if trimmed.is_empty() {
        "col".to_string()
    } else if trimmed.chars().next().unwrap().is_ascii_alphabetic() {
        trimmed.to_string()
    } else {
        format!("col_{trimmed}")
    };
    result.truncate(50);
    let result = result.trim_end_matches('_');
    if result.is_empty() { "col".to_string() } else { result.to_string() }
}

/// Disambiguates repeated header names with `_2, _3, ...` (§4.G).
pub fn dedup_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashMap::new();
    headers
        .into_iter()
        .map(|h| {
            let count = seen.entry(h.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                h
            } else {
                format!("{h}_{count}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn test_infers_obvious_header_row() {
        let rows = vec![
            vec![s("id"), s("name"), s("email")],
            vec![s("1"), s("alice"), s("alice@x.com")],
            vec![s("2"), s("bob"), s("bob@x.com")],
        ];
        let (idx, headers) = infer_headers(&rows);
        assert_eq!(idx, 0);
        assert_eq!(headers, vec!["id", "name", "email"]);
    }

    #[test]
    fn test_falls_back_to_generated_headers() {
        // Every cell identical and numeric: no row looks header-like enough
        // (low text/uniqueness/vocabulary signal) to clear the 0.3 floor.
        let rows = vec![
            vec![s("5"), s("5"), s("5"), s("5"), s("5"), s("5")],
            vec![s("5"), s("5"), s("5"), s("5"), s("5"), s("5")],
        ];
        let (_, headers) = infer_headers(&rows);
        assert_eq!(headers[0], "column_1");
        assert_eq!(headers.len(), 6);
    }

    #[test]
    fn test_dedup_headers() {
        let headers = vec!["id".to_string(), "name".to_string(), "id".to_string(), "id".to_string()];
        assert_eq!(dedup_headers(headers), vec!["id", "name", "id_2", "id_3"]);
    }

    #[test]
    fn test_sanitize_ident_rules() {
        assert_eq!(sanitize_ident("First Name"), "first_name");
        assert_eq!(sanitize_ident("2024 Revenue!!"), "col_2024_revenue");
        assert_eq!(sanitize_ident(""), "col");
        assert_eq!(sanitize_ident("___"), "col");
    }

    #[test]
    fn test_sanitize_ident_caps_length() {
        let long = "a".repeat(80);
        assert_eq!(sanitize_ident(&long).len(), 50);
    }

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
    }

    #[test]
    fn test_pivot_and_matrix_headers() {
        assert_eq!(pivot_headers(3), vec!["row_label", "col1", "col2"]);
        assert_eq!(matrix_headers(3), vec!["col_1", "col_2", "col_3"]);
    }
}
