//! Region classification (§4.G "Region classification").

use std::collections::HashMap;

use crate::db::Value;

use super::region::{is_empty_cell, region_rows, Grid, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Structured,
    Pivot,
    Matrix,
    SemiStructured,
}

fn cell_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => Some(other.to_display_string()),
    }
}

fn looks_numeric(v: &Value) -> bool {
    match v {
        Value::Int(_) | Value::Float(_) => true,
        Value::String(s) => {
            let t: String = s.trim().chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
            !t.is_empty() && t.parse::<f64>().is_ok()
        }
        _ => false,
    }
}

fn looks_text(v: &Value) -> bool {
    cell_text(v).map(|s| !looks_numeric(v) && !s.trim().is_empty()).unwrap_or(false)
}

/// Chooses one of {structured, pivot, matrix, semi-structured} for a region
/// using the (a)/(b)/(c) heuristics in order, falling through to
/// semi-structured (§4.G).
pub fn classify(grid: &Grid, region: &Region) -> RegionKind {
    let rows = region_rows(grid, region);
    if rows.is_empty() {
        return RegionKind::SemiStructured;
    }

    let row_lengths: Vec<usize> = rows
        .iter()
        .map(|row| row.iter().filter(|c| !is_empty_cell(c)).count())
        .collect();
    if row_length_consistency(&row_lengths) > 0.7 {
        return RegionKind::Structured;
    }

    let top_left_empty = is_empty_cell(&rows[0][0]);
    let first_row_text = fraction_matching(&rows[0][1..], looks_text);
    let first_col_text = fraction_matching(
        &rows[1..].iter().map(|r| r[0].clone()).collect::<Vec<_>>(),
        looks_text,
    );
    if top_left_empty && first_row_text > 0.5 && first_col_text > 0.5 {
        return RegionKind::Pivot;
    }

    let all_cells: Vec<Value> = rows.iter().flatten().filter(|c| !is_empty_cell(c)).cloned().collect();
    if !all_cells.is_empty() && fraction_matching(&all_cells, looks_numeric) >= 0.8 {
        return RegionKind::Matrix;
    }

    RegionKind::SemiStructured
}

fn row_length_consistency(lengths: &[usize]) -> f64 {
    if lengths.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for &len in lengths {
        *counts.entry(len).or_default() += 1;
    }
    let mode_count = counts.values().copied().max().unwrap_or(0);
    mode_count as f64 / lengths.len() as f64
}

fn fraction_matching(values: &[Value], predicate: impl Fn(&Value) -> bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| predicate(v)).count() as f64 / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn test_structured_region() {
        let grid = vec![
            vec![s("id"), s("name"), s("email")],
            vec![s("1"), s("alice"), s("alice@x.com")],
            vec![s("2"), s("bob"), s("bob@x.com")],
        ];
        let region = Region { top: 0, left: 0, bottom: 2, right: 2 };
        assert_eq!(classify(&grid, &region), RegionKind::Structured);
    }

    #[test]
    fn test_pivot_region() {
        let grid = vec![
            vec![Value::Null, s("jan"), s("feb")],
            vec![s("revenue"), s("100"), s("200")],
            vec![s("cost"), s("50"), s("60")],
        ];
        let region = Region { top: 0, left: 0, bottom: 2, right: 2 };
        assert_eq!(classify(&grid, &region), RegionKind::Pivot);
    }

    #[test]
    fn test_matrix_region() {
        // Ragged row lengths keep this below the 0.7 structured threshold
        // (§4.G checks structured consistency before matrix density) while
        // staying numeric-dense enough to classify as a matrix.
        let grid = vec![
            vec![s("1"), s("2"), s("3")],
            vec![s("4"), s("5"), Value::Null],
            vec![s("7"), s("8"), s("9")],
            vec![s("10"), Value::Null, s("12")],
        ];
        let region = Region { top: 0, left: 0, bottom: 3, right: 2 };
        assert_eq!(classify(&grid, &region), RegionKind::Matrix);
    }

    #[test]
    fn test_row_length_consistency() {
        assert_eq!(row_length_consistency(&[3, 3, 3, 2]), 0.75);
        assert_eq!(row_length_consistency(&[]), 0.0);
    }
}
