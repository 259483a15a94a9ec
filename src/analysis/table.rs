//! Indexed column-store for one city's listings
//!
//! Every downstream stage addresses data by canonical column name only.
//! Columns are either numeric or text; missing cells are `None`. Grouping
//! returns `BTreeMap`s so iteration order is deterministic.

use std::collections::BTreeMap;

/// A single named column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retain_rows(&mut self, keep: &[bool]) {
        match self {
            Column::Numeric(v) => {
                let mut idx = 0;
                v.retain(|_| {
                    let k = keep[idx];
                    idx += 1;
                    k
                });
            }
            Column::Text(v) => {
                let mut idx = 0;
                v.retain(|_| {
                    let k = keep[idx];
                    idx += 1;
                    k
                });
            }
        }
    }
}

/// Column-store table for one city. All columns share the same row count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityTable {
    rows: usize,
    columns: BTreeMap<String, Column>,
}

impl CityTable {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            columns: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Insert or replace a numeric column. Length must match the table.
    pub fn insert_numeric(&mut self, name: &str, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.rows, "column {} length mismatch", name);
        self.columns.insert(name.to_string(), Column::Numeric(values));
    }

    /// Insert or replace a text column. Length must match the table.
    pub fn insert_text(&mut self, name: &str, values: Vec<Option<String>>) {
        debug_assert_eq!(values.len(), self.rows, "column {} length mismatch", name);
        self.columns.insert(name.to_string(), Column::Text(values));
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        self.columns.remove(name)
    }

    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.columns.get(name) {
            Some(Column::Numeric(v)) => Some(v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&[Option<String>]> {
        match self.columns.get(name) {
            Some(Column::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn numeric_mut(&mut self, name: &str) -> Option<&mut Vec<Option<f64>>> {
        match self.columns.get_mut(name) {
            Some(Column::Numeric(v)) => Some(v),
            _ => None,
        }
    }

    /// Non-missing values of a numeric column, in row order.
    pub fn numeric_values(&self, name: &str) -> Option<Vec<f64>> {
        self.numeric(name)
            .map(|col| col.iter().filter_map(|v| *v).collect())
    }

    /// Row count with a non-missing value in the named column.
    pub fn non_missing(&self, name: &str) -> usize {
        match self.columns.get(name) {
            Some(Column::Numeric(v)) => v.iter().filter(|x| x.is_some()).count(),
            Some(Column::Text(v)) => v.iter().filter(|x| x.is_some()).count(),
            None => 0,
        }
    }

    /// Paired non-missing values of two numeric columns, in row order.
    /// `None` when either column is absent.
    pub fn numeric_pairs(&self, a: &str, b: &str) -> Option<Vec<(f64, f64)>> {
        let col_a = self.numeric(a)?;
        let col_b = self.numeric(b)?;
        Some(
            col_a
                .iter()
                .zip(col_b.iter())
                .filter_map(|(x, y)| match (x, y) {
                    (Some(x), Some(y)) => Some((*x, *y)),
                    _ => None,
                })
                .collect(),
        )
    }

    /// Row indices grouped by the value of a text column, skipping missing
    /// cells. Deterministic: keys sorted, indices in row order.
    pub fn group_rows_by_text(&self, name: &str) -> Option<BTreeMap<String, Vec<usize>>> {
        let col = self.text(name)?;
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, value) in col.iter().enumerate() {
            if let Some(v) = value {
                groups.entry(v.clone()).or_default().push(idx);
            }
        }
        Some(groups)
    }

    /// Non-missing values of a numeric column restricted to the given rows.
    pub fn numeric_at(&self, name: &str, rows: &[usize]) -> Option<Vec<f64>> {
        let col = self.numeric(name)?;
        Some(rows.iter().filter_map(|&i| col.get(i).copied().flatten()).collect())
    }

    /// Drop every row where `keep` is false. `keep` must cover every row.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.rows, "row mask length mismatch");
        for column in self.columns.values_mut() {
            column.retain_rows(keep);
        }
        self.rows = keep.iter().filter(|&&k| k).count();
    }
}
