use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::config::SourceLayout;
use crate::constants::source::MEMORY_SOURCE_ID;
use crate::data::{CountEntry, Record};
use crate::errors::ExtractError;
use crate::filter::{Filter, Value};
use crate::source::RowSource;
use crate::types::{ColumnName, Key, SourceId, TableName};

/// Column-named rows of one in-memory table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTable {
    columns: Vec<ColumnName>,
    rows: Vec<Vec<Value>>,
}

impl InMemoryTable {
    /// Build a table; every row must carry one cell per column.
    pub fn new<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ColumnName>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Append one row.
    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// Keep only the rows for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[Value]) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }

    /// Number of stored rows, before any filter.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }
}

/// In-memory row source for tests and small datasets.
///
/// Rows are evaluated with the same ordering rules a relational source applies:
/// filtered, then ordered by key (byte order) and time.
pub struct InMemorySource {
    id: SourceId,
    layout: SourceLayout,
    tables: HashMap<TableName, InMemoryTable>,
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySource {
    /// Empty source using the default column layout.
    pub fn new() -> Self {
        Self {
            id: MEMORY_SOURCE_ID.to_string(),
            layout: SourceLayout::default(),
            tables: HashMap::new(),
        }
    }

    /// Replace the key and time column names.
    pub fn with_layout(mut self, layout: SourceLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Register `table` under `name`, replacing any table of that name.
    pub fn with_table(mut self, name: impl Into<TableName>, table: InMemoryTable) -> Self {
        self.tables.insert(name.into(), table);
        self
    }

    /// Mutable access for tests that rebuild data between runs.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut InMemoryTable> {
        self.tables.get_mut(name)
    }

    fn table(&self, name: &str) -> Result<&InMemoryTable, ExtractError> {
        self.tables.get(name).ok_or_else(|| ExtractError::Source {
            source_id: self.id.clone(),
            reason: format!("no such table: {name}"),
        })
    }

    fn column(&self, table: &InMemoryTable, column: &str) -> Result<usize, ExtractError> {
        table.position(column).ok_or_else(|| ExtractError::Source {
            source_id: self.id.clone(),
            reason: format!("no such column: {column}"),
        })
    }

    /// Filtered rows with their keys, ordered by key then time.
    fn ordered_rows<'t>(
        &self,
        table: &'t InMemoryTable,
        filter: &Filter,
    ) -> Result<Vec<(Key, &'t Vec<Value>)>, ExtractError> {
        let key_idx = self.column(table, &self.layout.key_column)?;
        let time_idx = self.column(table, &self.layout.time_column)?;
        let mut rows: Vec<(Key, &Vec<Value>)> = table
            .rows
            .iter()
            .filter(|row| {
                filter.matches(|column| table.position(column).and_then(|idx| row.get(idx)))
            })
            .filter_map(|row| key_text(&row[key_idx]).map(|key| (key, row)))
            .collect();
        rows.sort_by(|(a_key, a_row), (b_key, b_row)| {
            a_key.cmp(b_key).then_with(|| {
                let a_time = a_row[time_idx].as_f64().unwrap_or(f64::NAN);
                let b_time = b_row[time_idx].as_f64().unwrap_or(f64::NAN);
                a_time.partial_cmp(&b_time).unwrap_or(Ordering::Equal)
            })
        });
        Ok(rows)
    }

    fn numeric(&self, value: &Value, column: &str) -> Result<f64, ExtractError> {
        value.as_f64().ok_or_else(|| ExtractError::Source {
            source_id: self.id.clone(),
            reason: format!("column '{column}' holds a non-numeric value: {value}"),
        })
    }
}

impl RowSource for InMemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn layout(&self) -> &SourceLayout {
        &self.layout
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnName>, ExtractError> {
        Ok(self
            .tables
            .get(table)
            .map(|table| table.columns.clone())
            .unwrap_or_default())
    }

    fn grouped_counts(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<CountEntry>, ExtractError> {
        let table = self.table(table)?;
        let mut groups: BTreeMap<Key, u64> = BTreeMap::new();
        for (key, _) in self.ordered_rows(table, filter)? {
            *groups.entry(key).or_insert(0) += 1;
        }
        Ok(groups
            .into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(key, rows)| CountEntry { key, rows })
            .collect())
    }

    fn distinct_key_count(&self, table: &str, filter: &Filter) -> Result<u64, ExtractError> {
        Ok(self.grouped_counts(table, filter, None, None)?.len() as u64)
    }

    fn row_count(&self, table: &str, filter: &Filter) -> Result<u64, ExtractError> {
        let table = self.table(table)?;
        Ok(self.ordered_rows(table, filter)?.len() as u64)
    }

    fn fetch_rows(
        &self,
        table: &str,
        filter: &Filter,
        features: &[ColumnName],
        row_offset: usize,
        row_limit: usize,
    ) -> Result<Vec<Record>, ExtractError> {
        let table = self.table(table)?;
        let time_idx = self.column(table, &self.layout.time_column)?;
        let feature_idx = features
            .iter()
            .map(|feature| self.column(table, feature))
            .collect::<Result<Vec<_>, _>>()?;
        self.ordered_rows(table, filter)?
            .into_iter()
            .skip(row_offset)
            .take(row_limit)
            .map(|(key, row)| {
                let time = self.numeric(&row[time_idx], &self.layout.time_column)?;
                let values = feature_idx
                    .iter()
                    .zip(features)
                    .map(|(idx, name)| self.numeric(&row[*idx], name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Record { key, time, values })
            })
            .collect()
    }
}

/// Key cell rendered as text; null keys are excluded from every group.
fn key_text(value: &Value) -> Option<Key> {
    match value {
        Value::Null => None,
        Value::Text(text) => Some(text.clone()),
        Value::Integer(value) => Some(value.to_string()),
        Value::Real(value) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::CmpOp;

    fn row(key: &str, time: f64, x: f64) -> Vec<Value> {
        vec![Value::from(key), Value::Real(time), Value::Real(x)]
    }

    fn source() -> InMemorySource {
        InMemorySource::new().with_table(
            "champs",
            InMemoryTable::new(
                ["compound_key", "time", "pos_x"],
                vec![
                    row("b", 2.0, 0.2),
                    row("a", 3.0, 0.3),
                    row("b", 1.0, 0.1),
                    row("a", 1.0, 0.1),
                    row("c", 9.0, 0.9),
                    row("a", 2.0, 0.2),
                ],
            ),
        )
    }

    #[test]
    fn grouped_counts_are_ordered_by_key_and_paged_by_group() {
        let source = source();
        let all = source
            .grouped_counts("champs", &Filter::all(), None, None)
            .unwrap();
        assert_eq!(
            all,
            vec![
                CountEntry::new("a", 3),
                CountEntry::new("b", 2),
                CountEntry::new("c", 1)
            ]
        );
        let page = source
            .grouped_counts("champs", &Filter::all(), Some(1), Some(1))
            .unwrap();
        assert_eq!(page, vec![CountEntry::new("b", 2)]);
        assert_eq!(source.distinct_key_count("champs", &Filter::all()).unwrap(), 3);
    }

    #[test]
    fn fetch_rows_orders_by_key_then_time() {
        let source = source();
        let features = vec!["pos_x".to_string()];
        let rows = source
            .fetch_rows("champs", &Filter::all(), &features, 1, 3)
            .unwrap();
        let times: Vec<f64> = rows.iter().map(|record| record.time).collect();
        assert_eq!(times, vec![2.0, 3.0, 1.0]);
        let keys: Vec<&str> = rows.iter().map(|record| record.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "a", "b"]);
        assert_eq!(rows[2].values, vec![0.1]);
    }

    #[test]
    fn filters_apply_to_counts_and_rows() {
        let source = source();
        let filter = Filter::all().and("time", CmpOp::Gt, 1.0);
        assert_eq!(source.row_count("champs", &filter).unwrap(), 4);
        let counts = source.grouped_counts("champs", &filter, None, None).unwrap();
        let total: u64 = counts.iter().map(|entry| entry.rows).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn non_numeric_feature_is_a_source_error() {
        let source = InMemorySource::new().with_table(
            "champs",
            InMemoryTable::new(
                ["compound_key", "time", "name"],
                vec![vec![Value::from("a"), Value::Real(1.0), Value::from("Ahri")]],
            ),
        );
        let err = source
            .fetch_rows("champs", &Filter::all(), &["name".to_string()], 0, 10)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Source { reason, .. } if reason.contains("non-numeric")));
    }
}
