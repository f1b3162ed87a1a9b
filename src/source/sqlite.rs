use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use crate::config::SourceLayout;
use crate::data::{CountEntry, Record};
use crate::errors::ExtractError;
use crate::filter::{Filter, validate_identifier};
use crate::source::RowSource;
use crate::types::{ColumnName, SourceId};

/// SQLite-backed row source.
///
/// A connection is opened per operation and dropped on every exit path, so the
/// source itself holds no open handle between calls.
pub struct SqliteSource {
    id: SourceId,
    path: PathBuf,
    layout: SourceLayout,
}

impl SqliteSource {
    /// Source reading the database file at `path` with the default layout.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: format!("sqlite:{}", path.display()),
            path,
            layout: SourceLayout::default(),
        }
    }

    /// Replace the key and time column names.
    pub fn with_layout(mut self, layout: SourceLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Database file this source reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, ExtractError> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| self.map_sql_err(err))
    }

    fn map_sql_err(&self, err: rusqlite::Error) -> ExtractError {
        ExtractError::Source {
            source_id: self.id.clone(),
            reason: err.to_string(),
        }
    }

    fn checked_layout(&self) -> Result<&SourceLayout, ExtractError> {
        validate_identifier(&self.layout.key_column)?;
        validate_identifier(&self.layout.time_column)?;
        Ok(&self.layout)
    }

    /// `WHERE` body combining `filter` with the exclusion of NULL keys.
    fn where_clause(&self, filter: &Filter) -> Result<String, ExtractError> {
        let key = &self.checked_layout()?.key_column;
        Ok(format!("({}) AND {key} IS NOT NULL", filter.render()))
    }

    fn count_scalar(&self, sql: &str) -> Result<u64, ExtractError> {
        debug!("[keyed_windows:sqlite] {sql}");
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(|err| self.map_sql_err(err))?;
        Ok(count.max(0) as u64)
    }
}

impl RowSource for SqliteSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn layout(&self) -> &SourceLayout {
        &self.layout
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnName>, ExtractError> {
        validate_identifier(table)?;
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .map_err(|err| self.map_sql_err(err))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|err| self.map_sql_err(err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| self.map_sql_err(err))?;
        Ok(columns)
    }

    fn grouped_counts(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<CountEntry>, ExtractError> {
        validate_identifier(table)?;
        let key = &self.checked_layout()?.key_column;
        let mut sql = format!(
            "SELECT COUNT(*), CAST({key} AS TEXT) FROM {table} WHERE {} GROUP BY {key} ORDER BY {key}",
            self.where_clause(filter)?
        );
        match (limit, offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        debug!("[keyed_windows:sqlite] {sql}");

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql).map_err(|err| self.map_sql_err(err))?;
        let entries = stmt
            .query_map([], |row| {
                let rows: i64 = row.get(0)?;
                Ok(CountEntry {
                    key: row.get(1)?,
                    rows: rows.max(0) as u64,
                })
            })
            .map_err(|err| self.map_sql_err(err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| self.map_sql_err(err))?;
        Ok(entries)
    }

    fn distinct_key_count(&self, table: &str, filter: &Filter) -> Result<u64, ExtractError> {
        validate_identifier(table)?;
        let key = &self.checked_layout()?.key_column;
        self.count_scalar(&format!(
            "SELECT COUNT(DISTINCT {key}) FROM {table} WHERE {}",
            self.where_clause(filter)?
        ))
    }

    fn row_count(&self, table: &str, filter: &Filter) -> Result<u64, ExtractError> {
        validate_identifier(table)?;
        self.count_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE {}",
            self.where_clause(filter)?
        ))
    }

    fn fetch_rows(
        &self,
        table: &str,
        filter: &Filter,
        features: &[ColumnName],
        row_offset: usize,
        row_limit: usize,
    ) -> Result<Vec<Record>, ExtractError> {
        validate_identifier(table)?;
        for feature in features {
            validate_identifier(feature)?;
        }
        let layout = self.checked_layout()?;
        let key_column = format!("CAST({} AS TEXT)", layout.key_column);
        let mut columns = Vec::with_capacity(features.len() + 2);
        columns.push(key_column.as_str());
        columns.push(layout.time_column.as_str());
        columns.extend(features.iter().map(String::as_str));
        let sql = format!(
            "SELECT {} FROM {table} WHERE {} ORDER BY {}, {} LIMIT ?1 OFFSET ?2",
            columns.join(", "),
            self.where_clause(filter)?,
            layout.key_column,
            layout.time_column
        );
        debug!(
            "[keyed_windows:sqlite] {sql} (limit={row_limit}, offset={row_offset})"
        );

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql).map_err(|err| self.map_sql_err(err))?;
        let width = features.len();
        let records = stmt
            .query_map(params![row_limit as i64, row_offset as i64], |row| {
                let key: String = row.get(0)?;
                let time: f64 = row.get(1)?;
                let mut values = Vec::with_capacity(width);
                for idx in 0..width {
                    values.push(row.get::<_, f64>(idx + 2)?);
                }
                Ok(Record { key, time, values })
            })
            .map_err(|err| self.map_sql_err(err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| self.map_sql_err(err))?;
        Ok(records)
    }
}
