use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use rusqlite::Connection;

use crate::error::FetchError;
use crate::rows::{Row, RowSchema};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

// ── Table identity ──

/// A `catalog.schema.name` triple, stored as one SQLite table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub catalog: String,
    pub schema: String,
    pub name: String,
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

impl TableName {
    pub fn new(catalog: &str, schema: &str, name: &str) -> Result<TableName> {
        for part in [catalog, schema, name] {
            if !ident_re().is_match(part) {
                bail!("invalid table identifier part: {:?}", part);
            }
        }
        Ok(TableName {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse `catalog.schema.name`.
    pub fn parse(qualified: &str) -> Result<TableName> {
        let parts: Vec<&str> = qualified.split('.').collect();
        match parts.as_slice() {
            [c, s, n] => TableName::new(c, s, n),
            _ => bail!("expected catalog.schema.name, got {:?}", qualified),
        }
    }

    /// SQLite table name; parts are pre-validated so no quoting is needed.
    pub fn sql_name(&self) -> String {
        format!("{}_{}_{}", self.catalog, self.schema, self.name)
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.name)
    }
}

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

// ── Writing ──

/// Create the table from the inferred schema if it does not exist yet.
/// Every column is TEXT; there is no key.
pub fn ensure_table(
    conn: &Connection,
    table: &TableName,
    schema: &RowSchema,
) -> Result<(), FetchError> {
    for (i, col) in schema.columns.iter().enumerate() {
        if let Some(prev) = schema.columns[..i].iter().find(|c| c.eq_ignore_ascii_case(col)) {
            return Err(FetchError::DuplicateColumn {
                first: prev.clone(),
                second: col.clone(),
            });
        }
    }
    let cols = schema
        .columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        table.sql_name(),
        cols
    ))?;
    Ok(())
}

pub fn table_columns(conn: &Connection, table: &TableName) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table.sql_name()))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

/// Line a row up with the table's columns. Keys match columns the way
/// SQLite does, ignoring ASCII case.
fn bind_row<'r>(columns: &[String], row: &'r Row) -> Result<Vec<Option<&'r str>>, FetchError> {
    let mut values: Vec<Option<&str>> = vec![None; columns.len()];
    let mut seen: Vec<Option<&str>> = vec![None; columns.len()];
    for (key, value) in row {
        let idx = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(key))
            .ok_or_else(|| FetchError::SchemaMismatch {
                column: key.clone(),
            })?;
        if let Some(prev) = seen[idx] {
            return Err(FetchError::DuplicateColumn {
                first: prev.to_string(),
                second: key.clone(),
            });
        }
        seen[idx] = Some(key.as_str());
        values[idx] = value.as_deref();
    }
    Ok(values)
}

/// Append rows in one transaction. A row key the table does not have fails
/// the whole batch; keys the row lacks are stored as NULL.
pub fn append_rows(conn: &Connection, table: &TableName, rows: &[Row]) -> Result<usize, FetchError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let columns = table_columns(conn, table)?;
    let bound = rows
        .iter()
        .map(|row| bind_row(&columns, row))
        .collect::<Result<Vec<_>, _>>()?;

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.sql_name(),
        columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", "),
    );

    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(&sql)?;
        for values in bound {
            count += stmt.execute(rusqlite::params_from_iter(values))?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Reading ──

pub fn table_exists(conn: &Connection, table: &TableName) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table.sql_name()],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn count_rows(conn: &Connection, table: &TableName) -> Result<usize> {
    let n: usize = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", table.sql_name()),
        [],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Read `columns` for every stored row in insertion order. Columns the
/// table does not have are an error, not silently NULL.
pub fn fetch_rows(
    conn: &Connection,
    table: &TableName,
    columns: &[String],
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    let existing = table_columns(conn, table)?;
    if let Some(missing) = columns
        .iter()
        .find(|c| !existing.iter().any(|e| e.eq_ignore_ascii_case(c)))
    {
        bail!("table {} has no column {:?}", table, missing);
    }

    let sql = format!(
        "SELECT {} FROM {} ORDER BY rowid{}",
        columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        table.sql_name(),
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| {
            let mut row = Row::new();
            for (i, c) in columns.iter().enumerate() {
                row.insert(c.clone(), r.get::<_, Option<String>>(i)?);
            }
            Ok(row)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub rows: usize,
    pub distinct: usize,
    pub duplicates: usize,
    pub columns: Vec<String>,
}

pub fn get_stats(conn: &Connection, table: &TableName) -> Result<Stats> {
    let rows = count_rows(conn, table)?;
    let distinct: usize = conn.query_row(
        &format!("SELECT COUNT(*) FROM (SELECT DISTINCT * FROM {})", table.sql_name()),
        [],
        |r| r.get(0),
    )?;
    let columns = table_columns(conn, table)?;
    Ok(Stats {
        rows,
        distinct,
        duplicates: rows - distinct,
        columns,
    })
}
