//! SQLite row store for the MyWoW data layer
//!
//! A thin, table-generic wrapper around a single synchronous connection.
//! Table shapes are described by [`TableDef`] values owned by the schema
//! registry; the store itself only checks existence, never shape.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Result as SqliteResult};

use crate::error::{MyWowError, Result};

/// Column type vocabulary understood by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Int,
    Real,
    Date,
    DateTime,
}

impl SqlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Int => "INT",
            SqlType::Real => "REAL",
            SqlType::Date => "DATE",
            SqlType::DateTime => "DATETIME",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "TEXT" => Ok(SqlType::Text),
            "INT" | "INTEGER" => Ok(SqlType::Int),
            "REAL" | "FLOAT" => Ok(SqlType::Real),
            "DATE" => Ok(SqlType::Date),
            "DATETIME" => Ok(SqlType::DateTime),
            other => Err(MyWowError::InvalidValues(format!(
                "unknown column type: {other}"
            ))),
        }
    }
}

/// A single column definition: type plus key annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub unique: bool,
}

impl ColumnDef {
    /// Parse a definition string such as `"TEXT PRIMARY KEY UNIQUE"`
    pub fn parse(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let mut tokens = upper.split_whitespace();
        let type_token = tokens
            .next()
            .ok_or_else(|| MyWowError::InvalidValues("empty column definition".to_string()))?;
        let sql_type = SqlType::parse(type_token)?;

        let mut primary_key = false;
        let mut unique = false;
        let rest: Vec<&str> = tokens.collect();
        let mut i = 0;
        while i < rest.len() {
            match rest[i] {
                "PRIMARY" if rest.get(i + 1) == Some(&"KEY") => {
                    primary_key = true;
                    i += 2;
                }
                "UNIQUE" => {
                    unique = true;
                    i += 1;
                }
                other => {
                    return Err(MyWowError::InvalidValues(format!(
                        "unknown column modifier: {other}"
                    )))
                }
            }
        }

        Ok(ColumnDef {
            sql_type,
            primary_key,
            unique,
        })
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_type.as_str())?;
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
        }
        if self.unique {
            write!(f, " UNIQUE")?;
        }
        Ok(())
    }
}

/// An ordered table definition: column names and their definitions.
/// Column order is significant: it is the mirror-file column order and
/// the order expected by [`Database::insert_one`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    columns: Vec<(String, ColumnDef)>,
}

impl TableDef {
    /// Build a definition from `(name, definition string)` pairs
    pub fn parse(columns: &[(&str, &str)]) -> Result<Self> {
        let mut parsed = Vec::with_capacity(columns.len());
        for (name, def) in columns {
            parsed.push(((*name).to_string(), ColumnDef::parse(def)?));
        }
        Ok(TableDef { columns: parsed })
    }

    pub fn from_columns(columns: Vec<(String, ColumnDef)>) -> Self {
        TableDef { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnDef)> {
        self.columns.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Comma-joined column names, the mirror file header line
    pub fn header(&self) -> String {
        self.names().join(",")
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// The primary key column, if the table declares one
    pub fn primary_key(&self) -> Option<(usize, &str)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, (_, d))| d.primary_key)
            .map(|(i, (n, _))| (i, n.as_str()))
    }
}

/// A single typed value moving in or out of the store
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Real(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Render as a SQL literal: NULL-safe, strings single-quoted with
    /// embedded quotes doubled, dates and datetimes ISO-8601 quoted.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Text(s) => quote(s),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Real(r) => r.to_string(),
            SqlValue::Date(d) => quote(&d.format("%Y-%m-%d").to_string()),
            SqlValue::DateTime(dt) => quote(&dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }

    /// Unquoted plain form, used for mirror lines and display
    pub fn raw(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Real(r) => r.to_string(),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }

    /// Parse a raw string (mirror line field) into a value of the
    /// declared column type. Empty strings become NULL.
    pub fn parse(raw: &str, sql_type: SqlType) -> Result<Self> {
        if raw.is_empty() {
            return Ok(SqlValue::Null);
        }
        match sql_type {
            SqlType::Text => Ok(SqlValue::Text(raw.to_string())),
            SqlType::Int => raw
                .parse::<i64>()
                .map(SqlValue::Int)
                .map_err(|_| MyWowError::InvalidValues(format!("not an integer: {raw}"))),
            SqlType::Real => raw
                .parse::<f64>()
                .map(SqlValue::Real)
                .map_err(|_| MyWowError::InvalidValues(format!("not a number: {raw}"))),
            SqlType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(SqlValue::Date)
                .map_err(|_| MyWowError::InvalidValues(format!("not a date: {raw}"))),
            SqlType::DateTime => parse_datetime(raw)
                .map(SqlValue::DateTime)
                .ok_or_else(|| MyWowError::InvalidValues(format!("not a datetime: {raw}"))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Real(r) => Some(*r),
            SqlValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            SqlValue::Date(d) => Some(*d),
            SqlValue::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::DateTime(dt) => Some(*dt),
            SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl From<f64> for SqlValue {
    fn from(r: f64) -> Self {
        SqlValue::Real(r)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(d: NaiveDate) -> Self {
        SqlValue::Date(d)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(dt: NaiveDateTime) -> Self {
        SqlValue::DateTime(dt)
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ"))
        .ok()
}

/// A row keyed by column name, the heterogeneous record shape shared by
/// store reads, mirror replay and exchange-API payloads
pub type Record = HashMap<String, SqlValue>;

/// Convert a JSON object (exchange API payload) into a [`Record`].
/// Strings stay text; numbers become INT when integral, REAL otherwise.
pub fn record_from_json(value: &serde_json::Value) -> Result<Record> {
    let obj = value
        .as_object()
        .ok_or_else(|| MyWowError::InvalidData("expected a JSON object".to_string()))?;

    let mut record = Record::with_capacity(obj.len());
    for (key, val) in obj {
        let sql_value = match val {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::Bool(b) => SqlValue::Int(i64::from(*b)),
            other => {
                return Err(MyWowError::InvalidData(format!(
                    "unsupported JSON value for {key}: {other}"
                )))
            }
        };
        record.insert(key.clone(), sql_value);
    }
    Ok(record)
}

/// Outcome of a single-row insert. Duplicate primary keys are skipped,
/// not errors; callers branch on the returned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    SkippedDuplicate,
}

/// Conjunctive predicate builder. All conditions are ANDed; there is no
/// OR or NOT support, conjunctive predicates only.
#[derive(Debug, Clone, Default)]
pub struct Where {
    conditions: Vec<String>,
}

impl Where {
    pub fn new() -> Self {
        Where::default()
    }

    pub fn eq(mut self, column: &str, value: SqlValue) -> Self {
        self.conditions
            .push(format!("{column} = {}", value.to_literal()));
        self
    }

    pub fn lt(mut self, column: &str, value: SqlValue) -> Self {
        self.conditions
            .push(format!("{column} < {}", value.to_literal()));
        self
    }

    pub fn gt(mut self, column: &str, value: SqlValue) -> Self {
        self.conditions
            .push(format!("{column} > {}", value.to_literal()));
        self
    }

    pub fn lte(mut self, column: &str, value: SqlValue) -> Self {
        self.conditions
            .push(format!("{column} <= {}", value.to_literal()));
        self
    }

    pub fn gte(mut self, column: &str, value: SqlValue) -> Self {
        self.conditions
            .push(format!("{column} >= {}", value.to_literal()));
        self
    }

    /// Inclusive on both ends
    pub fn between(mut self, column: &str, low: SqlValue, high: SqlValue) -> Self {
        self.conditions.push(format!(
            "{column} BETWEEN {} AND {}",
            low.to_literal(),
            high.to_literal()
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Render as a `WHERE ...` clause, or an empty string when no
    /// conditions were added
    pub fn build(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }
}

/// Generic wrapper around one open SQLite connection
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        if table_name.is_empty() {
            return Ok(false);
        }
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Uniform guard applied by every table-accepting method
    fn check_table(&self, table_name: &str) -> Result<()> {
        if table_name.is_empty() || !self.table_exists(table_name)? {
            return Err(MyWowError::InvalidTableName(table_name.to_string()));
        }
        Ok(())
    }

    /// Create a table from its definition. No-op when the table already
    /// exists; shape checking is the registry's job, not the store's.
    pub fn create_table(&self, table_name: &str, definition: &TableDef) -> Result<()> {
        if table_name.is_empty() {
            return Err(MyWowError::InvalidTableName(table_name.to_string()));
        }
        if definition.is_empty() {
            return Err(MyWowError::InvalidValues(format!(
                "empty definition for table {table_name}"
            )));
        }
        if self.table_exists(table_name)? {
            return Ok(());
        }

        let columns: Vec<String> = definition
            .columns()
            .map(|(name, def)| format!("{name} {def}"))
            .collect();
        let sql = format!("CREATE TABLE {table_name} ({})", columns.join(", "));
        self.conn.execute(&sql, [])?;
        debug!("created table {table_name}");
        Ok(())
    }

    /// Introspect the live definition of a table: declared types, the
    /// primary key flag and single-column UNIQUE indexes. Used by the
    /// registry to detect schema drift.
    pub fn table_definition(&self, table_name: &str) -> Result<TableDef> {
        self.check_table(table_name)?;

        let unique_columns = self.unique_columns(table_name)?;

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table_name})"))?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let type_str: String = row.get(2)?;
                let pk: i64 = row.get(5)?;
                Ok((name, type_str, pk > 0))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut columns = Vec::with_capacity(rows.len());
        for (name, type_str, primary_key) in rows {
            let sql_type = SqlType::parse(&type_str)?;
            let unique = unique_columns.contains(&name);
            columns.push((
                name,
                ColumnDef {
                    sql_type,
                    primary_key,
                    unique,
                },
            ));
        }
        Ok(TableDef::from_columns(columns))
    }

    /// Columns covered by a single-column unique index
    fn unique_columns(&self, table_name: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA index_list({table_name})"))?;
        let indexes = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let unique: i64 = row.get(2)?;
                let origin: String = row.get(3)?;
                Ok((name, unique > 0, origin))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut columns = Vec::new();
        for (index_name, unique, origin) in indexes {
            // pk-origin indexes are reported by table_info already
            if !unique || origin == "pk" {
                continue;
            }
            let mut info = self
                .conn
                .prepare(&format!("PRAGMA index_info({index_name})"))?;
            let indexed = info
                .query_map([], |row| row.get::<_, String>(2))?
                .collect::<SqliteResult<Vec<_>>>()?;
            if indexed.len() == 1 {
                columns.push(indexed.into_iter().next().unwrap_or_default());
            }
        }
        Ok(columns)
    }

    /// Insert one row with values in declared column order.
    ///
    /// When the table has a primary key and a row with the same key value
    /// already exists, the insert is skipped and `SkippedDuplicate` is
    /// returned; duplicate rows are a normal outcome, not an error.
    pub fn insert_one(&self, table_name: &str, values: &[SqlValue]) -> Result<InsertOutcome> {
        self.check_table(table_name)?;
        let definition = self.table_definition(table_name)?;
        if values.is_empty() {
            return Err(MyWowError::InvalidValues(format!(
                "no values given for insert into {table_name}"
            )));
        }
        if values.len() != definition.len() {
            return Err(MyWowError::InvalidValues(format!(
                "expected {} values for {table_name}, got {}",
                definition.len(),
                values.len()
            )));
        }

        if let Some((pk_index, pk_column)) = definition.primary_key() {
            let key = &values[pk_index];
            let existing: i64 = self.conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {table_name} WHERE {pk_column} = {}",
                    key.to_literal()
                ),
                [],
                |row| row.get(0),
            )?;
            if existing > 0 {
                debug!(
                    "skipping duplicate insert into {table_name}: {pk_column} = {}",
                    key.raw()
                );
                return Ok(InsertOutcome::SkippedDuplicate);
            }
        }

        let literals: Vec<String> = values.iter().map(SqlValue::to_literal).collect();
        let sql = format!("INSERT INTO {table_name} VALUES ({})", literals.join(", "));
        self.conn.execute(&sql, [])?;
        Ok(InsertOutcome::Inserted)
    }

    /// Insert a named record by zipping it against the declared column
    /// order. Every declared column must be present.
    pub fn insert_record(&self, table_name: &str, record: &Record) -> Result<InsertOutcome> {
        self.check_table(table_name)?;
        let definition = self.table_definition(table_name)?;

        let mut values = Vec::with_capacity(definition.len());
        for (name, _) in definition.columns() {
            let value = record
                .get(name)
                .ok_or_else(|| MyWowError::InvalidValues(format!("record missing column {name}")))?;
            values.push(value.clone());
        }
        self.insert_one(table_name, &values)
    }

    /// Update rows matching the (conjunctive) where values. Returns the
    /// number of rows changed.
    pub fn update_where(
        &self,
        table_name: &str,
        updated_values: &[(&str, SqlValue)],
        where_values: &[(&str, SqlValue)],
    ) -> Result<usize> {
        self.check_table(table_name)?;
        if updated_values.is_empty() {
            return Err(MyWowError::InvalidValues("no values to update".to_string()));
        }
        if where_values.is_empty() {
            return Err(MyWowError::InvalidValues(
                "no where values for update".to_string(),
            ));
        }

        let assignments: Vec<String> = updated_values
            .iter()
            .map(|(col, val)| format!("{col} = {}", val.to_literal()))
            .collect();
        let mut where_clause = Where::new();
        for (col, val) in where_values {
            where_clause = where_clause.eq(col, val.clone());
        }
        let sql = format!(
            "UPDATE {table_name} SET {} {}",
            assignments.join(", "),
            where_clause.build()
        );
        Ok(self.conn.execute(&sql, [])?)
    }

    /// Delete rows matching the (conjunctive) where values. Returns the
    /// number of rows removed.
    pub fn delete_where(
        &self,
        table_name: &str,
        where_values: &[(&str, SqlValue)],
    ) -> Result<usize> {
        self.check_table(table_name)?;
        if where_values.is_empty() {
            return Err(MyWowError::InvalidValues(
                "no where values for delete".to_string(),
            ));
        }

        let mut where_clause = Where::new();
        for (col, val) in where_values {
            where_clause = where_clause.eq(col, val.clone());
        }
        let sql = format!("DELETE FROM {table_name} {}", where_clause.build());
        Ok(self.conn.execute(&sql, [])?)
    }

    /// Fetch rows as [`Record`]s, each value coerced to the declared
    /// column type. `limit = -1` means unbounded; `columns = None`
    /// selects every column, `Some` projects the named subset.
    pub fn get_rows(
        &self,
        table_name: &str,
        limit: i64,
        where_clause: &Where,
        order_by: Option<&str>,
        columns: Option<&[&str]>,
    ) -> Result<Vec<Record>> {
        self.check_table(table_name)?;
        let definition = self.table_definition(table_name)?;

        let selected: Vec<(String, SqlType)> = match columns {
            Some(names) => {
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    let def = definition.get(name).ok_or_else(|| {
                        MyWowError::InvalidValues(format!(
                            "unknown column {name} in {table_name}"
                        ))
                    })?;
                    selected.push(((*name).to_string(), def.sql_type));
                }
                selected
            }
            None => definition
                .columns()
                .map(|(n, d)| (n.to_string(), d.sql_type))
                .collect(),
        };
        let projection = match columns {
            Some(_) => selected
                .iter()
                .map(|(n, _)| n.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            None => "*".to_string(),
        };

        let order = match order_by {
            Some(expr) => format!("ORDER BY {expr}"),
            None => String::new(),
        };
        let sql = format!(
            "SELECT {projection} FROM {table_name} {} {} LIMIT {limit}",
            where_clause.build(),
            order
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let mut record = Record::with_capacity(selected.len());
                for (i, (name, sql_type)) in selected.iter().enumerate() {
                    let value = coerce_value(row.get_ref(i)?, *sql_type);
                    record.insert(name.clone(), value);
                }
                Ok(record)
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows)
    }
}

/// Coerce a stored value to the declared column type. Text that fails to
/// parse as its declared date type is left as-is.
fn coerce_value(value: ValueRef<'_>, sql_type: SqlType) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => match sql_type {
            SqlType::Real => SqlValue::Real(i as f64),
            _ => SqlValue::Int(i),
        },
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).to_string();
            match sql_type {
                SqlType::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .map(SqlValue::Date)
                    .unwrap_or(SqlValue::Text(text)),
                SqlType::DateTime => parse_datetime(&text)
                    .map(SqlValue::DateTime)
                    .unwrap_or(SqlValue::Text(text)),
                _ => SqlValue::Text(text),
            }
        }
        ValueRef::Blob(_) => SqlValue::Null,
    }
}
