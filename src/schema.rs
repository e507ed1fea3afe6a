//! Schema registry and reconciler
//!
//! Owns the authoritative definitions of the five journal tables, keeps
//! the live SQLite schema in line with them (refusing to run on drift;
//! there is no migration path), and maintains a plain-text mirror file
//! per table that is replayed into the store at startup.
//!
//! Mirror format: UTF-8, first line is the comma-joined column names,
//! then one comma-joined row per line. Text fields are written as-is,
//! without quoting, so embedded commas corrupt the row. The store is
//! the source of truth; the mirror is only a replay log.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::db::{ColumnDef, Database, InsertOutcome, Record, SqlType, SqlValue, TableDef, Where};
use crate::error::{MyWowError, Result};

pub const PREDICTIONS: &str = "predictions";
pub const RESULTS: &str = "results";
pub const CANDLES: &str = "candles";
pub const MARKET_TRADES: &str = "market_trades";
pub const MARKET_CANDLES: &str = "market_candles";

fn key() -> ColumnDef {
    ColumnDef {
        sql_type: SqlType::Text,
        primary_key: true,
        unique: true,
    }
}

fn plain(sql_type: SqlType) -> ColumnDef {
    ColumnDef {
        sql_type,
        primary_key: false,
        unique: false,
    }
}

fn table(columns: &[(&str, ColumnDef)]) -> TableDef {
    TableDef::from_columns(
        columns
            .iter()
            .map(|(name, def)| ((*name).to_string(), *def))
            .collect(),
    )
}

/// The authoritative table definitions, in mirror column order
fn table_definitions() -> Vec<(&'static str, TableDef)> {
    let prediction_columns = [
        ("prediction_id", key()),
        ("symbol", plain(SqlType::Text)),
        ("trading_pair", plain(SqlType::Text)),
        ("start_date", plain(SqlType::Date)),
        ("end_date", plain(SqlType::Date)),
        ("start_price", plain(SqlType::Real)),
        ("end_price", plain(SqlType::Real)),
        ("buy_price", plain(SqlType::Real)),
        ("sell_price", plain(SqlType::Real)),
    ];
    let mut result_columns = prediction_columns.to_vec();
    result_columns.push(("close_price", plain(SqlType::Real)));

    let candle_columns = |time_column: (&'static str, ColumnDef)| {
        vec![
            ("candle_id", key()),
            time_column,
            ("start", plain(SqlType::Int)),
            ("trading_pair", plain(SqlType::Text)),
            ("open", plain(SqlType::Real)),
            ("high", plain(SqlType::Real)),
            ("low", plain(SqlType::Real)),
            ("close", plain(SqlType::Real)),
            ("volume", plain(SqlType::Real)),
        ]
    };

    vec![
        (PREDICTIONS, table(&prediction_columns)),
        (RESULTS, table(&result_columns)),
        (CANDLES, table(&candle_columns(("date", plain(SqlType::Date))))),
        (
            MARKET_TRADES,
            table(&[
                ("trade_id", key()),
                ("trading_pair", plain(SqlType::Text)),
                ("price", plain(SqlType::Real)),
                ("size", plain(SqlType::Real)),
                ("time", plain(SqlType::DateTime)),
                ("side", plain(SqlType::Text)),
                ("bid", plain(SqlType::Real)),
                ("ask", plain(SqlType::Real)),
                ("exchange", plain(SqlType::Text)),
            ]),
        ),
        (
            MARKET_CANDLES,
            table(&candle_columns(("time", plain(SqlType::DateTime)))),
        ),
    ]
}

/// Reconciles the journal schema against one [`Database`] and its local
/// mirror directory. The only component that enforces the table
/// whitelist.
pub struct SetupService {
    db: Database,
    data_dir: PathBuf,
    tables: Vec<(&'static str, TableDef)>,
}

impl SetupService {
    pub fn new<P: Into<PathBuf>>(db: Database, data_dir: P) -> Self {
        SetupService {
            db,
            data_dir: data_dir.into(),
            tables: table_definitions(),
        }
    }

    /// Ensure every table exists with the expected definition and replay
    /// each mirror file into the store. Fatal on schema drift or a
    /// malformed mirror header.
    pub fn setup(&self) -> Result<()> {
        self.setup_local_storage()?;
        for (name, definition) in &self.tables {
            self.reconcile_table(name, definition)?;
            self.upload_local_table_data(name)?;
        }
        info!("schema setup complete: {} tables", self.tables.len());
        Ok(())
    }

    fn local_db_dir(&self) -> PathBuf {
        self.data_dir.join("local_db")
    }

    fn mirror_path(&self, table_name: &str) -> PathBuf {
        self.local_db_dir().join(format!("{table_name}.csv"))
    }

    /// Create the data directories and one mirror file per table. An
    /// existing mirror whose header disagrees with the registry is fatal:
    /// its rows would be read against the wrong column order.
    pub fn setup_local_storage(&self) -> Result<()> {
        fs::create_dir_all(self.local_db_dir())?;

        for (name, definition) in &self.tables {
            let path = self.mirror_path(name);
            let header = definition.header();
            if path.exists() {
                let contents = fs::read_to_string(&path)?;
                let existing = contents.lines().next().unwrap_or("");
                if existing != header {
                    return Err(MyWowError::InvalidLocalStorage(format!(
                        "{name}: header {existing:?} does not match {header:?}"
                    )));
                }
            } else {
                let mut file = fs::File::create(&path)?;
                writeln!(file, "{header}")?;
            }
        }
        Ok(())
    }

    /// Create the table if absent; otherwise compare the live definition
    /// against the expected one and refuse to run on any mismatch.
    fn reconcile_table(&self, table_name: &str, definition: &TableDef) -> Result<()> {
        if self.db.table_exists(table_name)? {
            let live = self.db.table_definition(table_name)?;
            if &live != definition {
                return Err(MyWowError::TableConstruction(format!(
                    "{table_name}: live definition {live:?} does not match expected {definition:?}"
                )));
            }
            return Ok(());
        }

        self.db
            .create_table(table_name, definition)
            .map_err(|e| match e {
                MyWowError::InvalidTableName(_) | MyWowError::InvalidValues(_) => {
                    MyWowError::TableConstruction(format!("{table_name}: {e}"))
                }
                other => other,
            })
    }

    /// Replay one mirror file into the store. Best-effort per row:
    /// duplicates and malformed rows are skipped, never aborting the
    /// replay. Returns the number of rows actually inserted.
    pub fn upload_local_table_data(&self, table_name: &str) -> Result<usize> {
        let definition = self.definition(table_name)?;
        let contents = fs::read_to_string(self.mirror_path(table_name))?;

        let mut inserted = 0;
        for line in contents.lines().skip(1) {
            if line.is_empty() {
                continue;
            }
            let record = match parse_mirror_line(line, definition) {
                Ok(record) => record,
                Err(e) => {
                    warn!("{table_name}: skipping mirror row: {e}");
                    continue;
                }
            };
            match self.db.insert_record(table_name, &record) {
                Ok(InsertOutcome::Inserted) => inserted += 1,
                Ok(InsertOutcome::SkippedDuplicate) => {}
                Err(MyWowError::InvalidValues(e)) => {
                    warn!("{table_name}: skipping mirror row: {e}");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(inserted)
    }

    fn definition(&self, table_name: &str) -> Result<&TableDef> {
        self.tables
            .iter()
            .find(|(name, _)| *name == table_name)
            .map(|(_, def)| def)
            .ok_or_else(|| MyWowError::InvalidDataSource(table_name.to_string()))
    }

    /// Fetch rows from a registered table
    pub fn get_items(
        &self,
        table_name: &str,
        limit: i64,
        where_clause: &Where,
        order_by: Option<&str>,
        columns: Option<&[&str]>,
    ) -> Result<Vec<Record>> {
        self.definition(table_name)?;
        self.db
            .get_rows(table_name, limit, where_clause, order_by, columns)
    }

    /// Insert a row into a registered table, mirroring it to the local
    /// file only when the store actually wrote it
    pub fn add_item(&self, table_name: &str, record: &Record) -> Result<InsertOutcome> {
        let definition = self.definition(table_name)?;
        let outcome = self.db.insert_record(table_name, record)?;
        if outcome == InsertOutcome::Inserted {
            self.append_mirror_line(table_name, definition, record)?;
        }
        Ok(outcome)
    }

    /// Delete matching rows from a registered table, rewriting the
    /// mirror so replay cannot resurrect them
    pub fn remove_item(
        &self,
        table_name: &str,
        where_values: &[(&str, SqlValue)],
    ) -> Result<usize> {
        self.definition(table_name)?;
        let removed = self.db.delete_where(table_name, where_values)?;
        if removed > 0 {
            self.rewrite_mirror(table_name)?;
        }
        Ok(removed)
    }

    fn append_mirror_line(
        &self,
        table_name: &str,
        definition: &TableDef,
        record: &Record,
    ) -> Result<()> {
        let line = mirror_line(definition, record)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.mirror_path(table_name))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn rewrite_mirror(&self, table_name: &str) -> Result<()> {
        let definition = self.definition(table_name)?;
        let rows = self.db.get_rows(table_name, -1, &Where::new(), None, None)?;

        let mut lines = Vec::with_capacity(rows.len() + 1);
        lines.push(definition.header());
        for row in &rows {
            lines.push(mirror_line(definition, row)?);
        }
        fs::write(self.mirror_path(table_name), lines.join("\n") + "\n")?;
        Ok(())
    }

    /// Shared access to the underlying row store
    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Zip a mirror line against the declared column order, parsing each
/// field to its declared type
fn parse_mirror_line(line: &str, definition: &TableDef) -> Result<Record> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != definition.len() {
        return Err(MyWowError::InvalidValues(format!(
            "expected {} fields, got {}",
            definition.len(),
            fields.len()
        )));
    }

    let mut record = Record::with_capacity(fields.len());
    for ((name, def), raw) in definition.columns().zip(fields) {
        record.insert(name.to_string(), SqlValue::parse(raw, def.sql_type)?);
    }
    Ok(record)
}

fn mirror_line(definition: &TableDef, record: &Record) -> Result<String> {
    let mut fields = Vec::with_capacity(definition.len());
    for (name, _) in definition.columns() {
        let value = record
            .get(name)
            .ok_or_else(|| MyWowError::InvalidValues(format!("record missing column {name}")))?;
        fields.push(value.raw());
    }
    Ok(fields.join(","))
}
