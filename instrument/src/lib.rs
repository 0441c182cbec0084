//! Event tables for exchange runs.
//!
//! A `tracing` subscriber turns every info-level event into a row of the
//! table named after the event's target. Columns appear as fields are first
//! seen; rows that lack a field hold null there.
//!
//! # Usage
//!
//! ```ignore
//! // In the engine:
//! tracing::info!(target: instrument::targets::FLOW, round, sender, receiver, flow);
//!
//! // In a test:
//! let tables = instrument::record(|| {
//!     exchange.advance_round().unwrap();
//! });
//! let flows = tables.frame(instrument::targets::FLOW).unwrap();
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Level, Metadata, Subscriber};

/// Targets the exchange emits rows under
pub mod targets {
    /// One row per candidate edge built
    pub const EDGE: &str = "edge";
    /// One row per edge that carried whole slots
    pub const FLOW: &str = "flow";
    /// One row per participant per round
    pub const BALANCE: &str = "balance";
    /// One row per round
    pub const ROUND: &str = "round";
}

// === VALUES & COLUMNS ===

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

/// A nullable, typed column. The type is fixed by the first value seen.
#[derive(Debug, Clone, PartialEq)]
pub enum EventColumn {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
}

impl EventColumn {
    fn empty_like(value: &Value, rows: usize) -> Self {
        match value {
            Value::Int(_) => Self::Int(vec![None; rows]),
            Value::Float(_) => Self::Float(vec![None; rows]),
            Value::Bool(_) => Self::Bool(vec![None; rows]),
            Value::Text(_) => Self::Text(vec![None; rows]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one cell. A value of another type than the column stores null,
    /// except that integers widen into float columns.
    fn push(&mut self, value: Option<Value>) {
        match (self, value) {
            (Self::Int(v), Some(Value::Int(x))) => v.push(Some(x)),
            (Self::Float(v), Some(Value::Float(x))) => v.push(Some(x)),
            (Self::Float(v), Some(Value::Int(x))) => v.push(Some(x as f64)),
            (Self::Bool(v), Some(Value::Bool(x))) => v.push(Some(x)),
            (Self::Text(v), Some(Value::Text(x))) => v.push(Some(x)),
            (Self::Int(v), _) => v.push(None),
            (Self::Float(v), _) => v.push(None),
            (Self::Bool(v), _) => v.push(None),
            (Self::Text(v), _) => v.push(None),
        }
    }

    fn to_polars(&self, name: &str) -> Column {
        let name: PlSmallStr = name.into();
        match self {
            Self::Int(v) => Column::new(name, v),
            Self::Float(v) => Column::new(name, v),
            Self::Bool(v) => Column::new(name, v),
            Self::Text(v) => Column::new(name, v),
        }
    }
}

// === TABLES ===

/// All rows recorded under one target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    columns: BTreeMap<String, EventColumn>,
    rows: usize,
}

impl EventTable {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&EventColumn> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Integer column with nulls read as 0
    pub fn ints(&self, name: &str) -> Option<Vec<i64>> {
        match self.columns.get(name)? {
            EventColumn::Int(v) => Some(v.iter().map(|x| x.unwrap_or(0)).collect()),
            _ => None,
        }
    }

    /// Float column with nulls read as 0.0
    pub fn floats(&self, name: &str) -> Option<Vec<f64>> {
        match self.columns.get(name)? {
            EventColumn::Float(v) => Some(v.iter().map(|x| x.unwrap_or(0.0)).collect()),
            _ => None,
        }
    }

    fn push_row(&mut self, row: Vec<(String, Value)>) {
        let mut row: BTreeMap<String, Value> = row.into_iter().collect();
        for (name, value) in &row {
            if !self.columns.contains_key(name) {
                self.columns
                    .insert(name.clone(), EventColumn::empty_like(value, self.rows));
            }
        }
        for (name, column) in self.columns.iter_mut() {
            column.push(row.remove(name));
        }
        self.rows += 1;
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        DataFrame::new(
            self.columns
                .iter()
                .map(|(name, column)| column.to_polars(name))
                .collect(),
        )
    }
}

/// Every table recorded, keyed by target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    tables: BTreeMap<String, EventTable>,
}

impl Tables {
    pub fn get(&self, target: &str) -> Option<&EventTable> {
        self.tables.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// One target's table as a DataFrame
    pub fn frame(&self, target: &str) -> Option<PolarsResult<DataFrame>> {
        self.tables.get(target).map(EventTable::to_dataframe)
    }

    pub fn to_dataframes(&self) -> PolarsResult<BTreeMap<String, DataFrame>> {
        self.tables
            .iter()
            .map(|(name, table)| Ok((name.clone(), table.to_dataframe()?)))
            .collect()
    }

    /// Write each table to `{dir}/{target}.parquet`
    pub fn save_parquet(&self, dir: &Path) -> PolarsResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| PolarsError::IO {
            error: e.into(),
            msg: None,
        })?;
        for (name, mut df) in self.to_dataframes()? {
            let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(|e| {
                PolarsError::IO {
                    error: e.into(),
                    msg: None,
                }
            })?;
            ParquetWriter::new(file).finish(&mut df)?;
        }
        Ok(())
    }
}

thread_local! {
    static TABLES: RefCell<Tables> = RefCell::default();
}

// === SUBSCRIBER ===

/// Collects an event's fields as (name, value) pairs
#[derive(Default)]
struct RowVisitor {
    row: Vec<(String, Value)>,
}

impl Visit for RowVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.row.push((field.name().to_string(), Value::Int(value)));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        self.row.push((field.name().to_string(), Value::Int(value)));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.row.push((field.name().to_string(), Value::Float(value)));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.row.push((field.name().to_string(), Value::Bool(value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.row
            .push((field.name().to_string(), Value::Text(value.to_string())));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}

/// Subscriber that appends events at or above `min_level` to the
/// thread-local tables. Spans are ignored.
pub struct TableSubscriber {
    min_level: Level,
}

impl Default for TableSubscriber {
    fn default() -> Self {
        Self {
            min_level: Level::INFO,
        }
    }
}

impl TableSubscriber {
    pub fn with_min_level(min_level: Level) -> Self {
        Self { min_level }
    }
}

impl Subscriber for TableSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= self.min_level
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut visitor = RowVisitor::default();
        event.record(&mut visitor);
        let target = event.metadata().target().to_string();
        TABLES.with(|t| {
            t.borrow_mut()
                .tables
                .entry(target)
                .or_default()
                .push_row(visitor.row)
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install `TableSubscriber` as the global default. Later calls are no-ops.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(TableSubscriber::default());
}

/// Take everything recorded on this thread so far
pub fn drain() -> Tables {
    TABLES.with(|t| std::mem::take(&mut *t.borrow_mut()))
}

pub fn clear() {
    TABLES.with(|t| *t.borrow_mut() = Tables::default());
}

/// Run `f` under a scoped `TableSubscriber` and return what it recorded.
/// Anything recorded on this thread beforehand is discarded.
pub fn record<F: FnOnce()>(f: F) -> Tables {
    clear();
    tracing::subscriber::with_default(TableSubscriber::default(), f);
    drain()
}

// === SCOPED RECORDER ===

/// Guard that records for its lifetime and writes parquet files on drop.
///
/// ```ignore
/// let mut rec = instrument::ScopedRecorder::new("data", "ten_rounds");
/// // ... run the exchange ...
/// let tables = rec.get();
/// // rec drops -> data/ten_rounds/{edge,flow,balance,round}.parquet
/// ```
pub struct ScopedRecorder {
    run_dir: PathBuf,
    tables: Option<Tables>,
}

impl ScopedRecorder {
    /// Records into `{parent}/{name}/`, with `name` reduced to `[A-Za-z0-9_]`
    pub fn new(parent: impl Into<PathBuf>, name: &str) -> Self {
        let name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(60)
            .collect();
        clear();
        install_subscriber();
        Self {
            run_dir: parent.into().join(name),
            tables: None,
        }
    }

    /// Drain on first call; later calls return the same tables
    pub fn get(&mut self) -> &Tables {
        self.tables.get_or_insert_with(drain)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let tables = self.tables.take().unwrap_or_else(drain);
        if tables.is_empty() {
            return;
        }
        if let Err(e) = tables.save_parquet(&self.run_dir) {
            eprintln!("ScopedRecorder: failed to write {}: {e}", self.run_dir.display());
        }
    }
}
