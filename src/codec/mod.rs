//! # Record Codec
//!
//! Converts typed records to and from flat-file rows. This is the only
//! place in the crate where strings become numbers.
//!
//! Two decode modes:
//!
//! | Mode | Used for | Numeric failure |
//! |------|----------|-----------------|
//! | `Strict` | files this tool produced | row error, aborts the batch |
//! | `Tolerant` | historical producers | field default, row kept |
//!
//! Encoding is deterministic: a fixed column order per entity, quote-all for
//! text-heavy rows (books) and minimal quoting for mostly numeric rows.

pub mod coords;
pub mod legacy;
pub mod records;

use std::cell::Cell;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read, Write};
use std::marker::PhantomData;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

pub use coords::{CoordinateDecode, decode_coordinates, read_coordinates};

/// Number of skipped rows logged individually before going quiet.
const SKIP_LOG_LIMIT: u64 = 5;

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

// ============================================================================
// Decode mode
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Header-keyed, minimally quoted; malformed numbers are errors.
    Strict,
    /// Space-after-comma, multiply quoted; malformed numbers become defaults.
    Tolerant,
}

impl std::fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeMode::Strict => write!(f, "strict"),
            DecodeMode::Tolerant => write!(f, "tolerant"),
        }
    }
}

// ============================================================================
// CsvRecord
// ============================================================================

/// An entity with a flat-file representation.
pub trait CsvRecord: Sized {
    /// Column order written by `encode`.
    const HEADER: &'static [&'static str];

    /// Quoting used when writing.
    const QUOTE: csv::QuoteStyle;

    /// Positional layouts of headerless historical files, keyed by field count.
    const LEGACY: &'static [&'static [&'static str]] = &[];

    /// Field values in `HEADER` order.
    fn encode(&self) -> Vec<String>;

    /// Build a record from one row. Only errors on structurally unusable rows
    /// (tolerant) or on any coercion failure (strict).
    fn decode(row: &Row<'_>) -> Result<Self>;
}

// ============================================================================
// Row view
// ============================================================================

/// One decoded line with its column names.
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [String],
    line: u64,
    mode: DecodeMode,
    coerced: Cell<u64>,
}

impl<'a> Row<'a> {
    pub fn new(columns: &'a [String], values: &'a [String], line: u64, mode: DecodeMode) -> Self {
        Self { columns, values, line, mode, coerced: Cell::new(0) }
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Fields that were present but unusable and fell back to a default.
    pub fn coerced(&self) -> u64 {
        self.coerced.get()
    }

    fn raw(&self, name: &str) -> Option<&'a str> {
        let idx = self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(idx).map(String::as_str)
    }

    fn coerce(&self) {
        self.coerced.set(self.coerced.get() + 1);
    }

    fn error(&self, message: String) -> Error {
        Error::Decode { line: self.line, message }
    }

    /// Text value; empty when the column is absent.
    pub fn text(&self, name: &str) -> String {
        match (self.raw(name), self.mode) {
            (None, _) => String::new(),
            (Some(v), DecodeMode::Strict) => v.to_string(),
            (Some(v), DecodeMode::Tolerant) => legacy::clean_value(v),
        }
    }

    pub fn opt_text(&self, name: &str) -> Option<String> {
        let value = self.text(name);
        (!value.is_empty()).then_some(value)
    }

    pub fn required(&self, name: &str) -> Result<String> {
        self.opt_text(name)
            .ok_or_else(|| self.error(format!("missing required field `{name}`")))
    }

    /// Float with a default for absent or empty fields.
    pub fn float_or(&self, name: &str, default: f64) -> Result<f64> {
        let Some(raw) = self.raw(name) else { return Ok(default) };
        match self.mode {
            DecodeMode::Strict => {
                let value = raw.trim();
                if value.is_empty() {
                    return Ok(default);
                }
                value
                    .parse::<f64>()
                    .map_err(|_| self.error(format!("field `{name}` is not a number: {value:?}")))
            }
            DecodeMode::Tolerant => Ok(legacy::parse_float(raw).unwrap_or_else(|| {
                if !is_null_like(raw) {
                    self.coerce();
                }
                default
            })),
        }
    }

    /// Integer with a default for absent or empty fields.
    pub fn int_or(&self, name: &str, default: i32) -> Result<i32> {
        Ok(self.opt_int(name)?.unwrap_or(default))
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i32>> {
        let Some(raw) = self.raw(name) else { return Ok(None) };
        match self.mode {
            DecodeMode::Strict => {
                let value = raw.trim();
                if value.is_empty() {
                    return Ok(None);
                }
                value
                    .parse::<i32>()
                    .map(Some)
                    .map_err(|_| self.error(format!("field `{name}` is not an integer: {value:?}")))
            }
            DecodeMode::Tolerant => {
                let parsed = legacy::parse_int(raw);
                if parsed.is_none() && !is_null_like(raw) {
                    self.coerce();
                }
                Ok(parsed)
            }
        }
    }

    /// UUID field. Invalid values become `None` in both modes.
    pub fn opt_uuid(&self, name: &str) -> Option<Uuid> {
        let value = self.opt_text(name)?;
        match Uuid::parse_str(value.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                self.coerce();
                None
            }
        }
    }

    pub fn opt_datetime(&self, name: &str) -> Result<Option<NaiveDateTime>> {
        let Some(value) = self.opt_text(name) else { return Ok(None) };
        let value = value.trim();
        let parsed = DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok());
        match (parsed, self.mode) {
            (Some(ts), _) => Ok(Some(ts)),
            (None, DecodeMode::Strict) => {
                Err(self.error(format!("field `{name}` is not a timestamp: {value:?}")))
            }
            (None, DecodeMode::Tolerant) => {
                self.coerce();
                Ok(None)
            }
        }
    }
}

fn is_null_like(raw: &str) -> bool {
    let cleaned = legacy::clean_number(raw);
    cleaned.is_empty() || cleaned.eq_ignore_ascii_case("null")
}

/// Render a float so it parses back to the same value.
pub(crate) fn fmt_float(value: f64) -> String {
    format!("{value:?}")
}

pub(crate) fn fmt_datetime(value: Option<NaiveDateTime>) -> String {
    value.map(|ts| ts.format(DATETIME_FORMATS[0]).to_string()).unwrap_or_default()
}

// ============================================================================
// Reader
// ============================================================================

/// Running counters for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadStats {
    /// Rows decoded into records.
    pub rows: u64,
    /// Rows dropped as unusable (tolerant mode only).
    pub skipped: u64,
    /// Fields resolved to their default because the value was malformed.
    pub coerced: u64,
}

enum Source<R: Read> {
    Strict(csv::StringRecordsIntoIter<R>),
    Tolerant(Lines<BufReader<R>>),
}

/// Streaming decoder over one flat file. Holds one row at a time.
pub struct RecordReader<T, R: Read = File> {
    source: Source<R>,
    header: Option<Vec<String>>,
    legacy: Vec<Vec<String>>,
    pending: Option<(u64, String)>,
    mode: DecodeMode,
    line: u64,
    stats: ReadStats,
    _record: PhantomData<fn() -> T>,
}

impl<T: CsvRecord> RecordReader<T, File> {
    pub fn open(path: &Path, mode: DecodeMode) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }
        Self::from_reader(File::open(path)?, mode)
    }
}

impl<T: CsvRecord, R: Read> RecordReader<T, R> {
    pub fn from_reader(reader: R, mode: DecodeMode) -> Result<Self> {
        let legacy = T::LEGACY
            .iter()
            .map(|layout| layout.iter().map(|c| c.to_string()).collect())
            .collect();

        match mode {
            DecodeMode::Strict => {
                let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
                let header = rdr
                    .headers()?
                    .iter()
                    .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
                    .collect();
                Ok(Self {
                    source: Source::Strict(rdr.into_records()),
                    header: Some(header),
                    legacy,
                    pending: None,
                    mode,
                    line: 1,
                    stats: ReadStats::default(),
                    _record: PhantomData,
                })
            }
            DecodeMode::Tolerant => {
                let mut lines = BufReader::new(reader).lines();
                let mut line_no = 0;
                let mut header = None;
                let mut pending = None;

                while let Some(record) = next_record(&mut lines, &mut line_no) {
                    let (start, line) = record?;
                    let line = line.trim_start_matches('\u{feff}').to_string();
                    if line.trim().is_empty() {
                        continue;
                    }
                    let fields: Vec<String> =
                        legacy::split_line(&line).iter().map(|f| legacy::clean_value(f)).collect();
                    if looks_like_header::<T>(&fields) {
                        header = Some(fields);
                    } else {
                        pending = Some((start, line));
                    }
                    break;
                }

                Ok(Self {
                    source: Source::Tolerant(lines),
                    header,
                    legacy,
                    pending,
                    mode,
                    line: line_no,
                    stats: ReadStats::default(),
                    _record: PhantomData,
                })
            }
        }
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    fn next_fields(&mut self) -> Option<Result<(u64, Vec<String>)>> {
        match &mut self.source {
            Source::Strict(records) => {
                let record = match records.next()? {
                    Ok(record) => record,
                    Err(e) => return Some(Err(e.into())),
                };
                self.line = record.position().map(|p| p.line()).unwrap_or(self.line + 1);
                Some(Ok((self.line, record.iter().map(str::to_string).collect())))
            }
            Source::Tolerant(lines) => loop {
                let (line_no, line) = match self.pending.take() {
                    Some(pending) => pending,
                    None => match next_record(lines, &mut self.line)? {
                        Ok(record) => record,
                        Err(e) => return Some(Err(e.into())),
                    },
                };
                if line.trim().is_empty() {
                    continue;
                }
                return Some(Ok((line_no, legacy::split_line(&line))));
            },
        }
    }
}

impl<T: CsvRecord, R: Read> Iterator for RecordReader<T, R> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        loop {
            let (line, values) = match self.next_fields()? {
                Ok(fields) => fields,
                Err(e) => return Some(Err(e)),
            };

            let columns = match &self.header {
                Some(header) => header.as_slice(),
                None => match self.legacy.iter().find(|layout| layout.len() == values.len()) {
                    Some(layout) => layout.as_slice(),
                    None => {
                        self.stats.skipped += 1;
                        if self.stats.skipped <= SKIP_LOG_LIMIT {
                            tracing::warn!(line, fields = values.len(), "Skipping row with unrecognised layout");
                        }
                        continue;
                    }
                },
            };

            let row = Row::new(columns, &values, line, self.mode);
            match T::decode(&row) {
                Ok(record) => {
                    self.stats.rows += 1;
                    self.stats.coerced += row.coerced();
                    return Some(Ok(record));
                }
                Err(e) if self.mode == DecodeMode::Tolerant => {
                    self.stats.skipped += 1;
                    if self.stats.skipped <= SKIP_LOG_LIMIT {
                        tracing::warn!(line, error = %e, "Skipping malformed row");
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Next logical record of a tolerant file with the line it starts on.
/// Physical lines are joined while a quoted field is still open.
fn next_record<B: BufRead>(lines: &mut Lines<B>, line_no: &mut u64) -> Option<std::io::Result<(u64, String)>> {
    let mut record = match lines.next()? {
        Ok(line) => line,
        Err(e) => return Some(Err(e)),
    };
    *line_no += 1;
    let start = *line_no;

    let mut joined = 1;
    while legacy::has_open_quote(&record) && joined < legacy::MAX_RECORD_LINES {
        match lines.next() {
            Some(Ok(line)) => {
                *line_no += 1;
                joined += 1;
                record.push('\n');
                record.push_str(&line);
            }
            Some(Err(e)) => return Some(Err(e)),
            None => break,
        }
    }
    if legacy::has_open_quote(&record) {
        tracing::warn!(line = start, lines = joined, "Unterminated quote, record cut short");
    }
    Some(Ok((start, record)))
}

fn looks_like_header<T: CsvRecord>(fields: &[String]) -> bool {
    let known = |name: &str| {
        T::HEADER.iter().any(|h| h.eq_ignore_ascii_case(name))
            || T::LEGACY.iter().flat_map(|l| l.iter()).any(|h| h.eq_ignore_ascii_case(name))
    };
    let hits = fields.iter().filter(|f| known(f)).count();
    hits >= fields.len().min(2)
}

// ============================================================================
// Writer
// ============================================================================

/// Header-first CSV writer for one entity type.
pub struct RecordWriter<T, W: Write = File> {
    inner: csv::Writer<W>,
    rows: u64,
    _record: PhantomData<fn(&T)>,
}

impl<T: CsvRecord> RecordWriter<T, File> {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_writer(File::create(path)?)
    }
}

impl<T: CsvRecord, W: Write> RecordWriter<T, W> {
    pub fn from_writer(writer: W) -> Result<Self> {
        let mut inner = csv::WriterBuilder::new().quote_style(T::QUOTE).from_writer(writer);
        inner.write_record(T::HEADER)?;
        Ok(Self { inner, rows: 0, _record: PhantomData })
    }

    pub fn write(&mut self, record: &T) -> Result<()> {
        self.inner.write_record(record.encode())?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_all<'r>(&mut self, records: impl IntoIterator<Item = &'r T>) -> Result<()>
    where
        T: 'r,
    {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    /// Flush and return the number of data rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.inner.flush()?;
        Ok(self.rows)
    }

    pub fn into_inner(self) -> Result<W> {
        self.inner.into_inner().map_err(|e| Error::Io(e.into_error()))
    }
}

// ============================================================================
// Single-row helpers
// ============================================================================

/// Encode one record as a CSV line (no header, no trailing newline).
pub fn encode_row<T: CsvRecord>(record: &T) -> Result<String> {
    let mut inner = csv::WriterBuilder::new().quote_style(T::QUOTE).from_writer(Vec::new());
    inner.write_record(record.encode())?;
    let bytes = inner.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    let line = String::from_utf8_lossy(&bytes);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Decode one headerless line. Strict lines use `HEADER` order; tolerant
/// lines use `HEADER` or the legacy layout matching the field count.
pub fn decode_line<T: CsvRecord>(line: &str, mode: DecodeMode) -> Result<T> {
    let header: Vec<String> = T::HEADER.iter().map(|c| c.to_string()).collect();
    match mode {
        DecodeMode::Strict => {
            let mut rdr = csv::ReaderBuilder::new().has_headers(false).from_reader(line.as_bytes());
            let record = rdr
                .records()
                .next()
                .ok_or_else(|| Error::Decode { line: 1, message: "empty line".into() })??;
            let values: Vec<String> = record.iter().map(str::to_string).collect();
            T::decode(&Row::new(&header, &values, 1, mode))
        }
        DecodeMode::Tolerant => {
            let values = legacy::split_line(line);
            let columns: Vec<String> = if values.len() == header.len() {
                header
            } else {
                T::LEGACY
                    .iter()
                    .find(|layout| layout.len() == values.len())
                    .map(|layout| layout.iter().map(|c| c.to_string()).collect())
                    .ok_or_else(|| Error::Decode {
                        line: 1,
                        message: format!("no layout with {} fields", values.len()),
                    })?
            };
            T::decode(&Row::new(&columns, &values, 1, mode))
        }
    }
}
