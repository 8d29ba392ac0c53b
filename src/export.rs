//! Writes API results to disk.
//!
//! - [`write_table`] turns a sequence of JSON objects into a spreadsheet,
//!   falling back once to CSV when the spreadsheet cannot be written.
//! - [`write_stream`] copies a byte stream into a file in 8 KiB chunks.
//!
//! Records are not validated against a schema. The column set is the union
//! of every record's keys in first-seen order, and a record lacking a
//! column gets an empty cell.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::error::{BoxError, Error, Result};

/// One exported row: field name to value.
pub type Record = Map<String, Value>;

/// Chunk size used when streaming downloads to disk.
pub const CHUNK_SIZE: usize = 8 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// File format a table ended up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Xlsx,
    Csv,
}

/// Result of [`write_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    /// The table was written to `path`.
    Written { path: PathBuf, format: TableFormat },
    /// There were no records; nothing was created.
    Skipped,
}

/// Writes `records` as a spreadsheet at `path`, creating parent
/// directories.
///
/// If the spreadsheet cannot be written, the same records are written as
/// UTF-8 CSV with a byte-order mark at `path` with a `.csv` extension.
/// An empty `records` slice is [`TableOutcome::Skipped`], not an error.
///
/// # Errors
///
/// `Error::Write` when both the spreadsheet and the CSV fallback failed.
pub fn write_table(records: &[Record], path: &Path) -> Result<TableOutcome> {
    if records.is_empty() {
        return Ok(TableOutcome::Skipped);
    }
    let columns = columns(records);

    let primary = match write_xlsx(records, &columns, path) {
        Ok(()) => {
            info!(path = %path.display(), rows = records.len(), "wrote spreadsheet");
            return Ok(TableOutcome::Written {
                path: path.to_path_buf(),
                format: TableFormat::Xlsx,
            });
        }
        Err(e) => e,
    };

    let csv_path = path.with_extension("csv");
    warn!(
        path = %path.display(),
        error = %primary,
        fallback = %csv_path.display(),
        "spreadsheet export failed, falling back to CSV"
    );
    match write_csv(records, &columns, &csv_path) {
        Ok(()) => {
            info!(path = %csv_path.display(), rows = records.len(), "wrote CSV");
            Ok(TableOutcome::Written {
                path: csv_path,
                format: TableFormat::Csv,
            })
        }
        Err(fallback) => Err(Error::Write {
            path: path.to_path_buf(),
            primary,
            fallback,
        }),
    }
}

/// Union of record keys, in first-seen order.
fn columns(records: &[Record]) -> Vec<&str> {
    let mut cols: Vec<&str> = Vec::new();
    for key in records.iter().flat_map(|r| r.keys()) {
        if !cols.contains(&key.as_str()) {
            cols.push(key);
        }
    }
    cols
}

/// A record value as it lands in a cell.
enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Cell::Empty,
            Some(Value::String(s)) => Cell::Text(s.clone()),
            Some(Value::Bool(b)) => Cell::Bool(*b),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(f) => Cell::Number(f),
                None => Cell::Text(n.to_string()),
            },
            // Arrays and nested objects are kept as compact JSON text.
            Some(other) => Cell::Text(other.to_string()),
        }
    }
}

/// CSV text for a value. Numbers keep their JSON spelling.
fn csv_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn write_xlsx(records: &[Record], columns: &[&str], path: &Path) -> std::result::Result<(), BoxError> {
    ensure_parent(path)?;

    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (c, name) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, u16::try_from(c)?, *name, &header)?;
    }
    for (r, record) in records.iter().enumerate() {
        let row = u32::try_from(r + 1)?;
        for (c, name) in columns.iter().enumerate() {
            let col = u16::try_from(c)?;
            match Cell::from_value(record.get(*name)) {
                Cell::Empty => {}
                Cell::Text(s) => {
                    sheet.write_string(row, col, s)?;
                }
                Cell::Number(n) => {
                    sheet.write_number(row, col, n)?;
                }
                Cell::Bool(b) => {
                    sheet.write_boolean(row, col, b)?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn write_csv(records: &[Record], columns: &[&str], path: &Path) -> std::result::Result<(), BoxError> {
    ensure_parent(path)?;

    let mut file = File::create(path)?;
    file.write_all(UTF8_BOM)?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(columns)?;
    for record in records {
        writer.write_record(columns.iter().map(|name| csv_field(record.get(*name))))?;
    }
    writer.flush()?;
    Ok(())
}

/// Copies `reader` into a new file at `path` in [`CHUNK_SIZE`] chunks,
/// creating parent directories. Returns the number of bytes written.
///
/// A partially written file is removed when the copy fails.
pub async fn write_stream<R: AsyncRead + Unpin>(mut reader: R, path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    let copied: std::io::Result<()> = async {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;
        }
        file.flush().await
    }
    .await;

    if let Err(e) = copied {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(e.into());
    }
    Ok(written)
}

/// `<prefix>_<name>_<timestamp>.<ext>` with `name` made filesystem-safe.
pub fn table_file_name(prefix: &str, name: &str, timestamp: &str, ext: &str) -> String {
    format!("{prefix}_{}_{timestamp}.{ext}", sanitize_component(name))
}

/// Replaces whitespace, path separators and characters Windows rejects
/// with `_`.
pub fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// The final path component of a remote file name, or `None` when nothing
/// usable remains (empty, `.` or `..`).
pub fn sanitize_file_name(remote: &str) -> Option<String> {
    let last = remote.rsplit(['/', '\\']).next().unwrap_or_default();
    match last {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// `path` itself, or `<stem>_<n>.<ext>` with the smallest `n` not in
/// `taken`.
pub fn unique_path(path: PathBuf, taken: &HashSet<PathBuf>) -> PathBuf {
    if !taken.contains(&path) {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1u32;
    loop {
        let name = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = path.with_file_name(name);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
