//! CSV table files that only ever grow.
//!
//! Each file carries a header with the union of every field name written to
//! it, in first-seen order. When a record brings a new field, the whole file
//! is rewritten with the wider header so every row keeps the header's shape.
//! Reads never fail: a missing or broken file reads as empty.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::index::IdIndex;
use crate::record::{self, Record, ID_FIELD};

static NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w]+").unwrap());
static UNDERSCORES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

/// Header plus data rows. Every row has exactly `headers.len()` cells.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Rows the lenient parse could not fit under the header.
    pub skipped: usize,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

// ── Reading ──

/// Read a whole table. Missing or empty files give an empty table.
///
/// A strict parse is tried first; if it fails, the file is re-read leniently:
/// short rows are padded, over-long or unreadable rows are skipped.
pub fn read_table(path: &Path) -> Table {
    if !path.exists() {
        return Table::default();
    }
    match read_strict(path) {
        Ok(table) => table,
        Err(e) => {
            warn!("Malformed table {}: {}; falling back to lenient parse", path.display(), e);
            read_lenient(path)
        }
    }
}

fn read_strict(path: &Path) -> Result<Table, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new().from_path(path)?;
    let headers: Vec<String> = rdr.headers()?.iter().map(String::from).collect();
    let rows = rdr
        .records()
        .map(|r| r.map(|rec| rec.iter().map(String::from).collect()))
        .collect::<Result<Vec<Vec<String>>, _>>()?;
    Ok(Table { headers, rows, skipped: 0 })
}

fn read_lenient(path: &Path) -> Table {
    let mut rdr = match csv::ReaderBuilder::new().flexible(true).from_path(path) {
        Ok(rdr) => rdr,
        Err(e) => {
            warn!("Cannot open {}: {}", path.display(), e);
            return Table::default();
        }
    };
    let headers: Vec<String> = match rdr.byte_headers() {
        Ok(h) => h.iter().map(lossy).collect(),
        Err(e) => {
            warn!("Unreadable header in {}: {}", path.display(), e);
            return Table::default();
        }
    };

    let width = headers.len();
    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for rec in rdr.byte_records() {
        // With flexible parsing the only remaining errors are I/O errors.
        let Ok(rec) = rec else { break };
        if rec.len() > width {
            skipped += 1;
            continue;
        }
        let mut row: Vec<String> = rec.iter().map(lossy).collect();
        row.resize(width, String::new());
        rows.push(row);
    }
    if skipped > 0 {
        warn!("Skipped {} malformed rows in {}", skipped, path.display());
    }
    Table { headers, rows, skipped }
}

fn lossy(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

/// Column names of an existing file, reading nothing past the header line.
fn read_header(path: &Path) -> Vec<String> {
    if !path.exists() {
        return Vec::new();
    }
    let mut rdr = match csv::ReaderBuilder::new().flexible(true).from_path(path) {
        Ok(rdr) => rdr,
        Err(e) => {
            warn!("Cannot open {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    match rdr.byte_headers() {
        Ok(h) => h.iter().map(lossy).collect(),
        Err(e) => {
            warn!("Unreadable header in {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Number of data rows stored; 0 for a missing, empty or unreadable file.
pub fn count_records(path: &Path) -> usize {
    read_table(path).rows.len()
}

/// Every non-empty `resume_id` stored in the file.
pub fn load_identifiers(path: &Path) -> IdIndex {
    let table = read_table(path);
    let Some(col) = table.column(ID_FIELD) else {
        return IdIndex::new();
    };
    table
        .rows
        .iter()
        .map(|row| row[col].trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Writing ──

/// Append one record unless its identifier is already in `index`.
///
/// Returns `Ok(false)` for a known identifier (nothing written, index
/// untouched) and `Ok(true)` once the row is on disk. New fields widen the
/// file's header first, blanking the new cells of older rows. Records without
/// an identifier are always appended; a record with no fields at all is not.
pub fn append_record(
    record: &Record,
    path: &Path,
    index: &mut IdIndex,
) -> Result<bool, StoreError> {
    let id = record::identifier(record);
    if let Some(id) = &id {
        if index.contains(id) {
            debug!("{} already stored in {}", id, path.display());
            return Ok(false);
        }
    }

    let normalized = record::normalize(record);
    if normalized.is_empty() {
        debug!("Empty record not written to {}", path.display());
        return Ok(false);
    }
    ensure_parent(path)?;

    let existing = read_header(path);
    let columns: Vec<String> = if existing.is_empty() {
        normalized.keys().cloned().collect()
    } else {
        let added: Vec<String> = normalized
            .keys()
            .filter(|k| !existing.contains(k))
            .cloned()
            .collect();
        let mut columns = existing.clone();
        if !added.is_empty() {
            columns.extend(added.iter().cloned());
            info!("Adding columns {:?} to {}", added, path.display());
            rewrite_with_columns(path, &columns)?;
        }
        columns
    };

    let row: Vec<String> = columns
        .iter()
        .map(|c| normalized.get(c).map(record::cell_text).unwrap_or_default())
        .collect();
    append_row(path, existing.is_empty().then_some(columns.as_slice()), &row)?;

    if let Some(id) = id {
        index.insert(id);
    }
    Ok(true)
}

/// Rewrite the file so its header is `columns`, a superset of the current one.
/// Goes through a temp file in the same directory so the swap is atomic.
fn rewrite_with_columns(path: &Path, columns: &[String]) -> Result<(), StoreError> {
    let table = read_table(path);
    if table.skipped > 0 {
        warn!(
            "Dropping {} malformed rows from {} while widening its header",
            table.skipped,
            path.display()
        );
    }
    let positions: Vec<Option<usize>> = columns.iter().map(|c| table.column(c)).collect();

    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
    {
        let mut wtr = csv::Writer::from_writer(tmp.as_file_mut());
        wtr.write_record(columns).map_err(|e| StoreError::csv(path, e))?;
        for row in &table.rows {
            let widened = positions
                .iter()
                .map(|p| p.and_then(|i| row.get(i)).map(String::as_str).unwrap_or(""));
            wtr.write_record(widened).map_err(|e| StoreError::csv(path, e))?;
        }
        wtr.flush().map_err(|e| StoreError::io(path, e))?;
    }
    tmp.persist(path).map_err(|source| StoreError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Rewrote {} rows of {} with {} columns", table.rows.len(), path.display(), columns.len());
    Ok(())
}

fn append_row(path: &Path, header: Option<&[String]>, row: &[String]) -> Result<(), StoreError> {
    let needs_newline = !ends_with_newline(path).map_err(|e| StoreError::io(path, e))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    if needs_newline {
        file.write_all(b"\n").map_err(|e| StoreError::io(path, e))?;
    }

    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if let Some(h) = header {
        wtr.write_record(h).map_err(|e| StoreError::csv(path, e))?;
    }
    wtr.write_record(row).map_err(|e| StoreError::csv(path, e))?;
    wtr.flush().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// True for a missing or empty file, or one whose last byte is `\n`.
fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))
}

// ── Per-query files ──

/// Lowercased query with every run of non-word characters collapsed to `_`.
pub fn slugify(query: &str) -> String {
    let lowered = query.trim().to_lowercase();
    let slug = NON_WORD_RE.replace_all(&lowered, "_");
    let slug = UNDERSCORES_RE.replace_all(&slug, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "all".to_string()
    } else {
        slug.to_string()
    }
}

/// `data/resumes.csv` + `"Rust dev"` → `data/resumes_rust_dev.csv`
pub fn query_output_path(base: &Path, query: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resumes".to_string());
    let suffix = base
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    base.with_file_name(format!("{}_{}{}", stem, slugify(query), suffix))
}
