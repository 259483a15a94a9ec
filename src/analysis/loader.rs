//! Listings file ingestion and city discovery
//!
//! Reads one tabular dataset per city, either plain CSV or gzip-compressed
//! CSV (`.csv.gz`). Nothing here interprets column meanings; the output is a
//! raw header + string-rows table consumed once by the schema adapter.
//!
//! City files follow the `<city>listings.csv.gz` naming convention. When a
//! city has both a compressed and a plain file, the compressed one wins.

use csv::StringRecord;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Raw tabular data with unresolved column names.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
}

/// A row-level problem encountered during ingest. The row is skipped,
/// the run continues.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest accounting for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub rows_read: usize,
    pub row_errors: Vec<RowError>,
}

#[derive(Debug)]
pub enum LoadError {
    MissingSourceFile(PathBuf),
    MissingHeader(PathBuf),
    Io(std::io::Error),
    Csv(csv::Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSourceFile(path) => {
                write!(f, "source file missing: {}", path.display())
            }
            Self::MissingHeader(path) => {
                write!(f, "no header row in {}", path.display())
            }
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Csv(e) => write!(f, "CSV error: {}", e),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for LoadError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

/// Open a listings file as a byte stream, transparently decompressing
/// `.gz` files.
fn open_reader(path: &Path) -> Result<Box<dyn Read>, LoadError> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            LoadError::MissingSourceFile(path.to_path_buf())
        } else {
            LoadError::Io(e)
        }
    })?;

    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// Read a whole listings file into a `RawTable`.
///
/// Rows that fail CSV parsing are recorded in the stats and skipped;
/// short rows are tolerated (missing cells read as absent downstream).
pub fn read_raw_table(path: &Path) -> Result<(RawTable, IngestStats), LoadError> {
    let reader = open_reader(path)?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    if headers.is_empty() {
        return Err(LoadError::MissingHeader(path.to_path_buf()));
    }

    let headers: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            // A UTF-8 BOM can ride in on the first header of exported files.
            if i == 0 {
                h.trim_start_matches('\u{feff}').to_string()
            } else {
                h.to_string()
            }
        })
        .collect();

    let mut rows = Vec::new();
    let mut stats = IngestStats::default();

    for (idx, result) in csv_reader.records().enumerate() {
        // Header is line 1; data starts at line 2.
        let line = idx + 2;
        stats.rows_read += 1;
        match result {
            Ok(record) => rows.push(record),
            Err(e) => stats.row_errors.push(RowError {
                line,
                message: e.to_string(),
            }),
        }
    }

    if !stats.row_errors.is_empty() {
        tracing::warn!(
            path = %path.display(),
            skipped = stats.row_errors.len(),
            "skipped malformed rows during ingest"
        );
    }

    Ok((RawTable { headers, rows }, stats))
}

/// City identifier from a listings file name, e.g.
/// `"paris listings.csv.gz"` → `"paris"`. `None` when nothing is left
/// after stripping the convention suffix.
pub fn extract_city_id(file_name: &str) -> Option<String> {
    let stem = file_name
        .strip_suffix("listings.csv.gz")
        .or_else(|| file_name.strip_suffix("listings.csv"))?;
    let city = stem.trim().trim_end_matches(['_', '-', ' ']).to_string();
    if city.is_empty() {
        None
    } else {
        Some(city)
    }
}

/// Find every city listings file under a directory.
///
/// Returns city id → path, sorted by city id. `.csv.gz` is preferred over
/// `.csv` for the same city.
pub fn discover_city_files(dir: &Path) -> Result<BTreeMap<String, PathBuf>, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            LoadError::MissingSourceFile(dir.to_path_buf())
        } else {
            LoadError::Io(e)
        }
    })?;

    let mut cities: BTreeMap<String, PathBuf> = BTreeMap::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !(name.ends_with("listings.csv.gz") || name.ends_with("listings.csv")) {
            continue;
        }
        let Some(city) = extract_city_id(name) else {
            continue;
        };

        let is_gz = name.ends_with(".gz");
        match cities.get(&city) {
            Some(existing) => {
                let existing_gz = existing
                    .extension()
                    .map(|e| e == "gz")
                    .unwrap_or(false);
                if is_gz && !existing_gz {
                    cities.insert(city, path);
                }
            }
            None => {
                cities.insert(city, path);
            }
        }
    }
    Ok(cities)
}

/// Human-readable name for a known city id; unknown ids pass through.
pub fn display_name(city_id: &str) -> String {
    match city_id {
        "new_york" => "New York",
        "san_francisco" => "San Francisco",
        "los_angeles" => "Los Angeles",
        "boston" => "Boston",
        "seattle" => "Seattle",
        "london" => "London",
        "paris" => "Paris",
        "tokyo" => "Tokyo",
        "milan" => "Milan",
        "buenos_aires" => "Buenos Aires",
        other => other,
    }
    .to_string()
}
