// 🗂️ Source Files - discovery, classification and decoding
// Directory tree → SourceFile list → RawTable (headers + records)

use crate::error::IngestError;
use crate::period::Period;
use crate::probe::ProbeResult;
use crate::schema::EntityKind;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

// ============================================================================
// CORE TYPES
// ============================================================================

/// FileKind - which table a file feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileKind {
    /// Provider registry (Relatorio_cadop.csv and friends)
    ProviderRegistry,
    /// Quarterly accounting statements
    FinancialStatements,
}

impl FileKind {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            FileKind::ProviderRegistry => "provider registry",
            FileKind::FinancialStatements => "financial statements",
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            FileKind::ProviderRegistry => EntityKind::Provider,
            FileKind::FinancialStatements => EntityKind::FinancialFact,
        }
    }
}

/// One input file, as handed over by the fetcher or found on disk
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub kind: FileKind,
    /// Period the fetcher already knows, if any; wins over the path
    pub period_hint: Option<Period>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        SourceFile {
            kind: detect_kind(&path),
            path,
            period_hint: None,
        }
    }

    /// Builder pattern: add period hint
    pub fn with_period_hint(mut self, period: Period) -> Self {
        self.period_hint = Some(period);
        self
    }

    /// Builder pattern: force the kind (explicit --providers files)
    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    /// Path as stored in provenance columns
    pub fn display_path(&self) -> String {
        self.path.display().to_string()
    }
}

/// Detect file kind from the file name
///
/// # Examples:
/// ```text
/// detect_kind("Relatorio_cadop.csv") → ProviderRegistry
/// detect_kind("operadoras_ativas.csv") → ProviderRegistry
/// detect_kind("3T2023.csv") → FinancialStatements
/// detect_kind("top10_operadoras_ultimo_ano_2023.csv") → FinancialStatements
/// ```
pub fn detect_kind(path: &Path) -> FileKind {
    let filename = lowercase_file_name(path);

    if !is_ranking_export(path) && (filename.contains("cadop") || filename.contains("operadoras")) {
        return FileKind::ProviderRegistry;
    }

    FileKind::FinancialStatements
}

/// A ranking CSV written by the report command (top{N}_operadoras_ultimo_*).
/// Never an input, even when exported under data_dir.
pub fn is_ranking_export(path: &Path) -> bool {
    let filename = lowercase_file_name(path);
    filename.starts_with("top") && filename.contains("_operadoras_ultimo_")
}

fn lowercase_file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn is_delimited_text(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false)
}

// ============================================================================
// DISCOVERY
// ============================================================================

/// Walk a directory tree and list every delimited-text file in it.
/// Registry files come first so facts can be joined to names right away;
/// within a kind, files are ordered by path.
pub fn discover(data_dir: &Path) -> Result<Vec<SourceFile>> {
    if !data_dir.is_dir() {
        bail!("data directory not found: {}", data_dir.display());
    }

    let mut files: Vec<SourceFile> = WalkDir::new(data_dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_delimited_text(p) && !is_ranking_export(p))
        .map(SourceFile::new)
        .collect();

    files.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.path.cmp(&b.path)));

    debug!(dir = %data_dir.display(), files = files.len(), "discovered source files");
    Ok(files)
}

// ============================================================================
// DECODING
// ============================================================================

/// A decoded file: header row plus data records with their source line
#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<(usize, csv::StringRecord)>,
    /// SHA-256 of the raw bytes, hex
    pub content_hash: String,
}

/// Read the whole file, decode it with the probed encoding and split it on
/// the probed delimiter. Short and long rows are kept; the resolver treats
/// missing cells as blank.
pub fn read_table(path: &Path, probe: &ProbeResult) -> Result<RawTable, IngestError> {
    let bytes = fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let content_hash = format!("{:x}", Sha256::digest(&bytes));

    let (text, had_errors) = probe.encoding.decode_with_bom_removal(&bytes);
    if had_errors {
        // the probe only saw a prefix; later bytes may still be off
        warn!(
            file = %path.display(),
            encoding = probe.encoding.name(),
            "undecodable bytes replaced after the probed prefix"
        );
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(probe.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(i + 2);
        records.push((line, record));
    }

    Ok(RawTable {
        headers,
        records,
        content_hash,
    })
}
