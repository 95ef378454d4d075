// 🔍 Duplicate Guard - never load the same statement data twice
// Two granularities: Source File (content hash), Period (year + quarter)

use crate::db;
use crate::period::Period;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// GRANULARITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupGranularity {
    /// Same file bytes already loaded (renames and moves are still caught)
    #[default]
    SourceFile,

    /// Any fact already stored for the file's nominal (year, quarter)
    Period,
}

impl fmt::Display for DedupGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupGranularity::SourceFile => write!(f, "source-file"),
            DedupGranularity::Period => write!(f, "period"),
        }
    }
}

impl FromStr for DedupGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "source-file" | "file" => Ok(DedupGranularity::SourceFile),
            "period" => Ok(DedupGranularity::Period),
            other => Err(format!("unknown dedup granularity: {}", other)),
        }
    }
}

// ============================================================================
// GUARD
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    /// Nothing stored for this key; load the file
    Load,

    /// Already loaded; skip the whole file
    AlreadyLoaded { existing_rows: i64 },
}

impl GuardDecision {
    pub fn is_load(&self) -> bool {
        matches!(self, GuardDecision::Load)
    }
}

/// Consult the store before writing a financial-statement file.
///
/// With `Period` granularity the file needs a nominal period (hint or path);
/// files whose period only lives in their columns fall back to the
/// source-file check.
pub fn check_already_loaded(
    conn: &Connection,
    granularity: DedupGranularity,
    source_hash: &str,
    nominal_period: Option<Period>,
) -> rusqlite::Result<GuardDecision> {
    let existing_rows = match (granularity, nominal_period) {
        (DedupGranularity::Period, Some(period)) => db::count_facts_for_period(conn, period)?,
        _ => db::count_facts_for_source(conn, source_hash)?,
    };

    if existing_rows > 0 {
        Ok(GuardDecision::AlreadyLoaded { existing_rows })
    } else {
        Ok(GuardDecision::Load)
    }
}
