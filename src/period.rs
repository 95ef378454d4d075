// 📅 Period Resolver - (year, quarter) from columns, hints or path names
//
// Precedence per row: explicit year/quarter columns, then a date column,
// then the Fetcher's hint, then path inference.

use crate::error::IngestError;
use crate::schema::{CanonicalField, ResolvedSchema};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

// ============================================================================
// PERIOD VALUE
// ============================================================================

/// One reporting cycle. Ordered by (year, quarter), so `max()` is the latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub quarter: u8,
}

impl Period {
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        if (1000..=9999).contains(&year) && (1..=4).contains(&quarter) {
            Some(Period { year, quarter })
        } else {
            None
        }
    }

    pub fn from_month(year: i32, month: u32) -> Option<Self> {
        if !(1..=12).contains(&month) {
            return None;
        }
        Period::new(year, ((month - 1) / 3 + 1) as u8)
    }

    /// Display date for the quarter: day 30 of month 3n.
    ///
    /// Day 30 is the reporting convention for every quarter (Q1 -> 03-30,
    /// Q4 -> 12-30); it is not the calendar month end.
    pub fn quarter_end(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, 3 * self.quarter as u32, 30)
            .expect("months 3, 6, 9 and 12 all have a 30th day")
    }

    /// "3T2023"
    pub fn label(&self) -> String {
        format!("{}T{}", self.quarter, self.year)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.quarter, self.year)
    }
}

/// Parses "3T2023" / "2023-Q3" style hints handed over by the Fetcher
impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(caps) = quarter_segment_re().captures(s) {
            let quarter = caps[1].parse::<u8>().ok();
            let year = caps.get(2).and_then(|y| y.as_str().parse::<i32>().ok());
            if let (Some(q), Some(y)) = (quarter, year) {
                if let Some(p) = Period::new(y, q) {
                    return Ok(p);
                }
            }
        }
        if let Some((year, quarter)) = s.split_once(['-', '/']) {
            let quarter = quarter.trim_start_matches(['Q', 'q', 'T', 't']);
            if let (Ok(y), Ok(q)) = (year.parse::<i32>(), quarter.parse::<u8>()) {
                if let Some(p) = Period::new(y, q) {
                    return Ok(p);
                }
            }
        }
        Err(format!("invalid period '{}': expected 3T2023 or 2023-Q3", s))
    }
}

/// Where a file's (or row's) period came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodSource {
    Columns,
    DateColumn,
    Hint,
    Path,
}

// ============================================================================
// PATH INFERENCE
// ============================================================================

fn year_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^20\d{2}$").expect("valid regex"))
}

fn quarter_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([1-4])[Tt](20\d{2})?(?:[._\-\s]|$)").expect("valid regex")
    })
}

/// Infer a period from path segments like `.../2023/3T2023/demo.csv`.
/// The deepest matching segment wins, except that a bare `3T` never
/// replaces an earlier `3T2023`.
pub fn period_from_path(path: &Path) -> Option<Period> {
    let mut year: Option<i32> = None;
    let mut quarter_year: Option<i32> = None;
    let mut quarter: Option<u8> = None;

    for component in path.components() {
        let Some(segment) = component.as_os_str().to_str() else {
            continue;
        };

        if year_segment_re().is_match(segment) {
            year = segment.parse().ok();
        }

        if let Some(caps) = quarter_segment_re().captures(segment) {
            let digit: u8 = caps[1].parse().unwrap_or(0);
            let segment_year: Option<i32> = caps.get(2).and_then(|y| y.as_str().parse().ok());

            if segment_year.is_some() || quarter_year.is_none() {
                quarter = Some(digit);
                quarter_year = segment_year;
            }
        }
    }

    Period::new(year.or(quarter_year)?, quarter?)
}

// ============================================================================
// COLUMN INFERENCE
// ============================================================================

fn quarter_cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[Qq]?([1-4])(?:[\sTtº°].*)?$").expect("valid regex"))
}

/// Year + quarter cells ("2023" / "3", "3T", "Q3", "3º trimestre").
/// Anything else in the quarter cell (dates, "2023T3") is rejected.
pub fn period_from_columns(year_raw: &str, quarter_raw: &str) -> Option<Period> {
    let year_raw = year_raw.trim();
    let year = year_raw
        .parse::<i32>()
        .ok()
        .or_else(|| year_raw.strip_suffix(".0").and_then(|y| y.parse().ok()))?;

    let caps = quarter_cell_re().captures(quarter_raw)?;
    let quarter: u8 = caps[1].parse().ok()?;

    Period::new(year, quarter)
}

/// Date cell ("2023-07-01", "01/07/2023") mapped to its quarter
pub fn period_from_date(raw: &str) -> Option<Period> {
    let raw = raw.trim();
    ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| Period::from_month(d.year(), d.month()))
}

// ============================================================================
// PER-FILE RESOLVER
// ============================================================================

/// Period assignment for one file: column-derived per row when the file has
/// explicit period columns, otherwise the file-level hint/path period.
#[derive(Debug, Clone)]
pub struct PeriodResolver {
    has_period_columns: bool,
    has_date_column: bool,
    fallback: Option<(Period, PeriodSource)>,
}

impl PeriodResolver {
    pub fn for_file(
        path: &Path,
        hint: Option<Period>,
        schema: &ResolvedSchema,
    ) -> Result<Self, IngestError> {
        let has_period_columns =
            schema.has(CanonicalField::Ano) && schema.has(CanonicalField::Trimestre);
        let has_date_column = schema.has(CanonicalField::Data);

        let fallback = hint
            .map(|p| (p, PeriodSource::Hint))
            .or_else(|| period_from_path(path).map(|p| (p, PeriodSource::Path)));

        if !has_period_columns && !has_date_column && fallback.is_none() {
            return Err(IngestError::PeriodUndetermined {
                path: path.to_path_buf(),
            });
        }

        Ok(PeriodResolver {
            has_period_columns,
            has_date_column,
            fallback,
        })
    }

    /// File-level period (hint or path); None when only columns carry it
    pub fn nominal(&self) -> Option<Period> {
        self.fallback.map(|(p, _)| p)
    }

    pub fn nominal_source(&self) -> Option<PeriodSource> {
        self.fallback.map(|(_, s)| s)
    }

    /// Period for one row, or None if nothing usable was found for it
    pub fn row_period(
        &self,
        schema: &ResolvedSchema,
        record: &csv::StringRecord,
    ) -> Option<(Period, PeriodSource)> {
        if self.has_period_columns {
            let year = schema.value(record, CanonicalField::Ano);
            let quarter = schema.value(record, CanonicalField::Trimestre);
            if let Some(p) = year.zip(quarter).and_then(|(y, q)| period_from_columns(y, q)) {
                return Some((p, PeriodSource::Columns));
            }
        }

        if self.has_date_column {
            if let Some(p) = schema
                .value(record, CanonicalField::Data)
                .and_then(period_from_date)
            {
                return Some((p, PeriodSource::DateColumn));
            }
        }

        self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CanonicalSchema, EntityKind};
    use std::path::PathBuf;

    fn resolved(headers: &[&str]) -> ResolvedSchema {
        let headers: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
        CanonicalSchema::for_entity(EntityKind::FinancialFact)
            .resolve(&headers)
            .unwrap()
    }

    #[test]
    fn test_period_from_nested_path() {
        let path = PathBuf::from("ans_data/demonstracoes/2023/3T2023/demo.csv");
        let period = period_from_path(&path).unwrap();

        assert_eq!(period, Period { year: 2023, quarter: 3 });
        assert_eq!(period.quarter_end().to_string(), "2023-09-30");
        assert_eq!(period.label(), "3T2023");
    }

    #[test]
    fn test_quarter_segment_supplies_year() {
        let path = PathBuf::from("downloads/1T2024.csv");
        assert_eq!(period_from_path(&path), Period::new(2024, 1));
    }

    #[test]
    fn test_standalone_year_wins_over_quarter_suffix() {
        let path = PathBuf::from("data/2022/4T2023/file.csv");
        assert_eq!(period_from_path(&path), Period::new(2022, 4));
    }

    #[test]
    fn test_path_without_quarter_is_undetermined() {
        assert_eq!(period_from_path(Path::new("data/2023/demo.csv")), None);
        assert_eq!(period_from_path(Path::new("data/2023/5T/demo.csv")), None);
    }

    #[test]
    fn test_file_name_without_quarter_marker_keeps_directory_quarter() {
        // "2ª retificação" and batch names must not read as quarters
        let path = PathBuf::from("ans_data/2023/3T2023/2a_retificacao.csv");
        assert_eq!(period_from_path(&path), Period::new(2023, 3));

        let path = PathBuf::from("ans_data/2023/3T2023/1st_batch/demo.csv");
        assert_eq!(period_from_path(&path), Period::new(2023, 3));
    }

    #[test]
    fn test_bare_quarter_does_not_replace_explicit_one() {
        let path = PathBuf::from("data/2023/3T2023/1T/demo.csv");
        assert_eq!(period_from_path(&path), Period::new(2023, 3));

        // a deeper explicit segment still wins
        let path = PathBuf::from("data/2T/4T2023/demo.csv");
        assert_eq!(period_from_path(&path), Period::new(2023, 4));

        let path = PathBuf::from("data/2023/3T2023/3T2023_v2.csv");
        assert_eq!(period_from_path(&path), Period::new(2023, 3));
    }

    #[test]
    fn test_quarter_end_uses_day_30_convention() {
        assert_eq!(Period::new(2023, 1).unwrap().quarter_end().to_string(), "2023-03-30");
        assert_eq!(Period::new(2023, 4).unwrap().quarter_end().to_string(), "2023-12-30");
    }

    #[test]
    fn test_period_from_cells() {
        assert_eq!(period_from_columns("2023", "3"), Period::new(2023, 3));
        assert_eq!(period_from_columns("2023.0", "2T"), Period::new(2023, 2));
        assert_eq!(period_from_columns("2023", "Q5"), None);
        assert_eq!(period_from_columns("2023", "Q3"), Period::new(2023, 3));
        assert_eq!(period_from_columns("2023", "3º trimestre"), Period::new(2023, 3));
        assert_eq!(period_from_columns("2023", " 4 "), Period::new(2023, 4));
    }

    #[test]
    fn test_date_or_year_shaped_quarter_cell_is_rejected() {
        assert_eq!(period_from_columns("2023", "2023-09-30"), None);
        assert_eq!(period_from_columns("2023", "2023T3"), None);
        assert_eq!(period_from_columns("2023", "30/09/2023"), None);
        assert_eq!(period_from_columns("2023", "12"), None);
    }

    #[test]
    fn test_period_from_date_cells() {
        assert_eq!(period_from_date("2023-07-01"), Period::new(2023, 3));
        assert_eq!(period_from_date("01/10/2022"), Period::new(2022, 4));
        assert_eq!(period_from_date("not a date"), None);
    }

    #[test]
    fn test_parse_hint() {
        assert_eq!("3T2023".parse::<Period>().unwrap(), Period::new(2023, 3).unwrap());
        assert_eq!("2023-Q1".parse::<Period>().unwrap(), Period::new(2023, 1).unwrap());
        assert!("2023".parse::<Period>().is_err());
    }

    #[test]
    fn test_columns_preferred_over_path() {
        let schema = resolved(&["ANO", "TRIMESTRE", "REG_ANS", "CD_CONTA_CONTABIL", "DESCRICAO", "VL_SALDO_FINAL"]);
        let path = PathBuf::from("data/2022/1T2022/file.csv");
        let resolver = PeriodResolver::for_file(&path, None, &schema).unwrap();

        let row = csv::StringRecord::from(vec!["2023", "3", "123456", "411", "X", "1,00"]);
        assert_eq!(
            resolver.row_period(&schema, &row),
            Some((Period::new(2023, 3).unwrap(), PeriodSource::Columns))
        );

        // unusable cells fall back to the path period
        let row = csv::StringRecord::from(vec!["", "", "123456", "411", "X", "1,00"]);
        assert_eq!(
            resolver.row_period(&schema, &row),
            Some((Period::new(2022, 1).unwrap(), PeriodSource::Path))
        );

        let row = csv::StringRecord::from(vec!["2023", "2023-09-30", "123456", "411", "X", "1,00"]);
        assert_eq!(
            resolver.row_period(&schema, &row),
            Some((Period::new(2022, 1).unwrap(), PeriodSource::Path))
        );
    }

    #[test]
    fn test_hint_preferred_over_path() {
        let schema = resolved(&["REG_ANS", "CD_CONTA_CONTABIL", "DESCRICAO", "VL_SALDO_FINAL"]);
        let path = PathBuf::from("data/2022/1T2022/file.csv");
        let resolver =
            PeriodResolver::for_file(&path, Period::new(2023, 2), &schema).unwrap();

        assert_eq!(resolver.nominal(), Period::new(2023, 2));
        assert_eq!(resolver.nominal_source(), Some(PeriodSource::Hint));
    }

    #[test]
    fn test_no_period_anywhere_fails() {
        let schema = resolved(&["REG_ANS", "CD_CONTA_CONTABIL", "DESCRICAO", "VL_SALDO_FINAL"]);
        let path = PathBuf::from("data/unsorted/file.csv");

        match PeriodResolver::for_file(&path, None, &schema) {
            Err(IngestError::PeriodUndetermined { path: p }) => assert_eq!(p, path),
            other => panic!("expected PeriodUndetermined, got {:?}", other),
        }
    }
}
