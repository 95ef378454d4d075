// 🚚 Pipeline - staged run over a list of source files
//
// SourceFile → ProbeResult → RawTable → ResolvedSchema → CanonicalRows → PersistResult
// File-scoped errors skip the file; only SinkUnavailable stops the run.

use crate::config::PipelineConfig;
use crate::deduplication::{DedupGranularity, GuardDecision};
use crate::entities::FactProvenance;
use crate::error::IngestError;
use crate::loader::{build_fact_rows, build_provider_rows, persist_facts, persist_providers, PersistResult};
use crate::parser::{discover, read_table, FileKind, SourceFile};
use crate::period::{Period, PeriodResolver};
use crate::probe::probe_file;
use crate::schema::CanonicalSchema;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// RUN SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    /// Error kind tag, e.g. "MissingRequiredColumns"
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub files_processed: usize,
    pub files_already_loaded: Vec<String>,
    pub files_skipped: Vec<SkippedFile>,

    pub rows_imported: usize,
    /// Value cells that could not be parsed and were stored as 0.0
    pub rows_fallback: usize,
    /// Rows dropped before or by the store
    pub rows_skipped: usize,

    pub providers_inserted: usize,
    pub providers_ignored: usize,
}

impl RunSummary {
    fn start() -> Self {
        RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            files_processed: 0,
            files_already_loaded: Vec::new(),
            files_skipped: Vec::new(),
            rows_imported: 0,
            rows_fallback: 0,
            rows_skipped: 0,
            providers_inserted: 0,
            providers_ignored: 0,
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Run {}", self.run_id),
            format!("  Files processed:      {}", self.files_processed),
            format!("  Files already loaded: {}", self.files_already_loaded.len()),
            format!("  Files skipped:        {}", self.files_skipped.len()),
            format!("  Rows imported:        {}", self.rows_imported),
            format!("  Rows with value 0.0 fallback: {}", self.rows_fallback),
            format!("  Rows skipped:         {}", self.rows_skipped),
            format!(
                "  Providers:            {} inserted, {} already known",
                self.providers_inserted, self.providers_ignored
            ),
        ];

        for skipped in &self.files_skipped {
            lines.push(format!("  ⚠️  {} [{}]: {}", skipped.path, skipped.kind, skipped.reason));
        }

        lines.join("\n")
    }
}

/// What happened to one file that was not skipped
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub kind: FileKind,
    pub persist: PersistResult,
    pub fallbacks: usize,
    pub skipped_rows: usize,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline<'c> {
    conn: &'c mut Connection,
    dedup: DedupGranularity,
    probe_bytes: usize,
}

impl<'c> Pipeline<'c> {
    pub fn new(conn: &'c mut Connection, config: &PipelineConfig) -> Self {
        Pipeline {
            conn,
            dedup: config.dedup,
            probe_bytes: config.probe_bytes,
        }
    }

    /// Process every input in order, registry files first.
    /// Files committed before a fatal error stay committed.
    pub fn run(&mut self, inputs: &[SourceFile]) -> Result<RunSummary, IngestError> {
        let mut summary = RunSummary::start();

        let mut ordered: Vec<&SourceFile> = inputs.iter().collect();
        ordered.sort_by_key(|s| s.kind);

        for source in ordered {
            let path = source.display_path();

            match self.ingest_file(source) {
                Ok(outcome) => record_outcome(&mut summary, &path, outcome),
                Err(err) if err.is_fatal() => {
                    error!(file = %path, error = %err, "store failure, aborting run");
                    return Err(err);
                }
                Err(err) => {
                    warn!(file = %path, kind = err.kind(), error = %err, "file skipped");
                    summary.files_skipped.push(SkippedFile {
                        path,
                        kind: err.kind().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        summary.finished_at = Some(Utc::now());
        info!(
            run_id = %summary.run_id,
            files = summary.files_processed,
            skipped = summary.files_skipped.len(),
            rows = summary.rows_imported,
            "run finished"
        );
        Ok(summary)
    }

    pub fn ingest_file(&mut self, source: &SourceFile) -> Result<FileOutcome, IngestError> {
        let probe = probe_file(&source.path, self.probe_bytes)?;
        info!(
            file = %source.path.display(),
            encoding = probe.encoding.name(),
            delimiter = probe.delimiter_name(),
            kind = source.kind.name(),
            "probed"
        );

        let table = read_table(&source.path, &probe)?;
        let schema = CanonicalSchema::for_entity(source.kind.entity()).resolve(&table.headers)?;

        match source.kind {
            FileKind::ProviderRegistry => {
                let rows = build_provider_rows(&table, &schema);
                let persist = persist_providers(self.conn, &rows.rows)?;
                info!(
                    file = %source.path.display(),
                    inserted = persist.rows_written,
                    ignored = persist.rows_ignored,
                    "providers loaded"
                );

                Ok(FileOutcome {
                    kind: source.kind,
                    fallbacks: 0,
                    skipped_rows: rows.skipped.len() + persist.failures.len(),
                    persist,
                })
            }
            FileKind::FinancialStatements => {
                let periods = PeriodResolver::for_file(&source.path, source.period_hint, &schema)?;
                let rows = build_fact_rows(&table, &schema, &periods);
                let provenance = FactProvenance::new(source.display_path(), table.content_hash.clone());

                let persist = persist_facts(
                    self.conn,
                    &rows.rows,
                    &provenance,
                    self.dedup,
                    periods.nominal(),
                )?;

                info!(
                    file = %source.path.display(),
                    period = %periods.nominal().map(|p| p.label()).unwrap_or_else(|| "per-row".to_string()),
                    rows = persist.rows_written,
                    fallbacks = rows.fallbacks.len(),
                    "facts loaded"
                );

                Ok(FileOutcome {
                    kind: source.kind,
                    fallbacks: rows.fallbacks.len(),
                    skipped_rows: rows.skipped.len() + persist.failures.len(),
                    persist,
                })
            }
        }
    }
}

fn record_outcome(summary: &mut RunSummary, path: &str, outcome: FileOutcome) {
    if let GuardDecision::AlreadyLoaded { existing_rows } = outcome.persist.guard {
        info!(file = %path, existing_rows, "already loaded, skipped");
        summary.files_already_loaded.push(path.to_string());
        return;
    }

    summary.files_processed += 1;
    summary.rows_skipped += outcome.skipped_rows;

    match outcome.kind {
        FileKind::ProviderRegistry => {
            summary.providers_inserted += outcome.persist.rows_written;
            summary.providers_ignored += outcome.persist.rows_ignored;
        }
        FileKind::FinancialStatements => {
            summary.rows_imported += outcome.persist.rows_written;
            summary.rows_fallback += outcome.fallbacks;
        }
    }
}

// ============================================================================
// INPUTS
// ============================================================================

/// Explicit registry files, explicit (hint, path) pairs, then everything
/// found under data_dir. A path is only listed once.
pub fn collect_inputs(
    config: &PipelineConfig,
    explicit: &[(Option<Period>, std::path::PathBuf)],
) -> Result<Vec<SourceFile>> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::new();

    for path in &config.providers {
        if seen.insert(path.clone()) {
            inputs.push(SourceFile::new(path).with_kind(FileKind::ProviderRegistry));
        }
    }

    for (hint, path) in explicit {
        if seen.insert(path.clone()) {
            let mut source = SourceFile::new(path);
            if let Some(period) = hint {
                source = source.with_period_hint(*period);
            }
            inputs.push(source);
        }
    }

    if config.data_dir.is_dir() {
        for source in discover(&config.data_dir)? {
            if seen.insert(source.path.clone()) {
                inputs.push(source);
            }
        }
    } else if inputs.is_empty() {
        anyhow::bail!("data directory not found: {}", config.data_dir.display());
    }

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::top_by_latest_quarter;
    use crate::db;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    const HEADER: &str = "DATA;REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_INICIAL;VL_SALDO_FINAL\n";
    const CLAIMS: &str =
        "EVENTOS/ SINISTROS CONHECIDOS OU AVISADOS DE ASSISTÊNCIA A SAÚDE MÉDICO HOSPITALAR";

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn setup() -> (tempfile::TempDir, Connection, PipelineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let config = PipelineConfig {
            data_dir: dir.path().join("data"),
            ..Default::default()
        };
        (dir, conn, config)
    }

    fn statements(rows: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut content = HEADER.to_string();
        for (id, desc, value) in rows {
            content.push_str(&format!("2023-07-01;{};411;{};0;{}\n", id, desc, value));
        }
        content.into_bytes()
    }

    #[test]
    fn test_second_run_imports_nothing() {
        let (_dir, mut conn, config) = setup();
        write(
            &config.data_dir.join("2023/3T2023/3T2023.csv"),
            &statements(&[("123456", CLAIMS, "1.000,00"), ("654321", "OUTRAS", "20,5")]),
        );
        let inputs = collect_inputs(&config, &[]).unwrap();

        let first = Pipeline::new(&mut conn, &config).run(&inputs).unwrap();
        let second = Pipeline::new(&mut conn, &config).run(&inputs).unwrap();

        assert_eq!(first.rows_imported, 2);
        assert_eq!(first.files_processed, 1);
        assert_eq!(second.rows_imported, 0);
        assert_eq!(second.files_already_loaded.len(), 1);
        assert_eq!(db::count_facts(&conn).unwrap(), 2);
    }

    #[test]
    fn test_registry_first_write_wins_across_files() {
        let (dir, mut conn, mut config) = setup();
        let first = dir.path().join("cadop/Relatorio_cadop.csv");
        let second = dir.path().join("cadop/operadoras_canceladas.csv");
        write(&first, b"Registro_ANS;CNPJ;Razao_Social\n123456;111;PRIMEIRA SAUDE\n");
        write(&second, b"Registro_ANS;CNPJ;Razao_Social\n123456;222;SEGUNDA SAUDE\n654321;333;OUTRA\n");
        config.providers = vec![first, second];

        let summary = Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[]).unwrap())
            .unwrap();

        assert_eq!(summary.providers_inserted, 2);
        assert_eq!(summary.providers_ignored, 1);
        let stored = db::get_provider(&conn, "123456").unwrap().unwrap();
        assert_eq!(stored.razao_social.as_deref(), Some("PRIMEIRA SAUDE"));
        assert_eq!(stored.cnpj.as_deref(), Some("111"));
    }

    #[test]
    fn test_missing_value_column_skips_file() {
        let (_dir, mut conn, config) = setup();
        write(
            &config.data_dir.join("2023/1T2023/1T2023.csv"),
            b"DATA;REG_ANS;CD_CONTA_CONTABIL;DESCRICAO\n2023-01-01;123456;411;EVENTOS\n",
        );

        let summary = Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[]).unwrap())
            .unwrap();

        assert_eq!(summary.files_skipped.len(), 1);
        assert_eq!(summary.files_skipped[0].kind, "MissingRequiredColumns");
        assert_eq!(summary.files_processed, 0);
        assert_eq!(db::count_facts(&conn).unwrap(), 0);
    }

    #[test]
    fn test_claims_row_ranks_by_absolute_value() {
        let (_dir, mut conn, config) = setup();
        write(
            &config.data_dir.join("2023/3T2023/3T2023.csv"),
            &statements(&[("123456", CLAIMS, "-500.00")]),
        );

        Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[]).unwrap())
            .unwrap();

        let ranking = top_by_latest_quarter(&conn, 10).unwrap().unwrap();
        assert_eq!(ranking.rows.len(), 1);
        assert_eq!(ranking.rows[0].registro_ans, "123456");
        assert_eq!(ranking.rows[0].total, 500.00);
    }

    #[test]
    fn test_latin1_file_with_hint_and_fallback() {
        let (dir, mut conn, config) = setup();
        let path = dir.path().join("loose/export.csv");
        // no DATA column, no period in the path: the hint decides
        write(
            &path,
            b"REG_ANS;CD_CONTA_CONTABIL;DESCRI\xC7\xC3O;VL_SALDO_FINAL\n123456;411;ASSIST\xCANCIA;abc\n",
        );
        let hint = Period::new(2022, 4).unwrap();

        let summary = Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[(Some(hint), path)]).unwrap())
            .unwrap();

        assert_eq!(summary.rows_imported, 1);
        assert_eq!(summary.rows_fallback, 1);
        assert_eq!(db::count_facts_for_period(&conn, hint).unwrap(), 1);
    }

    #[test]
    fn test_undetermined_period_and_binary_file_are_skipped() {
        let (dir, mut conn, config) = setup();
        let loose = dir.path().join("loose/export.csv");
        let binary = dir.path().join("loose/archive.csv");
        write(&loose, b"REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_FINAL\n1;411;A;1\n");
        write(&binary, b"PK\x03\x04\x00\x00");

        let summary = Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[(None, loose), (None, binary)]).unwrap())
            .unwrap();

        let kinds: Vec<&str> = summary.files_skipped.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, vec!["PeriodUndetermined", "EncodingUndetectable"]);
    }

    #[test]
    fn test_period_granularity_skips_reexport_of_same_quarter() {
        let (_dir, mut conn, mut config) = setup();
        config.dedup = DedupGranularity::Period;
        write(
            &config.data_dir.join("2023/3T2023/3T2023.csv"),
            &statements(&[("123456", CLAIMS, "1,00")]),
        );
        write(
            &config.data_dir.join("2023/3T2023/3T2023_v2.csv"),
            &statements(&[("123456", CLAIMS, "2,00")]),
        );

        let summary = Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[]).unwrap())
            .unwrap();

        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.files_already_loaded.len(), 1);
        assert_eq!(db::count_facts(&conn).unwrap(), 1);
    }

    #[test]
    fn test_store_failure_aborts_run_and_keeps_committed_files() {
        let (dir, _memory, config) = setup();
        let db_path = dir.path().join("ans.db");
        let q2 = config.data_dir.join("2023/2T2023/2T2023.csv");
        let q3 = config.data_dir.join("2023/3T2023/3T2023.csv");
        write(&q2, &statements(&[("123456", CLAIMS, "10,00"), ("654321", CLAIMS, "20,00")]));

        let mut conn = db::open_store(&db_path).unwrap();
        conn.busy_timeout(Duration::from_millis(10)).unwrap();
        let first = Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[]).unwrap())
            .unwrap();
        assert_eq!(first.rows_imported, 2);

        // another writer holds the lock: BEGIN IMMEDIATE comes back busy
        write(&q3, &statements(&[("123456", CLAIMS, "30,00")]));
        let locker = Connection::open(&db_path).unwrap();
        locker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let err = Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[]).unwrap())
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.kind(), "SinkUnavailable");

        locker.execute_batch("ROLLBACK;").unwrap();
        assert_eq!(db::count_facts(&conn).unwrap(), 2);

        // re-run: the committed file is skipped, the rest loads
        let rerun = Pipeline::new(&mut conn, &config)
            .run(&collect_inputs(&config, &[]).unwrap())
            .unwrap();
        assert_eq!(rerun.files_already_loaded, vec![q2.display().to_string()]);
        assert_eq!(rerun.rows_imported, 1);
        assert_eq!(db::count_facts(&conn).unwrap(), 3);
    }

    #[test]
    fn test_missing_data_dir_without_inputs_fails() {
        let (_dir, _conn, config) = setup();
        assert!(collect_inputs(&config, &[]).is_err());
    }
}
