// 📥 Record Loader - resolved file → canonical rows → store
//
// Facts: whole-file duplicate guard + per-row inserts, one transaction per file
// Providers: INSERT OR IGNORE, first write wins

use crate::db;
use crate::deduplication::{check_already_loaded, DedupGranularity, GuardDecision};
use crate::entities::{FactProvenance, FinancialFact, Provider};
use crate::error::{is_sink_failure, IngestError, RowPersistFailure, ValueParseFallback};
use crate::parser::RawTable;
use crate::period::{Period, PeriodResolver};
use crate::schema::{CanonicalField, ResolvedSchema};
use crate::value::normalize_value;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, warn};

// ============================================================================
// CANONICAL ROWS
// ============================================================================

/// Rows ready for the store, plus the row-scoped events seen while building them
#[derive(Debug, Clone)]
pub struct CanonicalRows<T> {
    pub rows: Vec<T>,
    pub fallbacks: Vec<ValueParseFallback>,
    /// Rows dropped before reaching the store
    pub skipped: Vec<RowPersistFailure>,
}

impl<T> Default for CanonicalRows<T> {
    fn default() -> Self {
        CanonicalRows {
            rows: Vec::new(),
            fallbacks: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

pub fn build_fact_rows(
    table: &RawTable,
    schema: &ResolvedSchema,
    periods: &PeriodResolver,
) -> CanonicalRows<FinancialFact> {
    let mut out = CanonicalRows::default();
    let value_column = schema.header(CanonicalField::Valor).unwrap_or("valor");

    for (line, record) in &table.records {
        let registro_ans = schema
            .value(record, CanonicalField::RegistroAns)
            .unwrap_or_default();

        let Some((period, _source)) = periods.row_period(schema, record) else {
            out.skipped.push(RowPersistFailure {
                line: *line,
                registry_id: Some(registro_ans.to_string()).filter(|s| !s.is_empty()),
                reason: "no usable year/quarter for row".to_string(),
            });
            continue;
        };

        let raw_value = schema.value(record, CanonicalField::Valor).unwrap_or("");
        let normalized = normalize_value(raw_value, *line, value_column);
        if let Some(fallback) = normalized.fallback {
            out.fallbacks.push(fallback);
        }

        out.rows.push(
            FinancialFact::new(
                registro_ans,
                period,
                schema
                    .value(record, CanonicalField::CdContaContabil)
                    .unwrap_or_default(),
                schema
                    .value(record, CanonicalField::Descricao)
                    .unwrap_or_default(),
                normalized.value,
            )
            .at_line(*line),
        );
    }

    out
}

pub fn build_provider_rows(table: &RawTable, schema: &ResolvedSchema) -> CanonicalRows<(usize, Provider)> {
    let mut out = CanonicalRows::default();

    for (line, record) in &table.records {
        let provider = Provider::from_record(schema, record);
        // INSERT OR IGNORE would swallow the CHECK violation silently
        if provider.registro_ans.is_empty() {
            out.skipped.push(RowPersistFailure {
                line: *line,
                registry_id: None,
                reason: "empty registry identifier".to_string(),
            });
            continue;
        }
        out.rows.push((*line, provider));
    }

    out
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PersistResult {
    pub guard: GuardDecision,
    pub rows_written: usize,
    /// Provider rows whose identifier was already stored
    pub rows_ignored: usize,
    pub failures: Vec<RowPersistFailure>,
}

impl PersistResult {
    fn skipped(guard: GuardDecision) -> Self {
        PersistResult {
            guard,
            rows_written: 0,
            rows_ignored: 0,
            failures: Vec::new(),
        }
    }
}

/// Classify one failed insert: store-level errors abort, anything else only
/// drops the row
fn row_failure(
    err: rusqlite::Error,
    line: usize,
    registry_id: &str,
) -> Result<RowPersistFailure, IngestError> {
    if is_sink_failure(&err) {
        return Err(IngestError::SinkUnavailable(err));
    }

    warn!(line, registry_id, error = %err, "row rejected by store");
    Ok(RowPersistFailure {
        line,
        registry_id: Some(registry_id.to_string()).filter(|s| !s.is_empty()),
        reason: err.to_string(),
    })
}

/// Guard + write one file's facts atomically.
///
/// The guard runs inside the same IMMEDIATE transaction as the inserts, so a
/// second writer cannot slip the same file in between check and write.
/// Rejected rows leave the transaction usable; the file commits once.
pub fn persist_facts(
    conn: &mut Connection,
    rows: &[FinancialFact],
    provenance: &FactProvenance,
    granularity: DedupGranularity,
    nominal_period: Option<Period>,
) -> Result<PersistResult, IngestError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let guard = check_already_loaded(&tx, granularity, &provenance.source_hash, nominal_period)?;
    if !guard.is_load() {
        debug!(file = %provenance.source_file, ?guard, "duplicate guard hit");
        tx.rollback()?;
        return Ok(PersistResult::skipped(guard));
    }

    let mut result = PersistResult::skipped(guard);
    for fact in rows {
        match db::insert_fact(&tx, fact, provenance) {
            Ok(()) => result.rows_written += 1,
            Err(err) => result
                .failures
                .push(row_failure(err, fact.line, &fact.registro_ans)?),
        }
    }

    tx.commit()?;
    Ok(result)
}

/// Insert-or-ignore every provider row; one commit for the file
pub fn persist_providers(
    conn: &mut Connection,
    rows: &[(usize, Provider)],
) -> Result<PersistResult, IngestError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut result = PersistResult::skipped(GuardDecision::Load);

    for (line, provider) in rows {
        match db::insert_provider(&tx, provider) {
            Ok(true) => result.rows_written += 1,
            Ok(false) => result.rows_ignored += 1,
            Err(err) => result
                .failures
                .push(row_failure(err, *line, &provider.registro_ans)?),
        }
    }

    tx.commit()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CanonicalSchema, EntityKind};
    use std::path::Path;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            records: rows
                .iter()
                .enumerate()
                .map(|(i, r)| (i + 2, csv::StringRecord::from(r.to_vec())))
                .collect(),
            content_hash: "hash-1".to_string(),
        }
    }

    fn store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_build_fact_rows_with_fallback() {
        let t = table(
            &["REG_ANS", "CD_CONTA_CONTABIL", "DESCRICAO", "VL_SALDO_FINAL"],
            &[
                &["123456", "411", "EVENTOS", "1.234,56"],
                &["123456", "412", "OUTROS", "abc"],
                &["654321", "411", "EVENTOS", ""],
            ],
        );
        let schema = CanonicalSchema::for_entity(EntityKind::FinancialFact)
            .resolve(&t.headers)
            .unwrap();
        let periods =
            PeriodResolver::for_file(Path::new("data/2023/3T2023/3T2023.csv"), None, &schema).unwrap();

        let out = build_fact_rows(&t, &schema, &periods);

        assert_eq!(out.rows.len(), 3);
        assert_eq!(out.rows[0].valor, 1234.56);
        assert_eq!(out.rows[0].period, Period::new(2023, 3).unwrap());
        assert_eq!(out.rows[1].valor, 0.0);
        assert_eq!(out.rows[2].valor, 0.0);
        // blank cell is not a fallback, "abc" is
        assert_eq!(out.fallbacks.len(), 1);
        assert_eq!(out.fallbacks[0].line, 3);
        assert_eq!(out.fallbacks[0].column, "VL_SALDO_FINAL");
    }

    #[test]
    fn test_row_without_period_is_skipped() {
        let t = table(
            &["DATA", "REG_ANS", "CD_CONTA_CONTABIL", "DESCRICAO", "VL_SALDO_FINAL"],
            &[
                &["2023-07-01", "1", "411", "A", "1"],
                &["sem data", "2", "411", "B", "2"],
            ],
        );
        let schema = CanonicalSchema::for_entity(EntityKind::FinancialFact)
            .resolve(&t.headers)
            .unwrap();
        let periods = PeriodResolver::for_file(Path::new("loose.csv"), None, &schema).unwrap();

        let out = build_fact_rows(&t, &schema, &periods);

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].registry_id.as_deref(), Some("2"));
    }

    #[test]
    fn test_registry_row_without_identifier_is_skipped() {
        let t = table(
            &["Registro_ANS", "Razao_Social"],
            &[&["123456", "OPERADORA A"], &["", "SEM REGISTRO"]],
        );
        let schema = CanonicalSchema::for_entity(EntityKind::Provider)
            .resolve(&t.headers)
            .unwrap();

        let out = build_provider_rows(&t, &schema);

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].0, 2);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].line, 3);
    }

    #[test]
    fn test_persist_facts_skips_bad_rows_and_commits_rest() {
        let mut conn = store();
        let q3 = Period::new(2023, 3).unwrap();
        let rows = vec![
            FinancialFact::new("123456", q3, "411", "A", 1.0).at_line(2),
            FinancialFact::new("", q3, "411", "B", 2.0).at_line(3),
            FinancialFact::new("654321", q3, "411", "C", 3.0).at_line(4),
        ];
        let provenance = FactProvenance::new("3T2023.csv", "hash-1");

        let result =
            persist_facts(&mut conn, &rows, &provenance, DedupGranularity::SourceFile, Some(q3)).unwrap();

        assert_eq!(result.rows_written, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].line, 3);
        assert_eq!(result.failures[0].registry_id, None);
        assert_eq!(db::count_facts(&conn).unwrap(), 2);
    }

    #[test]
    fn test_persist_facts_twice_is_guarded() {
        let mut conn = store();
        let q3 = Period::new(2023, 3).unwrap();
        let rows = vec![FinancialFact::new("123456", q3, "411", "A", 1.0)];
        let provenance = FactProvenance::new("3T2023.csv", "hash-1");

        persist_facts(&mut conn, &rows, &provenance, DedupGranularity::SourceFile, None).unwrap();
        let second =
            persist_facts(&mut conn, &rows, &provenance, DedupGranularity::SourceFile, None).unwrap();

        assert_eq!(second.guard, GuardDecision::AlreadyLoaded { existing_rows: 1 });
        assert_eq!(second.rows_written, 0);
        assert_eq!(db::count_facts(&conn).unwrap(), 1);
    }

    #[test]
    fn test_persist_providers_first_write_wins() {
        let mut conn = store();
        let rows = vec![
            (2, Provider::new("123456").with_razao_social("PRIMEIRA")),
            (3, Provider::new("123456").with_razao_social("SEGUNDA")),
            (4, Provider::new("654321")),
        ];

        let result = persist_providers(&mut conn, &rows).unwrap();

        assert_eq!(result.rows_written, 2);
        assert_eq!(result.rows_ignored, 1);
        assert!(result.failures.is_empty());
        let stored = db::get_provider(&conn, "123456").unwrap().unwrap();
        assert_eq!(stored.razao_social.as_deref(), Some("PRIMEIRA"));
    }
}
