use crate::aggregation::is_medical_claims_expense;
use crate::entities::{FactProvenance, FinancialFact, Provider};
use crate::period::Period;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-file load statistics, for `ans-etl status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFileStat {
    pub source_file: String,
    pub source_hash: String,
    pub row_count: i64,
    pub periods: String,
    pub imported_at: String,
}

/// Open (or create) the store and make sure the schema and SQL functions exist
pub fn open_store(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Providers (dimension) - registry identifier is the key, first write wins
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS operadoras (
            registro_ans TEXT PRIMARY KEY NOT NULL CHECK (length(registro_ans) > 0),
            cnpj TEXT,
            razao_social TEXT,
            nome_fantasia TEXT,
            modalidade TEXT,
            logradouro TEXT,
            numero TEXT,
            complemento TEXT,
            bairro TEXT,
            cidade TEXT,
            uf TEXT,
            cep TEXT,
            ddd TEXT,
            telefone TEXT,
            fax TEXT,
            email TEXT,
            representante TEXT,
            cargo_representante TEXT,
            data_registro TEXT,
            data_atualizacao_dados TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Financial statements (fact) - no natural key, dedup is per source file
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS demonstracoes_contabeis (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            registro_ans TEXT NOT NULL CHECK (length(registro_ans) > 0),
            ano INTEGER NOT NULL,
            trimestre INTEGER NOT NULL CHECK (trimestre BETWEEN 1 AND 4),
            data_trimestre TEXT NOT NULL,
            cd_conta_contabil TEXT NOT NULL,
            descricao TEXT NOT NULL,
            vl_saldo_final REAL NOT NULL,
            source_file TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            imported_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registro_ans ON demonstracoes_contabeis(registro_ans)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ano_trimestre ON demonstracoes_contabeis(ano, trimestre)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cd_conta_contabil ON demonstracoes_contabeis(cd_conta_contabil)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_source_hash ON demonstracoes_contabeis(source_hash)",
        [],
    )?;

    register_functions(conn)?;

    Ok(())
}

/// SQL-side access to the expense-category predicate, so rankings and the
/// Rust unit tests share one definition
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "is_medical_claims_expense",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let description: Option<String> = ctx.get(0)?;
            Ok(description.as_deref().is_some_and(is_medical_claims_expense))
        },
    )
}

/// Insert-or-ignore by registry identifier.
/// Returns true if the row was written, false if the identifier already existed.
pub fn insert_provider(conn: &Connection, p: &Provider) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO operadoras (
            registro_ans, cnpj, razao_social, nome_fantasia, modalidade,
            logradouro, numero, complemento, bairro, cidade, uf, cep,
            ddd, telefone, fax, email, representante, cargo_representante,
            data_registro, data_atualizacao_dados
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            p.registro_ans,
            p.cnpj,
            p.razao_social,
            p.nome_fantasia,
            p.modalidade,
            p.logradouro,
            p.numero,
            p.complemento,
            p.bairro,
            p.cidade,
            p.uf,
            p.cep,
            p.ddd,
            p.telefone,
            p.fax,
            p.email,
            p.representante,
            p.cargo_representante,
            p.data_registro,
            p.data_atualizacao_dados,
        ],
    )?;

    Ok(changed == 1)
}

/// Append one fact row. A failing statement leaves the enclosing
/// transaction intact, so the caller can skip the row and keep going.
pub fn insert_fact(
    conn: &Connection,
    fact: &FinancialFact,
    provenance: &FactProvenance,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO demonstracoes_contabeis (
            registro_ans, ano, trimestre, data_trimestre, cd_conta_contabil,
            descricao, vl_saldo_final, source_file, source_hash, imported_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            fact.registro_ans,
            fact.period.year,
            fact.period.quarter,
            fact.period.quarter_end().format("%Y-%m-%d").to_string(),
            fact.cd_conta_contabil,
            fact.descricao,
            fact.valor,
            provenance.source_file,
            provenance.source_hash,
            provenance.imported_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

pub fn get_provider(conn: &Connection, registro_ans: &str) -> rusqlite::Result<Option<Provider>> {
    conn.query_row(
        "SELECT registro_ans, cnpj, razao_social, nome_fantasia, modalidade,
                logradouro, numero, complemento, bairro, cidade, uf, cep,
                ddd, telefone, fax, email, representante, cargo_representante,
                data_registro, data_atualizacao_dados
         FROM operadoras WHERE registro_ans = ?1",
        params![registro_ans],
        |row| {
            Ok(Provider {
                registro_ans: row.get(0)?,
                cnpj: row.get(1)?,
                razao_social: row.get(2)?,
                nome_fantasia: row.get(3)?,
                modalidade: row.get(4)?,
                logradouro: row.get(5)?,
                numero: row.get(6)?,
                complemento: row.get(7)?,
                bairro: row.get(8)?,
                cidade: row.get(9)?,
                uf: row.get(10)?,
                cep: row.get(11)?,
                ddd: row.get(12)?,
                telefone: row.get(13)?,
                fax: row.get(14)?,
                email: row.get(15)?,
                representante: row.get(16)?,
                cargo_representante: row.get(17)?,
                data_registro: row.get(18)?,
                data_atualizacao_dados: row.get(19)?,
            })
        },
    )
    .optional()
}

pub fn count_facts(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM demonstracoes_contabeis", [], |row| row.get(0))
}

pub fn count_providers(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM operadoras", [], |row| row.get(0))
}

pub fn count_facts_for_source(conn: &Connection, source_hash: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM demonstracoes_contabeis WHERE source_hash = ?1",
        params![source_hash],
        |row| row.get(0),
    )
}

pub fn count_facts_for_period(conn: &Connection, period: Period) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM demonstracoes_contabeis WHERE ano = ?1 AND trimestre = ?2",
        params![period.year, period.quarter],
        |row| row.get(0),
    )
}

/// Most recent (year, quarter) in the store
pub fn latest_period(conn: &Connection) -> rusqlite::Result<Option<Period>> {
    let row: Option<(i32, u8)> = conn
        .query_row(
            "SELECT ano, trimestre FROM demonstracoes_contabeis
             ORDER BY ano DESC, trimestre DESC
             LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(row.and_then(|(year, quarter)| Period::new(year, quarter)))
}

/// Get statistics per loaded source file
pub fn get_source_file_stats(conn: &Connection) -> rusqlite::Result<Vec<SourceFileStat>> {
    let mut stmt = conn.prepare(
        "SELECT
            source_file,
            source_hash,
            COUNT(*) as row_count,
            GROUP_CONCAT(DISTINCT trimestre || 'T' || ano) as periods,
            MIN(imported_at) as imported_at
        FROM demonstracoes_contabeis
        GROUP BY source_hash, source_file
        ORDER BY source_file",
    )?;

    let stats = stmt
        .query_map([], |row| {
            Ok(SourceFileStat {
                source_file: row.get(0)?,
                source_hash: row.get(1)?,
                row_count: row.get(2)?,
                periods: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                imported_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(stats)
}
