// 📊 Aggregation Engine - top providers by medical/hospital claims expense
//
// One predicate, two scopes: most recent quarter, most recent year

use crate::db;
use crate::period::Period;
use crate::schema::fold_text;
use crate::value::format_brl;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

// ============================================================================
// EXPENSE PREDICATE
// ============================================================================

/// All of these must appear (accent-folded, case-insensitive) in the account
/// description, e.g. "EVENTOS/ SINISTROS CONHECIDOS OU AVISADOS DE ASSISTÊNCIA
/// A SAÚDE MÉDICO HOSPITALAR"
pub const EXPENSE_KEYWORDS: [&str; 5] = ["eventos", "sinistros", "assist", "medico", "hospitalar"];

pub fn is_medical_claims_expense(description: &str) -> bool {
    let folded = fold_text(description);
    EXPENSE_KEYWORDS.iter().all(|k| folded.contains(k))
}

// ============================================================================
// RANKINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankingScope {
    LatestQuarter,
    LatestYear,
}

impl RankingScope {
    pub fn title(&self) -> &str {
        match self {
            RankingScope::LatestQuarter => "último trimestre",
            RankingScope::LatestYear => "último ano",
        }
    }

    fn slug(&self) -> &str {
        match self {
            RankingScope::LatestQuarter => "ultimo_trimestre",
            RankingScope::LatestYear => "ultimo_ano",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProvider {
    pub registro_ans: String,
    /// None when the registry has no row for this identifier
    pub razao_social: Option<String>,
    pub period_label: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub scope: RankingScope,
    pub period_label: String,
    pub top_n: usize,
    pub rows: Vec<RankedProvider>,
}

impl Ranking {
    pub fn file_name(&self) -> String {
        format!(
            "top{}_operadoras_{}_{}.csv",
            self.top_n,
            self.scope.slug(),
            self.period_label
        )
    }
}

const RANKING_SELECT: &str = "
    SELECT
        d.registro_ans,
        MAX(o.razao_social) AS razao_social,
        ABS(SUM(d.vl_saldo_final)) AS total
    FROM demonstracoes_contabeis d
    LEFT JOIN operadoras o ON o.registro_ans = d.registro_ans";

const RANKING_ORDER: &str = "
    GROUP BY d.registro_ans
    ORDER BY total DESC, d.registro_ans ASC
    LIMIT ?";

fn query_ranking(
    conn: &Connection,
    scope: RankingScope,
    period_label: String,
    top_n: usize,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> rusqlite::Result<Ranking> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(RankedProvider {
                registro_ans: row.get(0)?,
                razao_social: row.get(1)?,
                period_label: period_label.clone(),
                total: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Ranking {
        scope,
        period_label,
        top_n,
        rows,
    })
}

/// Top N providers by claims expense in the most recent (year, quarter) of
/// the store. None when nothing has been loaded yet.
pub fn top_by_latest_quarter(conn: &Connection, top_n: usize) -> rusqlite::Result<Option<Ranking>> {
    let Some(latest) = db::latest_period(conn)? else {
        return Ok(None);
    };

    let sql = format!(
        "{} WHERE d.ano = ? AND d.trimestre = ? AND is_medical_claims_expense(d.descricao) {}",
        RANKING_SELECT, RANKING_ORDER
    );
    let limit = top_n as i64;
    query_ranking(
        conn,
        RankingScope::LatestQuarter,
        latest.label(),
        top_n,
        &sql,
        params![latest.year, latest.quarter, limit],
    )
    .map(Some)
}

/// Same over every quarter of the most recent year
pub fn top_by_latest_year(conn: &Connection, top_n: usize) -> rusqlite::Result<Option<Ranking>> {
    let Some(Period { year, .. }) = db::latest_period(conn)? else {
        return Ok(None);
    };

    let sql = format!(
        "{} WHERE d.ano = ? AND is_medical_claims_expense(d.descricao) {}",
        RANKING_SELECT, RANKING_ORDER
    );
    let limit = top_n as i64;
    query_ranking(
        conn,
        RankingScope::LatestYear,
        year.to_string(),
        top_n,
        &sql,
        params![year, limit],
    )
    .map(Some)
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Numbered console lines: `1. NAME (ANS: 123456) - 3T2023 - R$ 1.234,56`
pub fn render_ranking(ranking: &Ranking) -> String {
    ranking
        .rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {} (ANS: {}) - {} - {}",
                i + 1,
                r.razao_social.as_deref().unwrap_or("N/A"),
                r.registro_ans,
                r.period_label,
                format_brl(r.total)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write one ranking as `;`-delimited text into `dir`
pub fn export_ranking_csv(ranking: &Ranking, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export dir '{}'", dir.display()))?;
    let path = dir.join(ranking.file_name());

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(&path)
        .with_context(|| format!("Failed to create '{}'", path.display()))?;

    writer.write_record(["posicao", "registro_ans", "razao_social", "periodo", "total", "total_formatado"])?;
    for (i, r) in ranking.rows.iter().enumerate() {
        writer.write_record([
            (i + 1).to_string(),
            r.registro_ans.clone(),
            r.razao_social.clone().unwrap_or_default(),
            r.period_label.clone(),
            format!("{:.2}", r.total),
            format_brl(r.total),
        ])?;
    }
    writer.flush()?;

    info!(file = %path.display(), rows = ranking.rows.len(), "ranking exported");
    Ok(path)
}

/// Standalone SQL for external reporting tools. They do not have the
/// registered predicate, so it is spelled as an accent-free LIKE.
pub fn ranking_sql(scope: RankingScope, top_n: usize) -> String {
    let period_filter = match scope {
        RankingScope::LatestQuarter => {
            "(d.ano, d.trimestre) = (
        SELECT ano, trimestre FROM demonstracoes_contabeis
        ORDER BY ano DESC, trimestre DESC LIMIT 1
    )"
        }
        RankingScope::LatestYear => "d.ano = (SELECT MAX(ano) FROM demonstracoes_contabeis)",
    };

    format!(
        "-- Top {top_n} operadoras por despesas com eventos/sinistros médico-hospitalares ({title})
SELECT
    d.registro_ans,
    MAX(o.razao_social) AS razao_social,
    ABS(SUM(d.vl_saldo_final)) AS total
FROM demonstracoes_contabeis d
LEFT JOIN operadoras o ON o.registro_ans = d.registro_ans
WHERE {period_filter}
  AND UPPER(d.descricao) LIKE '%EVENTOS%SINISTROS%ASSIST%MEDICO%HOSPITALAR%'
GROUP BY d.registro_ans
ORDER BY total DESC, d.registro_ans ASC
LIMIT {top_n};
",
        top_n = top_n,
        title = scope.title(),
        period_filter = period_filter,
    )
}

/// Write `query_ultimo_trimestre.sql` and `query_ultimo_ano.sql` into `dir`
pub fn save_sql_queries(dir: &Path, top_n: usize) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create SQL dir '{}'", dir.display()))?;

    let mut written = Vec::new();
    for scope in [RankingScope::LatestQuarter, RankingScope::LatestYear] {
        let path = dir.join(format!("query_{}.sql", scope.slug()));
        fs::write(&path, ranking_sql(scope, top_n))
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        written.push(path);
    }

    Ok(written)
}
