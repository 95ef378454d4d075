// 📊 FinancialFact Entity - one (provider, period, account) balance
// Immutable once written; never updated in place.

use crate::period::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialFact {
    /// Registry identifier; the provider row may not exist (yet)
    pub registro_ans: String,
    pub period: Period,
    pub cd_conta_contabil: String,
    /// Free text, matched by the expense-category predicate
    pub descricao: String,
    /// Signed balance
    pub valor: f64,
    /// Source line, for error reporting
    pub line: usize,
}

impl FinancialFact {
    pub fn new(
        registro_ans: impl Into<String>,
        period: Period,
        cd_conta_contabil: impl Into<String>,
        descricao: impl Into<String>,
        valor: f64,
    ) -> Self {
        FinancialFact {
            registro_ans: registro_ans.into(),
            period,
            cd_conta_contabil: cd_conta_contabil.into(),
            descricao: descricao.into(),
            valor,
            line: 0,
        }
    }

    /// Builder pattern: attach the source line
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }
}

/// Where a batch of facts came from; persisted with every row so the
/// duplicate guard can recognise an already-loaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactProvenance {
    pub source_file: String,
    /// SHA-256 of the file bytes
    pub source_hash: String,
    pub imported_at: DateTime<Utc>,
}

impl FactProvenance {
    pub fn new(source_file: impl Into<String>, source_hash: impl Into<String>) -> Self {
        FactProvenance {
            source_file: source_file.into(),
            source_hash: source_hash.into(),
            imported_at: Utc::now(),
        }
    }
}
