// ANS ETL - Core Library
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod probe;          // Encoding + delimiter detection
pub mod schema;         // Canonical schema + header resolution
pub mod value;          // Monetary string normalization
pub mod period;         // (year, quarter) resolution
pub mod entities;       // Provider, FinancialFact
pub mod parser;         // Discovery + decoding
pub mod db;
pub mod deduplication;  // Whole-file duplicate guard
pub mod loader;         // Canonical rows + persistence
pub mod pipeline;
pub mod aggregation;    // Top-N expense rankings
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use error::{IngestError, RowPersistFailure, ValueParseFallback};
pub use probe::{probe_file, ProbeResult};
pub use schema::{CanonicalField, CanonicalSchema, EntityKind, ResolvedSchema};
pub use value::{format_brl, normalize_value, parse_amount};
pub use period::{Period, PeriodResolver, PeriodSource};
pub use entities::{FactProvenance, FinancialFact, Provider};
pub use parser::{detect_kind, discover, is_ranking_export, read_table, FileKind, RawTable, SourceFile};
pub use db::{
    open_store, setup_database, get_source_file_stats, count_facts, count_providers,
    SourceFileStat,
};
pub use deduplication::{DedupGranularity, GuardDecision};
pub use loader::{CanonicalRows, PersistResult};
pub use pipeline::{collect_inputs, Pipeline, RunSummary, SkippedFile};
pub use aggregation::{
    is_medical_claims_expense, top_by_latest_quarter, top_by_latest_year,
    export_ranking_csv, render_ranking, save_sql_queries, Ranking, RankedProvider, RankingScope,
};
pub use config::PipelineConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
