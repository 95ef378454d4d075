use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ans_etl::db::latest_period;
use ans_etl::logging::init_logging;
use ans_etl::{
    collect_inputs, count_facts, count_providers, export_ranking_csv, get_source_file_stats,
    open_store, render_ranking, save_sql_queries, top_by_latest_quarter, top_by_latest_year,
    DedupGranularity, Period, Pipeline, PipelineConfig, Ranking,
};

#[derive(Parser)]
#[command(name = "ans-etl", version)]
#[command(about = "Load ANS provider registry and quarterly statements into SQLite and rank claims expenses")]
struct Cli {
    /// TOML config file (default: ./ans-etl.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover, probe and load every source file
    Ingest {
        /// Root of the downloaded statement tree
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Provider registry file, loaded first (repeatable)
        #[arg(long = "providers")]
        providers: Vec<PathBuf>,

        /// Extra statements file outside data_dir (repeatable)
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Period for the --file inputs, e.g. 3T2023
        #[arg(long, requires = "files")]
        period: Option<Period>,

        /// Duplicate guard: source-file or period
        #[arg(long)]
        dedup: Option<DedupGranularity>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Top providers by medical/hospital claims expense
    Report {
        #[arg(long)]
        top: Option<usize>,

        /// Also write both rankings as CSV here
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Write the ranking queries as standalone .sql files
    SaveQueries {
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// What is loaded, per source file
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }

    match cli.command {
        Command::Ingest {
            data_dir,
            providers,
            files,
            period,
            dedup,
            json,
        } => {
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if !providers.is_empty() {
                config.providers = providers;
            }
            if let Some(granularity) = dedup {
                config.dedup = granularity;
            }
            let explicit: Vec<(Option<Period>, PathBuf)> =
                files.into_iter().map(|path| (period, path)).collect();
            run_ingest(&config, &explicit, json)
        }
        Command::Report { top, export_dir } => {
            if let Some(n) = top {
                config.top_n = n;
            }
            if export_dir.is_some() {
                config.export_dir = export_dir;
            }
            run_report(&config)
        }
        Command::SaveQueries { out_dir } => {
            if let Some(dir) = out_dir {
                config.sql_dir = dir;
            }
            run_save_queries(&config)
        }
        Command::Status => run_status(&config),
    }
}

fn run_ingest(config: &PipelineConfig, explicit: &[(Option<Period>, PathBuf)], json: bool) -> Result<()> {
    println!("🗄️  ANS ETL - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Open store
    println!("\n🔧 Opening {}...", config.database.display());
    let mut conn = open_store(&config.database)
        .with_context(|| format!("Failed to open database '{}'", config.database.display()))?;

    // 2. Collect inputs
    println!("\n📂 Collecting source files (dedup: {})...", config.dedup);
    let inputs = collect_inputs(config, explicit)?;
    println!("✓ {} source files", inputs.len());

    // 3. Run
    println!("\n💾 Loading...");
    let summary = Pipeline::new(&mut conn, config)
        .run(&inputs)
        .context("Run aborted; files committed so far are kept")?;

    // 4. Summary
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.render());
    }

    println!("\n🔍 Database contains {} facts, {} providers", count_facts(&conn)?, count_providers(&conn)?);

    Ok(())
}

fn print_ranking(ranking: Option<&Ranking>, what: &str) {
    match ranking {
        Some(r) if !r.rows.is_empty() => {
            println!("\n🏆 Top {} operadoras - {} ({})", r.top_n, r.scope.title(), r.period_label);
            println!("{}", render_ranking(r));
        }
        Some(r) => println!("\n⚠️  No claims expenses found for {} ({})", what, r.period_label),
        None => println!("\n⚠️  No financial statements loaded yet"),
    }
}

fn run_report(config: &PipelineConfig) -> Result<()> {
    let conn = open_store(&config.database)
        .with_context(|| format!("Failed to open database '{}'", config.database.display()))?;

    let quarter = top_by_latest_quarter(&conn, config.top_n)?;
    let year = top_by_latest_year(&conn, config.top_n)?;

    print_ranking(quarter.as_ref(), "the latest quarter");
    print_ranking(year.as_ref(), "the latest year");

    if let Some(dir) = &config.export_dir {
        for ranking in quarter.iter().chain(year.iter()) {
            let path = export_ranking_csv(ranking, dir)?;
            println!("✓ Exported {}", path.display());
        }
    }

    Ok(())
}

fn run_save_queries(config: &PipelineConfig) -> Result<()> {
    for path in save_sql_queries(&config.sql_dir, config.top_n)? {
        println!("✓ Saved {}", path.display());
    }
    Ok(())
}

fn run_status(config: &PipelineConfig) -> Result<()> {
    let conn = open_store(&config.database)
        .with_context(|| format!("Failed to open database '{}'", config.database.display()))?;

    let stats = get_source_file_stats(&conn)?;

    println!("📊 {}", config.database.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for stat in &stats {
        println!(
            "{:>8} rows  {:<10} {}  ({}, {})",
            stat.row_count,
            stat.periods,
            stat.source_file,
            &stat.source_hash[..stat.source_hash.len().min(12)],
            stat.imported_at
        );
    }

    println!("\n✓ {} source files", stats.len());
    println!("✓ {} facts, {} providers", count_facts(&conn)?, count_providers(&conn)?);
    if let Some(latest) = latest_period(&conn)? {
        println!("✓ Latest period: {}", latest);
    }

    Ok(())
}
