mod catalog;
mod config;
mod errlog;
mod error;
mod filter;
mod identifier;
mod pipeline;
mod query;
mod report;
mod search;
mod source;
mod summary;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;

use catalog::SqliteCatalog;
use config::Settings;
use errlog::ErrorLog;
use pipeline::batch::BatchRunner;
use pipeline::task::TaskOutcome;
use pipeline::Pipeline;
use query::{Field, Predicate, Query};
use search::ElasticSink;
use source::{HttpDocumentSource, SniffingExtractor};

#[derive(Parser)]
#[command(
    name = "talk_ingest",
    about = "Bilingual transcript classifier and search-index loader"
)]
struct Cli {
    /// Settings file (default: ./talk_ingest.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the catalog schema
    Init,
    /// Load transcript URLs (one per line, optional tab + annotation)
    Import { file: PathBuf },
    /// Ingest catalog rows in pages
    Run {
        /// Catalog offset to resume from
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Max documents to ingest (default: all remaining)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Ingest a single document by URL or path
    One {
        url: String,
        /// Report path (default: <output_dir>/<id>_filtered.txt)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List catalog rows
    Pending {
        /// Filter by year (e.g. 2019)
        #[arg(short, long)]
        year: Option<String>,
        /// Earliest year (inclusive)
        #[arg(long)]
        since: Option<String>,
        /// Latest year (inclusive)
        #[arg(long)]
        until: Option<String>,
        /// Filter by English speaker name (substring)
        #[arg(short, long)]
        speaker: Option<String>,
        /// Filter by highlight annotation (substring)
        #[arg(short, long)]
        topic: Option<String>,
        /// Only rows not yet processed
        #[arg(short, long)]
        unprocessed: bool,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show catalog statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let catalog = open_catalog(&settings)?;
            println!("Catalog ready at {}", settings.catalog_path.display());
            let s = catalog.stats()?;
            println!("{} talks ({} with a source URL)", s.total, s.with_url);
            Ok(())
        }
        Commands::Import { file } => {
            let catalog = open_catalog(&settings)?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let rows = parse_import(&text);
            let inserted = catalog.import(&rows)?;
            println!("Inserted {} new URLs ({} total in file)", inserted, rows.len());
            Ok(())
        }
        Commands::Run { offset, limit } => {
            let catalog = Arc::new(open_catalog(&settings)?);
            let pipeline = build_pipeline(settings.clone(), catalog)?;
            let runner = BatchRunner::new(pipeline, Arc::new(ErrorLog::new(&settings.error_log)));

            let stop = runner.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing in-flight documents");
                    stop.store(true, Ordering::SeqCst);
                }
            });

            let summary = runner.run(offset, limit).await?;
            if summary.total() == 0 && !summary.interrupted {
                println!("Nothing to ingest from offset {}. Run 'import' first?", offset);
                return Ok(());
            }
            summary.print();
            if summary.failed > 0 {
                println!("Failures logged to {}", settings.error_log.display());
            }
            Ok(())
        }
        Commands::One { url, out } => {
            let catalog = Arc::new(open_catalog(&settings)?);
            let errlog = ErrorLog::new(&settings.error_log);
            let pipeline = build_pipeline(settings.clone(), catalog)?;
            let task = pipeline.task_for_url(&url, out);
            let out_path = task.output_path.clone();
            match pipeline.process(task).await {
                Ok(TaskOutcome::Skipped) => {
                    println!("Already indexed: {}", identifier::document_id(&url));
                    Ok(())
                }
                Ok(TaskOutcome::Written { report_error, .. }) => {
                    println!("Indexed {}", identifier::document_id(&url));
                    match report_error {
                        None => println!("Report: {}", out_path.display()),
                        Some(e) => {
                            errlog.record(&identifier::document_id(&url), &e);
                            println!("Report not written: {}", e);
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    errlog.record(&identifier::document_id(&url), &e.to_string());
                    Err(e.into())
                }
            }
        }
        Commands::Pending {
            year,
            since,
            until,
            speaker,
            topic,
            unprocessed,
            limit,
        } => {
            let catalog = open_catalog(&settings)?;
            let mut query = Query::new().filter(Predicate::is_not_null(Field::SourceUrl));
            if let Some(y) = year {
                query = query.filter(Predicate::eq(Field::Year, y));
            }
            if let Some(y) = since {
                query = query.filter(Predicate::ge(Field::Year, y));
            }
            if let Some(y) = until {
                query = query.filter(Predicate::le(Field::Year, y));
            }
            if let Some(t) = topic {
                query = query.filter(Predicate::like(Field::HighlightAnnotation, format!("%{}%", t)));
            }
            if let Some(s) = speaker {
                query = query.filter(Predicate::like(Field::EnglishName, format!("%{}%", s)));
            }
            if unprocessed {
                query = query.filter(Predicate::is_null(Field::ProcessedAt));
            }
            let rows = catalog.list(&query.order_by(Field::Id).limit(limit))?;
            if rows.is_empty() {
                println!("No talks found.");
                return Ok(());
            }

            println!(
                "{:>5} | {:<40} | {:<20} | {:<4} | {:<19} | {:<24}",
                "id", "Document", "Speaker", "Year", "Processed", "Last error"
            );
            println!("{}", "-".repeat(125));
            for r in &rows {
                let url = r.source_url.as_deref().unwrap_or("");
                println!(
                    "{:>5} | {:<40} | {:<20} | {:<4} | {:<19} | {:<24}",
                    r.id,
                    truncate(&identifier::document_id(url), 40),
                    truncate(r.english_name.as_deref().unwrap_or("-"), 20),
                    r.year.as_deref().unwrap_or("-"),
                    r.processed_at.as_deref().unwrap_or("-"),
                    truncate(r.last_error.as_deref().unwrap_or(""), 24),
                );
            }
            println!("\n{} talks", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let catalog = open_catalog(&settings)?;
            let s = catalog.stats()?;
            println!("Total:     {}", s.total);
            println!("With URL:  {}", s.with_url);
            println!("Processed: {}", s.processed);
            println!("Failed:    {}", s.failed);
            println!("Pending:   {}", s.with_url.saturating_sub(s.processed));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_catalog(settings: &Settings) -> anyhow::Result<SqliteCatalog> {
    let catalog = SqliteCatalog::open(
        &settings.catalog_path,
        Duration::from_secs(settings.write_timeout_secs),
    )
    .with_context(|| format!("failed to open catalog {}", settings.catalog_path.display()))?;
    catalog.init_schema()?;
    Ok(catalog)
}

fn build_pipeline(settings: Settings, catalog: Arc<SqliteCatalog>) -> anyhow::Result<Arc<Pipeline>> {
    let search = ElasticSink::new(
        &settings.search_url,
        &settings.index_name,
        Duration::from_secs(settings.check_timeout_secs),
        Duration::from_secs(settings.write_timeout_secs),
    )?;
    let source = HttpDocumentSource::new(
        Duration::from_secs(settings.download_timeout_secs),
        SniffingExtractor,
    )?;
    let pipeline = Pipeline::new(settings, catalog, Arc::new(search), Arc::new(source))?;
    Ok(Arc::new(pipeline))
}

/// `url[\tannotation]` per line; blank lines and `#` comments are ignored.
fn parse_import(text: &str) -> Vec<(String, Option<String>)> {
    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .map(|line| {
            let mut parts = line.splitn(2, '\t');
            let url = parts.next().unwrap_or("").trim().to_string();
            let annotation = parts
                .next()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            (url, annotation)
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
