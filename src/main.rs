mod api;
mod config;
mod db;
mod error;
mod fetch;
mod rows;
mod summarize;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use crate::rows::Row;

#[derive(Parser)]
#[command(name = "chronam_etl", about = "Newspaper archive search → SQLite → model summaries")]
struct Cli {
    /// Settings file (default: ./chronam.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target table as catalog.schema.name (overrides [table] settings)
    #[arg(short, long, global = true)]
    table: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Page through the search API and append every result to the table
    Fetch {
        /// Free-text search term (proxtext)
        #[arg(long)]
        term: Option<String>,
        /// State filter
        #[arg(long)]
        state: Option<String>,
        /// Number of pages to fetch
        #[arg(short = 'p', long)]
        pages: Option<u32>,
        /// Seconds to pause after each page
        #[arg(long)]
        delay: Option<u64>,
    },
    /// Summarize stored rows with the hosted model
    Summarize {
        /// Max rows to summarize (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Rows to display
        #[arg(long, default_value = "5")]
        show: usize,
    },
    /// Show the first stored rows
    Preview {
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },
    /// Row counts and columns of the target table
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
    let mut settings = config::load(cli.config.as_deref())?;
    let table = match cli.table.as_deref() {
        Some(qualified) => db::TableName::parse(qualified)?,
        None => settings.table.table_name()?,
    };

    let result = match cli.command {
        Commands::Fetch {
            term,
            state,
            pages,
            delay,
        } => {
            if let Some(t) = term {
                settings.search.term = t;
            }
            if let Some(s) = state {
                settings.search.state = s;
            }
            if let Some(p) = pages {
                settings.search.pages = p;
            }
            if let Some(d) = delay {
                settings.search.page_delay_secs = d;
            }

            let conn = db::connect(&settings.db_path)?;
            let client = api::SearchClient::new(&settings.search)?;
            let opts = fetch::FetchOptions {
                pages: settings.search.pages,
                page_delay: Duration::from_secs(settings.search.page_delay_secs),
            };
            println!(
                "Fetching {} pages for {:?} in {} into {}...",
                opts.pages, settings.search.term, settings.search.state, table
            );
            let report = fetch::run(&client, &conn, &table, &opts).await?;
            println!(
                "Wrote {} rows from {} pages.",
                report.rows_written, report.pages_written
            );
            if let Some(reason) = report.halted {
                println!("Stopped early: {}", reason);
            }
            Ok(())
        }
        Commands::Summarize { limit, show } => {
            let conn = db::connect(&settings.db_path)?;
            if !db::table_exists(&conn, &table)? {
                println!("Table {} does not exist. Run 'fetch' first.", table);
                return Ok(());
            }
            let rows = db::fetch_rows(&conn, &table, &settings.model.columns, limit)?;
            if rows.is_empty() {
                println!("No rows in {}.", table);
                return Ok(());
            }
            println!("Summarizing {} rows with {}...", rows.len(), settings.model.name);
            let model = summarize::ChatModel::new(&settings.model)?;
            let results = summarize::summarize_rows(
                &model,
                rows,
                &settings.model.prompt_template,
                &settings.model.date_column,
            )
            .await?;

            for (i, r) in results.iter().take(show).enumerate() {
                println!("\n{:>3}. {}", i + 1, format_row(&r.row, &settings.model.columns, 60));
                println!("     {}", r.summary);
            }
            Ok(())
        }
        Commands::Preview { limit } => {
            let conn = db::connect(&settings.db_path)?;
            if !db::table_exists(&conn, &table)? {
                println!("Table {} does not exist. Run 'fetch' first.", table);
                return Ok(());
            }
            let existing = db::table_columns(&conn, &table)?;
            let columns: Vec<String> = settings
                .model
                .columns
                .iter()
                .filter(|c| existing.iter().any(|e| e.eq_ignore_ascii_case(c)))
                .cloned()
                .collect();
            let columns = if columns.is_empty() { existing } else { columns };
            let rows = db::fetch_rows(&conn, &table, &columns, Some(limit))?;
            if rows.is_empty() {
                println!("No rows in {}.", table);
                return Ok(());
            }
            for (i, r) in rows.iter().enumerate() {
                println!("{:>3} | {}", i + 1, format_row(r, &columns, 40));
            }
            println!("\n{} rows shown from {}", rows.len(), table);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            if !db::table_exists(&conn, &table)? {
                println!("Table {} does not exist. Run 'fetch' first.", table);
                return Ok(());
            }
            let s = db::get_stats(&conn, &table)?;
            println!("Table:      {}", table);
            println!("Rows:       {}", s.rows);
            println!("Distinct:   {}", s.distinct);
            println!("Duplicates: {}", s.duplicates);
            println!("Columns:    {}", s.columns.join(", "));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_row(row: &Row, columns: &[String], width: usize) -> String {
    columns
        .iter()
        .map(|c| {
            let v = row.get(c).and_then(|v| v.as_deref()).unwrap_or("-");
            let flat = v.split_whitespace().collect::<Vec<_>>().join(" ");
            truncate(&flat, width)
        })
        .collect::<Vec<_>>()
        .join(" | ")
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
