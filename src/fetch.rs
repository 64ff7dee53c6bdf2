use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::api::SearchClient;
use crate::db::{self, TableName};
use crate::error::FetchError;
use crate::rows::{self, RowSchema};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub pages: u32,
    pub page_delay: Duration,
}

/// Outcome of one pass over the page range.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub pages_written: u32,
    pub rows_written: usize,
    /// Message of the HTTP/network error that stopped pagination, if any.
    pub halted: Option<String>,
}

/// Fetch pages `0..pages` and append every item to `table`.
///
/// HTTP status and network errors anywhere in the range are caught once,
/// logged, and end the run with `halted` set; pages already written stay.
/// Any other failure is returned as an error.
pub async fn run(
    client: &SearchClient,
    conn: &Connection,
    table: &TableName,
    opts: &FetchOptions,
) -> Result<FetchReport, FetchError> {
    let mut report = FetchReport::default();

    let pb = ProgressBar::new(opts.pages as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} page {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let result = paginate(client, conn, table, opts, &mut report, &pb).await;
    pb.finish_and_clear();

    match result {
        Ok(()) => {}
        Err(e) if e.halts_pagination() => {
            error!(error = %e, pages_written = report.pages_written, "search request failed; halting pagination");
            report.halted = Some(e.to_string());
        }
        Err(e) => return Err(e),
    }

    info!(
        pages = report.pages_written,
        rows = report.rows_written,
        table = %table,
        "fetch finished"
    );
    Ok(report)
}

async fn paginate(
    client: &SearchClient,
    conn: &Connection,
    table: &TableName,
    opts: &FetchOptions,
    report: &mut FetchReport,
    pb: &ProgressBar,
) -> Result<(), FetchError> {
    for page in 0..opts.pages {
        // Schema comes from the unpaged request and is re-read every page.
        let sample = client.search(None).await?;
        let schema = RowSchema::infer(&sample)?;

        let body = client.search(Some(page + 1)).await?;
        let rows = rows::items_to_rows(&body)?;
        if rows.is_empty() {
            warn!(page, "page returned no items");
        }

        db::ensure_table(conn, table, &schema)?;
        let written = db::append_rows(conn, table, &rows)?;
        report.pages_written += 1;
        report.rows_written += written;
        info!(page, rows = written, "page appended");
        pb.set_message(format!("{} rows", report.rows_written));
        pb.inc(1);

        tokio::time::sleep(opts.page_delay).await;
    }
    Ok(())
}
