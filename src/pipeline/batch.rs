use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::catalog::CatalogRow;
use crate::errlog::ErrorLog;
use crate::error::IngestResult;
use crate::identifier::document_id;

use super::task::TaskOutcome;
use super::Pipeline;

/// Totals for one `run`, plus where to resume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unparsed: usize,
    pub next_offset: usize,
    pub interrupted: bool,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }

    pub fn print(&self) {
        println!(
            "Done: {} documents ({} processed, {} skipped, {} failed, {} unparsed identifiers).",
            self.total(),
            self.processed,
            self.skipped,
            self.failed,
            self.unparsed
        );
        if self.interrupted {
            println!("Interrupted. Resume with --offset {}", self.next_offset);
        }
    }
}

/// Walks the catalog page by page and feeds each row through the pipeline.
/// Offsets are only ever advanced here, so workers never see the same row.
pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    errlog: Arc<ErrorLog>,
    stop: Arc<AtomicBool>,
}

type Finished = (CatalogRow, IngestResult<TaskOutcome>);

impl BatchRunner {
    pub fn new(pipeline: Arc<Pipeline>, errlog: Arc<ErrorLog>) -> Self {
        BatchRunner {
            pipeline,
            errlog,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag stops dispatch; in-flight tasks still finish.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub async fn run(&self, start_offset: usize, limit: Option<usize>) -> IngestResult<BatchSummary> {
        let settings = self.pipeline.settings();
        let catalog = self.pipeline.catalog();
        let page_size = settings.page_size.max(1);
        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));

        let available = catalog.count_pending().await?.saturating_sub(start_offset);
        let planned = limit.map_or(available, |l| l.min(available));
        info!(offset = start_offset, planned, "starting batch");

        let pb = ProgressBar::new(planned as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let mut summary = BatchSummary {
            next_offset: start_offset,
            ..Default::default()
        };
        let mut dispatched = 0usize;

        'pages: loop {
            let want = page_size.min(planned - dispatched);
            if want == 0 {
                break;
            }
            let rows = match catalog.fetch_pending(summary.next_offset, want).await {
                Ok(rows) => rows,
                Err(e) => {
                    error!(offset = summary.next_offset, "catalog read failed: {}", e);
                    self.errlog.record("catalog", &e.to_string());
                    summary.interrupted = true;
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }
            let full_page = rows.len() == page_size;

            let mut workers: JoinSet<Finished> = JoinSet::new();
            for row in rows {
                if self.stop.load(Ordering::SeqCst) {
                    summary.interrupted = true;
                    self.drain(&mut workers, &mut summary, &pb).await;
                    break 'pages;
                }

                // acquiring here keeps at most `concurrency` tasks in flight
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break 'pages,
                };
                let pipeline = Arc::clone(&self.pipeline);
                workers.spawn(async move {
                    let _permit = permit;
                    let task = pipeline.task_for_row(&row);
                    let result = pipeline.process(task).await;
                    (row, result)
                });
                dispatched += 1;
                summary.next_offset += 1;

                while let Some(joined) = workers.try_join_next() {
                    self.settle(joined, &mut summary, &pb).await;
                }

                if settings.pause_every > 0 && dispatched % settings.pause_every == 0 {
                    tokio::time::sleep(settings.short_pause()).await;
                }
            }
            self.drain(&mut workers, &mut summary, &pb).await;

            if !full_page {
                break;
            }
            if dispatched < planned {
                info!(next_offset = summary.next_offset, "page done, pausing");
                tokio::time::sleep(settings.page_pause()).await;
            }
        }

        pb.finish_and_clear();
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch finished"
        );
        Ok(summary)
    }

    async fn drain(&self, workers: &mut JoinSet<Finished>, summary: &mut BatchSummary, pb: &ProgressBar) {
        while let Some(joined) = workers.join_next().await {
            self.settle(joined, summary, pb).await;
        }
    }

    /// Tally one finished task and write its outcome back to the catalog.
    async fn settle(
        &self,
        joined: Result<Finished, tokio::task::JoinError>,
        summary: &mut BatchSummary,
        pb: &ProgressBar,
    ) {
        pb.inc(1);
        let (row, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("worker panicked: {}", e);
                self.errlog.record("worker", &e.to_string());
                summary.failed += 1;
                return;
            }
        };
        let catalog = self.pipeline.catalog();

        let write_back = match result {
            Ok(TaskOutcome::Skipped) => {
                summary.skipped += 1;
                Ok(())
            }
            Ok(TaskOutcome::Written {
                metadata,
                identifier_parsed,
                report_error,
            }) => {
                summary.processed += 1;
                if !identifier_parsed {
                    summary.unparsed += 1;
                }
                if let Some(e) = report_error {
                    self.errlog.record(&document_id(&row.source_url), &e);
                }
                catalog.mark_processed(row.id, &metadata).await
            }
            Err(e) => {
                summary.failed += 1;
                let msg = e.to_string();
                self.errlog.record(&document_id(&row.source_url), &msg);
                catalog.mark_failed(row.id, &msg).await
            }
        };
        if let Err(e) = write_back {
            warn!(id = row.id, "catalog write-back failed: {}", e);
        }
    }
}
