pub mod batch;
pub mod locks;
pub mod task;

use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, CatalogRow};
use crate::config::Settings;
use crate::error::{IngestError, IngestResult};
use crate::filter::aggregate::DocumentResult;
use crate::filter::classify_document;
use crate::identifier::{
    document_id, file_name, output_file_name, parse_identifier, trailing_annotation, Metadata,
};
use crate::report::{is_complete_report, render_report, write_report};
use crate::search::{SearchDocument, SearchSink};
use crate::source::DocumentSource;

use locks::DocLocks;
use task::{PipelineTask, TaskOutcome, TaskState};

/// Drives one document through skip check, stuck repair, classification and
/// the two sinks. Shared across workers behind an `Arc`.
pub struct Pipeline {
    settings: Settings,
    catalog: Arc<dyn Catalog>,
    search: Arc<dyn SearchSink>,
    source: Arc<dyn DocumentSource>,
    locks: DocLocks,
    stuck_pattern: Option<Regex>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        catalog: Arc<dyn Catalog>,
        search: Arc<dyn SearchSink>,
        source: Arc<dyn DocumentSource>,
    ) -> IngestResult<Self> {
        let stuck_pattern = settings
            .stuck_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| IngestError::Config(format!("stuck_pattern: {}", e)))?;
        Ok(Pipeline {
            settings,
            catalog,
            search,
            source,
            locks: DocLocks::new(),
            stuck_pattern,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn task_for_row(&self, row: &CatalogRow) -> PipelineTask {
        PipelineTask::from_row(row, &self.settings.output_dir, self.settings.max_retries)
    }

    pub fn task_for_url(&self, url: &str, output: Option<PathBuf>) -> PipelineTask {
        let out = output.unwrap_or_else(|| {
            self.settings
                .output_dir
                .join(output_file_name(&document_id(url)))
        });
        PipelineTask::new(url, None, out, self.settings.max_retries)
    }

    pub async fn process(&self, mut task: PipelineTask) -> IngestResult<TaskOutcome> {
        let doc_id = task.doc_id();
        let _guard = self.locks.acquire(&doc_id).await;
        debug!(doc_id = %doc_id, state = %TaskState::Pending, "task started");

        let (metadata, identifier_parsed) = match parse_identifier(file_name(&task.source_url)) {
            Ok(m) => (m, true),
            Err(e) => {
                warn!(doc_id = %doc_id, "{}; continuing with empty metadata", e);
                (Metadata::default(), false)
            }
        };

        if self.already_indexed(&task, &doc_id).await {
            info!(doc_id = %doc_id, "already indexed, skipping");
            return Ok(TaskOutcome::Skipped);
        }

        loop {
            debug!(doc_id = %doc_id, state = %TaskState::StuckCheck);
            if self.looks_stuck(&task, &doc_id) {
                warn!(doc_id = %doc_id, path = %task.output_path.display(), "partial output found, repairing");
                self.repair(&task, &doc_id).await;
                let reason = format!("partial output at {}", task.output_path.display());
                self.spend_attempt(&mut task, &doc_id, reason, self.settings.stuck_cooldown())
                    .await?;
                continue;
            }

            debug!(doc_id = %doc_id, state = %TaskState::Classifying);
            let doc = match self.classify(&task, metadata.clone()).await {
                Ok(doc) => doc,
                Err(e) if e.is_retryable() => {
                    self.spend_attempt(&mut task, &doc_id, e.to_string(), self.settings.retry_delay())
                        .await?;
                    continue;
                }
                Err(e) => return Err(self.fail(&doc_id, e)),
            };

            debug!(doc_id = %doc_id, state = %TaskState::WritingIndex);
            let body = SearchDocument::from_result(&doc);
            loop {
                match self.write_index(&doc_id, &body).await {
                    Ok(()) => break,
                    Err(e) if e.is_retryable() => {
                        self.spend_attempt(&mut task, &doc_id, e.to_string(), self.settings.retry_delay())
                            .await?;
                    }
                    Err(e) => return Err(self.fail(&doc_id, e)),
                }
            }

            debug!(doc_id = %doc_id, state = %TaskState::WritingFile);
            let report = render_report(file_name(&task.source_url), &doc);
            let report_error = match write_report(&task.output_path, &report) {
                Ok(()) => None,
                Err(e) => {
                    // the index already holds the canonical copy
                    error!(doc_id = %doc_id, "report not written: {}", e);
                    Some(e.to_string())
                }
            };

            debug!(doc_id = %doc_id, state = %TaskState::Done);
            info!(
                doc_id = %doc_id,
                chinese = doc.chinese.len(),
                english = doc.english.len(),
                "document ingested"
            );
            return Ok(TaskOutcome::Written {
                metadata: doc.metadata,
                identifier_parsed,
                report_error,
            });
        }
    }

    /// True when the index holds a complete copy whose annotation matches
    /// the catalog's. Lookup failures count as "not indexed".
    async fn already_indexed(&self, task: &PipelineTask, doc_id: &str) -> bool {
        let expected = match self.catalog.annotation_for(&task.source_url).await {
            Ok(Some(a)) => a,
            Ok(None) => return false,
            Err(e) => {
                warn!(doc_id, "annotation lookup failed: {}", e);
                return false;
            }
        };
        let stored = match self.search.get(doc_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return false,
            Err(e) => {
                warn!(doc_id, "index lookup failed: {}", e);
                return false;
            }
        };
        let annotation = if stored.metadata.topic.is_empty() {
            trailing_annotation(doc_id)
        } else {
            Some(stored.metadata.topic.clone())
        };
        annotation.as_deref() == Some(expected.as_str()) && stored.is_complete()
    }

    /// A non-empty report on disk that stops before its summary section is a
    /// leftover from an interrupted run. Complete reports are simply
    /// overwritten by the next write.
    fn looks_stuck(&self, task: &PipelineTask, doc_id: &str) -> bool {
        if let Some(re) = &self.stuck_pattern {
            if !re.is_match(doc_id) {
                return false;
            }
        }
        match std::fs::read(&task.output_path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                !text.trim().is_empty() && !is_complete_report(&text)
            }
            Err(_) => false,
        }
    }

    async fn repair(&self, task: &PipelineTask, doc_id: &str) {
        if let Err(e) = std::fs::remove_file(&task.output_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(doc_id, "could not remove partial report: {}", e);
            }
        }
        if let Err(e) = self.search.delete(doc_id).await {
            warn!(doc_id, "could not remove partial index document: {}", e);
        }
    }

    async fn classify(&self, task: &PipelineTask, metadata: Metadata) -> IngestResult<DocumentResult> {
        let pages = self.source.fetch_pages(&task.source_url).await?;
        let doc = tokio::task::spawn_blocking(move || classify_document(&pages, metadata))
            .await
            .map_err(|e| IngestError::Extraction(format!("classifier task failed: {}", e)))?;
        for (page, note) in &doc.page_failures {
            warn!(source = %task.source_url, page, "page skipped: {}", note);
        }
        if !doc.has_both_languages() {
            warn!(source = %task.source_url, "document lacks Chinese or English text");
        }
        Ok(doc)
    }

    async fn write_index(&self, doc_id: &str, body: &SearchDocument) -> IngestResult<()> {
        self.search.ensure_index().await?;
        self.search.upsert(doc_id, body).await
    }

    /// Charge one attempt; past the budget the task is abandoned with `last`
    /// as the reported cause.
    async fn spend_attempt(
        &self,
        task: &mut PipelineTask,
        doc_id: &str,
        last: String,
        wait: std::time::Duration,
    ) -> IngestResult<()> {
        if !task.consume_attempt() {
            return Err(self.fail(
                doc_id,
                IngestError::RetriesExhausted {
                    doc_id: doc_id.to_string(),
                    attempts: self.settings.max_retries,
                    last,
                },
            ));
        }
        warn!(
            doc_id,
            remaining = task.attempts_remaining,
            "attempt failed, retrying in {:.1}s: {}",
            wait.as_secs_f64(),
            last
        );
        tokio::time::sleep(wait).await;
        Ok(())
    }

    fn fail(&self, doc_id: &str, err: IngestError) -> IngestError {
        error!(doc_id, state = %TaskState::Failed, "{}", err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bilingual_pages, MemoryCatalog, MemorySink, StaticSource};

    const URL: &str = "http://h/pdfs/JaneDoe_2019[简妮][演讲主题].pdf";
    const DOC_ID: &str = "JaneDoe_2019[简妮][演讲主题]";

    struct Fixture {
        pipeline: Pipeline,
        catalog: Arc<MemoryCatalog>,
        sink: Arc<MemorySink>,
        source: Arc<StaticSource>,
        _dir: tempfile::TempDir,
    }

    fn fixture(settings: Settings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            output_dir: dir.path().join("out"),
            ..settings
        };
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.add(URL, Some("演讲主题"));
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(StaticSource::new());
        source.insert(URL, bilingual_pages());
        let pipeline = Pipeline::new(
            settings,
            catalog.clone(),
            sink.clone(),
            source.clone(),
        )
        .unwrap();
        Fixture {
            pipeline,
            catalog,
            sink,
            source,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn writes_index_then_report() {
        let f = fixture(Settings::immediate());
        let task = f.pipeline.task_for_url(URL, None);
        let out = task.output_path.clone();

        let outcome = f.pipeline.process(task).await.unwrap();
        match outcome {
            TaskOutcome::Written {
                metadata,
                identifier_parsed,
                report_error,
            } => {
                assert_eq!(metadata.english_name, "JaneDoe");
                assert!(identifier_parsed);
                assert_eq!(report_error, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        let stored = f.sink.stored(DOC_ID).unwrap();
        assert!(stored.is_complete());
        assert_eq!(stored.metadata.topic, "演讲主题");
        assert!(std::fs::read_to_string(out).unwrap().contains("=== Summary ==="));
        assert_eq!(f.sink.ensure_calls(), 1);
    }

    #[tokio::test]
    async fn second_run_is_skipped() {
        let f = fixture(Settings::immediate());
        let first = f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap();
        let second = f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap();
        assert!(matches!(first, TaskOutcome::Written { .. }));
        assert_eq!(second, TaskOutcome::Skipped);
        assert_eq!(f.sink.upserts(), 1);
        assert_eq!(f.source.fetches(), 1);
    }

    #[tokio::test]
    async fn annotation_mismatch_reprocesses() {
        let f = fixture(Settings::immediate());
        f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap();
        f.catalog.set_annotation(URL, Some("另一个主题"));
        let again = f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap();
        assert!(matches!(again, TaskOutcome::Written { .. }));
        assert_eq!(f.sink.upserts(), 2);
    }

    #[tokio::test]
    async fn incomplete_index_copy_is_not_skipped() {
        let f = fixture(Settings::immediate());
        let mut partial = SearchDocument::default();
        partial.metadata.topic = "演讲主题".into();
        partial.chinese_content = "只有中文".into();
        f.sink.put(DOC_ID, partial);
        let outcome = f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Written { .. }));
    }

    #[tokio::test]
    async fn transient_index_failure_is_retried() {
        let f = fixture(Settings::immediate());
        f.sink.fail_next_upserts(2);
        let outcome = f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Written { .. }));
        assert_eq!(f.sink.upserts(), 1);
        // the document is downloaded once; only the write is repeated
        assert_eq!(f.source.fetches(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_abandons_task() {
        let f = fixture(Settings::immediate());
        f.sink.fail_next_upserts(10);
        let task = f.pipeline.task_for_url(URL, None);
        let out = task.output_path.clone();
        let err = f.pipeline.process(task).await.unwrap_err();
        match err {
            IngestError::RetriesExhausted { doc_id, attempts, .. } => {
                assert_eq!(doc_id, DOC_ID);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.sink.upsert_attempts(), 3);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn download_failures_refetch() {
        let f = fixture(Settings::immediate());
        f.source.fail_next(1);
        let outcome = f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Written { .. }));
        assert_eq!(f.source.fetches(), 2);
    }

    #[tokio::test]
    async fn undecodable_document_is_not_refetched() {
        let f = fixture(Settings::immediate());
        f.source.corrupt(URL);
        let err = f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
        assert_eq!(f.source.fetches(), 1);
        assert_eq!(f.sink.upsert_attempts(), 0);
    }

    #[tokio::test]
    async fn stuck_document_is_repaired() {
        let f = fixture(Settings::immediate());
        let task = f.pipeline.task_for_url(URL, None);
        std::fs::create_dir_all(task.output_path.parent().unwrap()).unwrap();
        std::fs::write(&task.output_path, "=== Metadata ===\nhalf").unwrap();
        let mut partial = SearchDocument::default();
        partial.english_content = "half".into();
        f.sink.put(DOC_ID, partial);

        let out = task.output_path.clone();
        let outcome = f.pipeline.process(task).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Written { .. }));
        assert_eq!(f.sink.deletes(), 1);
        let report = std::fs::read_to_string(out).unwrap();
        assert!(report.contains("=== Summary ==="));
        assert!(f.sink.stored(DOC_ID).unwrap().is_complete());
    }

    #[tokio::test]
    async fn unannotated_rerun_keeps_complete_output() {
        let settings = Settings {
            max_retries: 1,
            ..Settings::immediate()
        };
        let f = fixture(settings);
        f.catalog.set_annotation(URL, None);

        let first = f.pipeline.process(f.pipeline.task_for_url(URL, None)).await.unwrap();
        let task = f.pipeline.task_for_url(URL, None);
        let out = task.output_path.clone();
        let second = f.pipeline.process(task).await.unwrap();

        assert!(matches!(first, TaskOutcome::Written { .. }));
        assert!(matches!(second, TaskOutcome::Written { .. }));
        assert_eq!(f.sink.deletes(), 0);
        assert_eq!(f.sink.upserts(), 2);
        assert!(f.sink.stored(DOC_ID).unwrap().is_complete());
        assert!(is_complete_report(&std::fs::read_to_string(out).unwrap()));
    }

    #[tokio::test]
    async fn stuck_pattern_limits_repair() {
        let settings = Settings {
            stuck_pattern: Some("^SomeoneElse".into()),
            ..Settings::immediate()
        };
        let f = fixture(settings);
        let task = f.pipeline.task_for_url(URL, None);
        std::fs::create_dir_all(task.output_path.parent().unwrap()).unwrap();
        std::fs::write(&task.output_path, "stale").unwrap();

        f.pipeline.process(task).await.unwrap();
        assert_eq!(f.sink.deletes(), 0);
    }

    #[tokio::test]
    async fn stuck_repair_spends_budget() {
        let settings = Settings {
            max_retries: 1,
            ..Settings::immediate()
        };
        let f = fixture(settings);
        let task = f.pipeline.task_for_url(URL, None);
        std::fs::create_dir_all(task.output_path.parent().unwrap()).unwrap();
        std::fs::write(&task.output_path, "stale").unwrap();

        let err = f.pipeline.process(task).await.unwrap_err();
        assert!(matches!(err, IngestError::RetriesExhausted { .. }));
        assert_eq!(f.source.fetches(), 0);
    }

    #[tokio::test]
    async fn report_failure_keeps_index_write() {
        let f = fixture(Settings::immediate());
        let dir = tempfile::tempdir().unwrap();
        // a directory where the report file should go
        let blocked = dir.path().join("report.txt");
        std::fs::create_dir_all(blocked.join("x")).unwrap();

        let task = f.pipeline.task_for_url(URL, Some(blocked));
        let outcome = f.pipeline.process(task).await.unwrap();
        match outcome {
            TaskOutcome::Written { report_error, .. } => assert!(report_error.is_some()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.sink.upserts(), 1);
    }

    #[tokio::test]
    async fn unparsed_identifier_still_ingested() {
        let f = fixture(Settings::immediate());
        let url = "http://h/pdfs/random-notes.pdf";
        f.source.insert(url, bilingual_pages());
        let outcome = f.pipeline.process(f.pipeline.task_for_url(url, None)).await.unwrap();
        match outcome {
            TaskOutcome::Written {
                metadata,
                identifier_parsed,
                ..
            } => {
                assert!(!identifier_parsed);
                assert!(metadata.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(f.sink.stored("random-notes").is_some());
    }
}
