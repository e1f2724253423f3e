use std::fmt;
use std::path::{Path, PathBuf};

use crate::catalog::CatalogRow;
use crate::identifier::{document_id, output_file_name, Metadata};

/// One document's worth of ingestion work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTask {
    pub source_url: String,
    /// `None` for ad-hoc runs outside the catalog.
    pub catalog_id: Option<i64>,
    pub output_path: PathBuf,
    pub attempts_remaining: u32,
}

impl PipelineTask {
    pub fn new(
        source_url: impl Into<String>,
        catalog_id: Option<i64>,
        output_path: PathBuf,
        attempts: u32,
    ) -> Self {
        PipelineTask {
            source_url: source_url.into(),
            catalog_id,
            output_path,
            attempts_remaining: attempts,
        }
    }

    pub fn from_row(row: &CatalogRow, output_dir: &Path, attempts: u32) -> Self {
        let out = output_dir.join(output_file_name(&document_id(&row.source_url)));
        Self::new(row.source_url.clone(), Some(row.id), out, attempts)
    }

    pub fn doc_id(&self) -> String {
        document_id(&self.source_url)
    }

    /// Spend one attempt. Returns false once the budget is gone.
    pub fn consume_attempt(&mut self) -> bool {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    StuckCheck,
    Classifying,
    WritingIndex,
    WritingFile,
    Done,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::StuckCheck => "stuck-check",
            TaskState::Classifying => "classifying",
            TaskState::WritingIndex => "writing(index)",
            TaskState::WritingFile => "writing(file)",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Already fully indexed; nothing was written.
    Skipped,
    Written {
        metadata: Metadata,
        identifier_parsed: bool,
        /// Set when the index write succeeded but the report file did not.
        report_error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_catalog_row() {
        let row = CatalogRow {
            id: 7,
            source_url: "http://h/pdfs/JaneDoe_2019[简妮][主题].pdf".into(),
        };
        let task = PipelineTask::from_row(&row, Path::new("out"), 3);
        assert_eq!(task.catalog_id, Some(7));
        assert_eq!(task.doc_id(), "JaneDoe_2019[简妮][主题]");
        assert_eq!(
            task.output_path,
            Path::new("out").join("JaneDoe_2019(简妮)(主题)_filtered.txt")
        );
    }

    #[test]
    fn attempt_budget_runs_out() {
        let mut task = PipelineTask::new("u", None, PathBuf::from("o"), 2);
        assert!(task.consume_attempt());
        assert!(!task.consume_attempt());
        assert!(!task.consume_attempt());
        assert_eq!(task.attempts_remaining, 0);
    }
}
