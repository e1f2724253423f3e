use crate::identifier::Metadata;

use super::segmenter::{ColorStats, ColoredWords, PageResult};

/// Everything classified out of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentResult {
    pub metadata: Metadata,
    pub chinese: Vec<String>,
    pub english: Vec<String>,
    pub word_zones: Vec<String>,
    pub colored_words: ColoredWords,
    pub color_stats: ColorStats,
    /// (page number starting at 1, note) for pages that were skipped.
    pub page_failures: Vec<(usize, String)>,
}

impl DocumentResult {
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn has_both_languages(&self) -> bool {
        !self.chinese.is_empty() && !self.english.is_empty()
    }
}

/// Merge page results in page order. Fragments are concatenated as-is
/// (repeated paragraphs stay repeated); vocabulary is unioned.
pub fn aggregate(pages: Vec<PageResult>) -> DocumentResult {
    let mut doc = DocumentResult::default();
    for (idx, page) in pages.into_iter().enumerate() {
        if let Some(note) = page.failure {
            doc.page_failures.push((idx + 1, note));
        }
        doc.chinese.extend(page.chinese);
        doc.english.extend(page.english);
        doc.word_zones.extend(page.word_zones);
        doc.colored_words.merge(page.colored_words);
        for (color, count) in page.color_stats {
            *doc.color_stats.entry(color).or_insert(0) += count;
        }
    }
    doc
}
