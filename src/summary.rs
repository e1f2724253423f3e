use crate::filter::segmenter::is_cjk;

pub const NO_SUMMARY: &str = "no summary extracted";

const MAX_SUMMARY_CHARS: usize = 300;
const SENTENCE_COUNT: usize = 3;

/// The three shortest Chinese sentences, shortest first, joined with `。`.
pub fn extract_summary<S: AsRef<str>>(fragments: &[S]) -> String {
    let text = fragments
        .iter()
        .map(|f| f.as_ref())
        .collect::<Vec<_>>()
        .join("\n");

    let mut sentences: Vec<&str> = text
        .split(|c: char| matches!(c, '。' | '！' | '？'))
        .map(str::trim)
        .filter(|s| s.chars().any(is_cjk))
        .collect();

    if sentences.is_empty() {
        return NO_SUMMARY.to_string();
    }

    // stable sort: equal lengths keep document order
    sentences.sort_by_key(|s| s.chars().count());

    let summary = sentences[..sentences.len().min(SENTENCE_COUNT)].join("。");
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        let cut: String = summary.chars().take(MAX_SUMMARY_CHARS).collect();
        format!("{}...", cut)
    } else {
        summary
    }
}
