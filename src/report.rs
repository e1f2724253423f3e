use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{IngestError, IngestResult};
use crate::filter::aggregate::DocumentResult;
use crate::summary::extract_summary;

static COLOR_MARK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[r=[^\]]+\]").unwrap());
static DEFINITION_MARK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[:[^\]]+\]").unwrap());
static STRAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\w\s\x{4e00}-\x{9fa5}，。、；：？！（）《》【】.,;:!?'"()\-]"#).unwrap()
});

/// Strip inline markup and stray symbols from a paragraph before it is
/// written to the report.
pub fn clean_text(text: &str) -> String {
    let text = COLOR_MARK_RE.replace_all(text, "");
    let text = DEFINITION_MARK_RE.replace_all(&text, "");
    STRAY_RE.replace_all(&text, "").into_owned()
}

/// Last section of every report; a file without it was cut short.
const SUMMARY_LABEL: &str = "Summary";

fn header(out: &mut String, label: &str) {
    let _ = writeln!(out, "=== {} ===", label);
}

/// Render the plain-text report. Section order is fixed.
pub fn render_report(source_name: &str, doc: &DocumentResult) -> String {
    let mut out = String::new();
    let m = &doc.metadata;

    header(&mut out, "Metadata");
    let _ = writeln!(out, "File: {}", source_name);
    let _ = writeln!(out, "English name: {}", m.english_name);
    let _ = writeln!(out, "Chinese name: {}", m.chinese_name);
    let _ = writeln!(out, "Year: {}", m.year);
    let _ = writeln!(out, "Topic: {}", m.topic);
    for (page, note) in &doc.page_failures {
        let _ = writeln!(out, "Skipped page {}: {}", page, note);
    }
    out.push('\n');

    header(&mut out, "Chinese Content");
    let mut chinese = Vec::new();
    for paragraph in &doc.chinese {
        let cleaned = clean_text(paragraph);
        if !cleaned.trim().is_empty() {
            let _ = writeln!(out, "{}\n", cleaned);
            chinese.push(cleaned);
        }
    }

    header(&mut out, "English Content");
    for paragraph in &doc.english {
        let cleaned = clean_text(paragraph);
        if !cleaned.trim().is_empty() {
            let _ = writeln!(out, "{}\n", cleaned);
        }
    }

    header(&mut out, "Word Zones");
    if !doc.word_zones.is_empty() {
        let zones: Vec<String> = doc.word_zones.iter().map(|z| clean_text(z)).collect();
        let _ = writeln!(out, "{}\n", zones.join("\n"));
    }

    header(&mut out, "Red Words");
    if !doc.colored_words.red.is_empty() {
        let words: Vec<&str> = doc.colored_words.red.iter().map(String::as_str).collect();
        let _ = writeln!(out, "{}\n", words.join(", "));
    }

    header(&mut out, "Blue Words");
    if !doc.colored_words.blue.is_empty() {
        let words: Vec<&str> = doc.colored_words.blue.iter().map(String::as_str).collect();
        let _ = writeln!(out, "{}\n", words.join(", "));
    }

    header(&mut out, "Color Statistics");
    let mut stats: Vec<_> = doc.color_stats.iter().collect();
    stats.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (color, count) in stats {
        let _ = writeln!(out, "{}: {}", color, count);
    }

    out.push('\n');
    header(&mut out, SUMMARY_LABEL);
    let _ = writeln!(out, "{}", extract_summary(&chinese));
    out
}

/// True when `text` reaches the closing summary section.
pub fn is_complete_report(text: &str) -> bool {
    let closing = format!("=== {} ===", SUMMARY_LABEL);
    text.lines().any(|line| line.trim_end() == closing)
}

/// Write via a temp file in the target directory and rename over the
/// destination, so readers never see a half-written report.
pub fn write_report(path: &Path, contents: &str) -> IngestResult<()> {
    let err = |source: std::io::Error| IngestError::Report {
        path: path.display().to_string(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(err)?;
    tmp.write_all(contents.as_bytes()).map_err(err)?;
    tmp.as_file().sync_all().map_err(err)?;
    tmp.persist(path).map_err(|e| err(e.error))?;
    Ok(())
}
