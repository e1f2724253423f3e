use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)_(\d{4})(?:[A-Z])?\[(.*?)\]\[(.*?)\](?:\.pdf)?$").unwrap()
});
static TRAILING_BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]$").unwrap());

/// Speaker and talk fields encoded in a transcript file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub english_name: String,
    pub year: String,
    pub chinese_name: String,
    pub topic: String,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.english_name.is_empty()
            && self.year.is_empty()
            && self.chinese_name.is_empty()
            && self.topic.is_empty()
    }
}

/// Parse `<english>_<yyyy>[X]?[<chinese>][<topic>]`, with or without `.pdf`.
/// The optional single capital after the year is a variant marker and dropped.
pub fn parse_identifier(name: &str) -> Result<Metadata, ParseError> {
    let caps = IDENT_RE
        .captures(name)
        .ok_or_else(|| ParseError::Grammar(name.to_string()))?;
    Ok(Metadata {
        english_name: caps[1].to_string(),
        year: caps[2].to_string(),
        chinese_name: decode("chinese_name", &caps[3])?,
        topic: decode("topic", &caps[4])?,
    })
}

pub fn format_identifier(m: &Metadata) -> String {
    format!(
        "{}_{}[{}][{}]",
        m.english_name,
        m.year,
        m.chinese_name.replace('%', "%25"),
        m.topic.replace('%', "%25")
    )
}

fn decode(field: &'static str, raw: &str) -> Result<String, ParseError> {
    if !raw.contains('%') {
        return Ok(raw.to_string());
    }
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| ParseError::Encoding {
            field,
            value: raw.to_string(),
        })
}

/// Last path segment of a URL (or the input itself when it has no `/`).
pub fn file_name(url: &str) -> &str {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Search-index id: the raw file name without its `.pdf` extension.
pub fn document_id(url: &str) -> String {
    let name = file_name(url);
    name.strip_suffix(".pdf").unwrap_or(name).to_string()
}

/// Content of the final `[...]` group of a document id, percent-decoded.
pub fn trailing_annotation(doc_id: &str) -> Option<String> {
    let raw = TRAILING_BRACKET_RE.captures(doc_id)?.get(1)?.as_str();
    decode("annotation", raw).ok()
}

/// File-system friendly output name: brackets become parentheses.
pub fn output_file_name(doc_id: &str) -> String {
    format!("{}_filtered.txt", doc_id.replace('[', "(").replace(']', ")"))
}
