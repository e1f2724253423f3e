use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::color::{classify, ColorCategory, Rgb};

static TIME_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\d{2}:\d{2}\]").unwrap());
static LATIN_DIGIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-zA-Z0-9]").unwrap());

/// Highlighted text beyond this many characters means we are inside a
/// vocabulary block rather than prose.
pub const WORD_ZONE_THRESHOLD: usize = 50;

const CJK_PUNCTUATION: &str = "，。、；：？！“”‘’（）【】…—《》〈〉·";

/// One rendered glyph as handed over by the PDF renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub text: String,
    pub color: Rgb,
}

impl CharacterRecord {
    pub fn new(text: impl Into<String>, color: Rgb) -> Self {
        CharacterRecord {
            text: text.into(),
            color,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoredWords {
    pub red: BTreeSet<String>,
    pub blue: BTreeSet<String>,
}

impl ColoredWords {
    pub fn is_empty(&self) -> bool {
        self.red.is_empty() && self.blue.is_empty()
    }

    fn insert(&mut self, color: ColorCategory, word: &str) {
        match color {
            ColorCategory::Red => {
                self.red.insert(word.to_string());
            }
            ColorCategory::Blue => {
                self.blue.insert(word.to_string());
            }
            _ => {}
        }
    }

    pub fn merge(&mut self, other: ColoredWords) {
        self.red.extend(other.red);
        self.blue.extend(other.blue);
    }
}

pub type ColorStats = BTreeMap<ColorCategory, usize>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub chinese: Vec<String>,
    pub english: Vec<String>,
    pub word_zones: Vec<String>,
    pub colored_words: ColoredWords,
    pub color_stats: ColorStats,
    /// Set when the page's character data could not be used.
    pub failure: Option<String>,
}

impl PageResult {
    pub fn failed(note: impl Into<String>) -> Self {
        PageResult {
            failure: Some(note.into()),
            ..Default::default()
        }
    }
}

/// Buffers carried from one glyph to the next while walking a page.
#[derive(Debug, Clone, Default)]
pub struct SegmenterState {
    current_chinese: String,
    current_english: String,
    current_word_zone: String,
    /// Colour of the letters of the word currently being spelled out.
    word_color: Option<ColorCategory>,
    colored_words: ColoredWords,
    color_stats: ColorStats,
}

impl SegmenterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one glyph and return the updated state.
    pub fn step(mut self, ch: &CharacterRecord) -> Self {
        if ch.color.is_watermark() {
            return self;
        }

        let category = classify(ch.color);
        *self.color_stats.entry(category).or_insert(0) += 1;

        if contains_chinese(&ch.text) {
            self.current_chinese.push_str(&ch.text);
        } else {
            let stripped: String = ch
                .text
                .chars()
                .filter(|c| !is_cjk(*c) && !c.is_ascii_digit())
                .collect();
            if !stripped.is_empty() {
                self.current_english.push_str(&stripped);
                if stripped.chars().any(char::is_alphabetic) {
                    self.word_color = Some(category);
                }
                if !stripped.chars().all(char::is_alphabetic) {
                    self.close_word();
                }
            }
        }

        if category.is_highlight() {
            self.current_word_zone.push_str(&ch.text);
        }
        self
    }

    fn zone_open(&self) -> bool {
        self.current_word_zone.chars().nth(WORD_ZONE_THRESHOLD).is_some()
    }

    fn close_word(&mut self) {
        let Some(color) = self.word_color.take() else {
            return;
        };
        if !color.is_highlight() || self.zone_open() {
            return;
        }
        if let Some(word) = last_word(&self.current_english) {
            self.colored_words.insert(color, word);
        }
    }

    /// End of page: flush every buffer into a `PageResult`.
    pub fn finish(mut self) -> PageResult {
        self.close_word();
        let mut page = PageResult {
            color_stats: std::mem::take(&mut self.color_stats),
            ..Default::default()
        };

        if !self.current_chinese.is_empty() {
            let without_codes = TIME_CODE_RE.replace_all(&self.current_chinese, "");
            let chinese = LATIN_DIGIT_RE.replace_all(&without_codes, "");
            if !chinese.trim().is_empty() {
                page.chinese.push(chinese.into_owned());
            }
        }

        if !self.current_english.trim().is_empty() {
            page.english.push(std::mem::take(&mut self.current_english));
        }

        if self.zone_open() && !self.colored_words.is_empty() {
            page.word_zones.push(format_word_zone(&self.colored_words));
            self.colored_words = ColoredWords::default();
        }
        page.colored_words = self.colored_words;
        page
    }
}

/// Classify one page of glyphs. Malformed glyph data fails the page, not the
/// document.
pub fn process_page(chars: &[CharacterRecord]) -> PageResult {
    if let Some((idx, bad)) = chars.iter().enumerate().find(|(_, c)| !c.color.is_valid()) {
        return PageResult::failed(format!(
            "glyph {} ({:?}) has invalid colour {:?}",
            idx, bad.text, bad.color
        ));
    }
    chars
        .iter()
        .fold(SegmenterState::new(), SegmenterState::step)
        .finish()
}

pub fn format_word_zone(words: &ColoredWords) -> String {
    let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(" ");
    format!("red: {}\nblue: {}", join(&words.red), join(&words.blue))
}

pub fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

pub fn contains_chinese(text: &str) -> bool {
    text.chars().any(|c| is_cjk(c) || CJK_PUNCTUATION.contains(c))
}

fn last_word(text: &str) -> Option<&str> {
    text.rsplit(|c: char| !c.is_ascii_alphabetic())
        .find(|w| !w.is_empty())
}
