use std::io::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use pdf_oxide::PdfDocument;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{IngestError, IngestResult};
use crate::filter::color::Rgb;
use crate::filter::segmenter::CharacterRecord;
use crate::filter::RawPage;

/// Hands back a document as ordered pages of glyphs.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_pages(&self, url: &str) -> IngestResult<Vec<RawPage>>;
}

/// Turns downloaded bytes into pages. A page that cannot be read becomes an
/// `Err` entry rather than failing the whole document.
pub trait PageExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> IngestResult<Vec<RawPage>>;
}

#[derive(Deserialize)]
struct CharDump {
    pages: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct Glyph {
    text: String,
    color: Vec<f32>,
}

impl Glyph {
    fn into_record(self) -> Result<CharacterRecord, String> {
        let color = match self.color.as_slice() {
            [gray] => Rgb::new(*gray, *gray, *gray),
            [r, g, b] => Rgb::new(*r, *g, *b),
            other => {
                return Err(format!(
                    "glyph {:?} has {} colour components",
                    self.text,
                    other.len()
                ))
            }
        };
        Ok(CharacterRecord::new(self.text, color))
    }
}

/// Reads the renderer's character dump:
/// `{"pages": [[{"text": "..", "color": [r, g, b]}, ...], ...]}`.
/// Single-component colours are treated as gray levels.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharDumpExtractor;

impl PageExtractor for CharDumpExtractor {
    fn extract(&self, bytes: &[u8]) -> IngestResult<Vec<RawPage>> {
        let dump: CharDump = serde_json::from_slice(bytes)
            .map_err(|e| IngestError::Extraction(format!("unreadable character dump: {}", e)))?;
        let pages = dump
            .pages
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                let glyphs: Vec<Glyph> = serde_json::from_value(value)
                    .map_err(|e| format!("page {}: {}", idx + 1, e))?;
                glyphs
                    .into_iter()
                    .map(Glyph::into_record)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| format!("page {}: {}", idx + 1, e))
            })
            .collect();
        Ok(pages)
    }
}

fn extraction(what: &str, e: impl std::fmt::Display) -> IngestError {
    IngestError::Extraction(format!("{}: {}", what, e))
}

/// Reads glyph text and fill colour from a real PDF. Spans are split into
/// one record per character so word boundaries fall where the segmenter
/// expects them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl PdfExtractor {
    fn read_page(doc: &mut PdfDocument, idx: usize) -> Result<Vec<CharacterRecord>, String> {
        let mut spans = doc
            .extract_spans(idx)
            .map_err(|e| format!("page {}: {}", idx + 1, e))?;
        spans.sort_by_key(|span| span.sequence);
        Ok(spans
            .into_iter()
            .flat_map(|span| {
                let color = Rgb::new(span.color.r, span.color.g, span.color.b);
                span.text
                    .chars()
                    .map(move |c| CharacterRecord::new(c.to_string(), color))
                    .collect::<Vec<_>>()
            })
            .collect())
    }
}

impl PageExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> IngestResult<Vec<RawPage>> {
        // the reader opens documents by path
        let mut tmp = tempfile::NamedTempFile::new().map_err(|e| extraction("temp file", e))?;
        tmp.write_all(bytes).map_err(|e| extraction("temp file", e))?;
        tmp.flush().map_err(|e| extraction("temp file", e))?;

        let mut doc = PdfDocument::open(tmp.path()).map_err(|e| extraction("unreadable PDF", e))?;
        let count = doc
            .page_count()
            .map_err(|e| extraction("unreadable page tree", e))?;
        debug!(pages = count, bytes = bytes.len(), "extracting PDF");
        Ok((0..count).map(|idx| Self::read_page(&mut doc, idx)).collect())
    }
}

/// Picks the reader from the leading bytes: PDFs go to [`PdfExtractor`],
/// anything else is taken to be a character dump.
#[derive(Debug, Clone, Copy, Default)]
pub struct SniffingExtractor;

impl SniffingExtractor {
    pub fn is_pdf(bytes: &[u8]) -> bool {
        bytes.starts_with(b"%PDF-")
    }
}

impl PageExtractor for SniffingExtractor {
    fn extract(&self, bytes: &[u8]) -> IngestResult<Vec<RawPage>> {
        if Self::is_pdf(bytes) {
            PdfExtractor.extract(bytes)
        } else {
            CharDumpExtractor.extract(bytes)
        }
    }
}

/// Downloads over HTTP(S), or reads `file://` URLs and bare paths from disk.
pub struct HttpDocumentSource<E> {
    client: Client,
    timeout: Duration,
    extractor: E,
}

impl<E: PageExtractor> HttpDocumentSource<E> {
    pub fn new(timeout: Duration, extractor: E) -> IngestResult<Self> {
        let client = Client::builder().build().map_err(|e| IngestError::Download {
            url: String::new(),
            reason: format!("failed to build HTTP client: {}", e),
        })?;
        Ok(HttpDocumentSource {
            client,
            timeout,
            extractor,
        })
    }

    async fn download(&self, url: &str) -> IngestResult<Vec<u8>> {
        let fail = |reason: String| IngestError::Download {
            url: url.to_string(),
            reason,
        };

        if !url.starts_with("http://") && !url.starts_with("https://") {
            let path = url.strip_prefix("file://").unwrap_or(url);
            return tokio::fs::read(path).await.map_err(|e| fail(e.to_string()));
        }

        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fail(format!("status {}", resp.status())));
        }
        let bytes = resp.bytes().await.map_err(|e| fail(e.to_string()))?;
        debug!(url, bytes = bytes.len(), "downloaded");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl<E: PageExtractor + Clone + 'static> DocumentSource for HttpDocumentSource<E> {
    async fn fetch_pages(&self, url: &str) -> IngestResult<Vec<RawPage>> {
        let bytes = self.download(url).await?;
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|e| IngestError::Extraction(format!("extractor task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_pages_in_order() {
        let json = r#"{"pages": [
            [{"text": "你", "color": [0, 0, 0]}, {"text": "a", "color": [0.9, 0.1, 0.1]}],
            [],
            [{"text": "b", "color": [0.15]}]
        ]}"#;
        let pages = CharDumpExtractor.extract(json.as_bytes()).unwrap();
        assert_eq!(pages.len(), 3);
        let first = pages[0].as_ref().unwrap();
        assert_eq!(first[0].text, "你");
        assert_eq!(first[1].color, Rgb::new(0.9, 0.1, 0.1));
        assert!(pages[1].as_ref().unwrap().is_empty());
        assert_eq!(pages[2].as_ref().unwrap()[0].color, Rgb::new(0.15, 0.15, 0.15));
    }

    #[test]
    fn bad_page_is_isolated() {
        let json = br#"{"pages": [
            [{"text": "ok", "color": [0, 0, 0]}],
            [{"text": "no colour"}],
            [{"text": "cmyk", "color": [0, 0, 0, 1]}],
            "garbage"
        ]}"#;
        let pages = CharDumpExtractor.extract(json).unwrap();
        assert!(pages[0].is_ok());
        assert!(pages[1].as_ref().unwrap_err().starts_with("page 2"));
        assert!(pages[2].as_ref().unwrap_err().contains("4 colour components"));
        assert!(pages[3].is_err());
    }

    #[test]
    fn unreadable_dump_is_extraction_error() {
        let err = CharDumpExtractor.extract(b"%PDF-1.7").unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
    }

    fn sample_pdf(text: &str) -> Vec<u8> {
        pdf_oxide::api::Pdf::from_text(text).unwrap().into_bytes()
    }

    #[test]
    fn reads_glyphs_from_pdf() {
        let pages = PdfExtractor.extract(&sample_pdf("Hello courage")).unwrap();
        assert_eq!(pages.len(), 1);
        let glyphs = pages[0].as_ref().unwrap();
        assert!(glyphs.iter().all(|g| g.text.chars().count() == 1));
        assert!(glyphs.iter().all(|g| g.color.is_valid()));
        let text: String = glyphs.iter().map(|g| g.text.as_str()).collect();
        assert!(text.contains("Hello"), "got {:?}", text);
    }

    #[test]
    fn bad_pdf_header_is_extraction_error() {
        let err = PdfExtractor.extract(b"%PDF-x.y\n1 0 obj\n").unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn sniffing_routes_by_content() {
        assert!(SniffingExtractor::is_pdf(b"%PDF-1.4\n"));
        assert!(!SniffingExtractor::is_pdf(b"%PD"));
        assert!(!SniffingExtractor::is_pdf(br#"{"pages": []}"#));
        assert!(!SniffingExtractor::is_pdf(b""));

        let pages = SniffingExtractor.extract(&sample_pdf("Hello")).unwrap();
        assert_eq!(pages.len(), 1);
        let dump = r#"{"pages": [[{"text": "hi", "color": [0, 0, 0]}]]}"#;
        let pages = SniffingExtractor.extract(dump.as_bytes()).unwrap();
        assert_eq!(pages[0].as_ref().unwrap()[0].text, "hi");
    }

    #[tokio::test]
    async fn reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("JaneDoe_2019[简妮][主题].json");
        std::fs::write(&path, r#"{"pages": [[{"text": "hi", "color": [0,0,0]}]]}"#).unwrap();
        let source = HttpDocumentSource::new(Duration::from_secs(1), CharDumpExtractor).unwrap();

        let pages = source.fetch_pages(path.to_str().unwrap()).await.unwrap();
        assert_eq!(pages.len(), 1);

        let missing = dir.path().join("nope.json");
        let err = source.fetch_pages(missing.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, IngestError::Download { .. }));
        assert!(err.is_retryable());
    }
}
