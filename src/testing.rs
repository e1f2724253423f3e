//! In-memory collaborators for pipeline and batch tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::catalog::{Catalog, CatalogRow};
use crate::error::{IngestError, IngestResult};
use crate::filter::color::Rgb;
use crate::filter::segmenter::CharacterRecord;
use crate::filter::RawPage;
use crate::identifier::Metadata;
use crate::search::{SearchDocument, SearchSink};
use crate::source::DocumentSource;

const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);
const RED: Rgb = Rgb::new(0.9, 0.1, 0.1);

/// Two pages: Chinese prose, English prose with one red word.
pub fn bilingual_pages() -> Vec<RawPage> {
    vec![
        Ok(vec![
            CharacterRecord::new("大家好。", BLACK),
            CharacterRecord::new("今天我们谈谈勇气。", BLACK),
        ]),
        Ok(vec![
            CharacterRecord::new("Hello", BLACK),
            CharacterRecord::new(" ", BLACK),
            CharacterRecord::new("world", RED),
        ]),
    ]
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ── Catalog ──

#[derive(Default)]
pub struct MemoryCatalog {
    rows: Mutex<Vec<(i64, String, Option<String>)>>,
    pub processed: Mutex<Vec<(i64, Metadata)>>,
    pub failed: Mutex<Vec<(i64, String)>>,
    pub pages_requested: Mutex<Vec<(usize, usize)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, url: &str, annotation: Option<&str>) -> i64 {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i64 + 1;
        rows.push((id, url.to_string(), annotation.map(str::to_string)));
        id
    }

    pub fn set_annotation(&self, url: &str, annotation: Option<&str>) {
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.1 == url {
                row.2 = annotation.map(str::to_string);
            }
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn fetch_pending(&self, offset: usize, limit: usize) -> IngestResult<Vec<CatalogRow>> {
        self.pages_requested.lock().unwrap().push((offset, limit));
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(id, url, _)| CatalogRow {
                id: *id,
                source_url: url.clone(),
            })
            .collect())
    }

    async fn count_pending(&self) -> IngestResult<usize> {
        Ok(self.rows.lock().unwrap().len())
    }

    async fn annotation_for(&self, source_url: &str) -> IngestResult<Option<String>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.1 == source_url)
            .and_then(|r| r.2.clone()))
    }

    async fn mark_processed(&self, id: i64, metadata: &Metadata) -> IngestResult<()> {
        self.processed.lock().unwrap().push((id, metadata.clone()));
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> IngestResult<()> {
        self.failed.lock().unwrap().push((id, error.to_string()));
        Ok(())
    }
}

// ── Search sink ──

#[derive(Default)]
pub struct MemorySink {
    docs: Mutex<HashMap<String, SearchDocument>>,
    upserts: AtomicUsize,
    upsert_attempts: AtomicUsize,
    deletes: AtomicUsize,
    ensure_calls: AtomicUsize,
    failing_upserts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: &str, doc: SearchDocument) {
        self.docs.lock().unwrap().insert(id.to_string(), doc);
    }

    pub fn stored(&self, id: &str) -> Option<SearchDocument> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn upsert_attempts(&self) -> usize {
        self.upsert_attempts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchSink for MemorySink {
    async fn ensure_index(&self) -> IngestResult<()> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, id: &str) -> IngestResult<Option<SearchDocument>> {
        Ok(self.stored(id))
    }

    async fn upsert(&self, id: &str, doc: &SearchDocument) -> IngestResult<()> {
        self.upsert_attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_upserts) {
            return Err(IngestError::Index("503 Service Unavailable".into()));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.put(id, doc.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> IngestResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.docs.lock().unwrap().remove(id);
        Ok(())
    }
}

// ── Document source ──

#[derive(Default)]
pub struct StaticSource {
    docs: Mutex<HashMap<String, Vec<RawPage>>>,
    corrupt: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    failing: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, pages: Vec<RawPage>) {
        self.docs.lock().unwrap().insert(url.to_string(), pages);
    }

    /// The URL downloads fine but its bytes cannot be decoded.
    pub fn corrupt(&self, url: &str) {
        self.corrupt.lock().unwrap().push(url.to_string());
    }

    pub fn fail_next(&self, n: usize) {
        self.failing.store(n, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    async fn fetch_pages(&self, url: &str) -> IngestResult<Vec<RawPage>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let unavailable = |reason: &str| IngestError::Download {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        if take_one(&self.failing) {
            return Err(unavailable("connection reset"));
        }
        if self.corrupt.lock().unwrap().iter().any(|u| u == url) {
            return Err(IngestError::Extraction("unreadable PDF: bad xref".into()));
        }
        self.docs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| unavailable("status 404 Not Found"))
    }
}
