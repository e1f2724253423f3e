use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IngestError, IngestResult};
use crate::filter::aggregate::DocumentResult;
use crate::identifier::Metadata;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordLists {
    pub red: Vec<String>,
    pub blue: Vec<String>,
}

/// Body stored in the search index under the document id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub chinese_content: String,
    #[serde(default)]
    pub english_content: String,
    #[serde(default)]
    pub word_zone: String,
    #[serde(default)]
    pub colored_words: WordLists,
    #[serde(default)]
    pub color_stats: BTreeMap<String, usize>,
    #[serde(default)]
    pub timestamp: String,
}

impl SearchDocument {
    pub fn from_result(doc: &DocumentResult) -> Self {
        SearchDocument {
            metadata: doc.metadata.clone(),
            chinese_content: doc.chinese.join("\n"),
            english_content: doc.english.join("\n"),
            word_zone: doc.word_zones.join("\n"),
            colored_words: WordLists {
                red: doc.colored_words.red.iter().cloned().collect(),
                blue: doc.colored_words.blue.iter().cloned().collect(),
            },
            color_stats: doc
                .color_stats
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.chinese_content.is_empty() && !self.english_content.is_empty()
    }
}

/// Document store the classified results are published to.
#[async_trait]
pub trait SearchSink: Send + Sync {
    /// Create the index if it does not exist yet.
    async fn ensure_index(&self) -> IngestResult<()>;

    async fn get(&self, id: &str) -> IngestResult<Option<SearchDocument>>;

    async fn upsert(&self, id: &str, doc: &SearchDocument) -> IngestResult<()>;

    /// Remove a document; a missing document is not an error.
    async fn delete(&self, id: &str) -> IngestResult<()>;
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(rename = "_source")]
    source: SearchDocument,
}

/// Elasticsearch-compatible HTTP sink.
pub struct ElasticSink {
    client: Client,
    base: Url,
    index: String,
    check_timeout: Duration,
    write_timeout: Duration,
    index_ready: AtomicBool,
}

impl ElasticSink {
    pub fn new(
        base_url: &str,
        index: &str,
        check_timeout: Duration,
        write_timeout: Duration,
    ) -> IngestResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| IngestError::Index(format!("bad search url {}: {}", base_url, e)))?;
        let client = Client::builder()
            .build()
            .map_err(|e| IngestError::Index(format!("failed to build HTTP client: {}", e)))?;
        Ok(ElasticSink {
            client,
            base,
            index: index.to_string(),
            check_timeout,
            write_timeout,
            index_ready: AtomicBool::new(false),
        })
    }

    fn url(&self, segments: &[&str]) -> IngestResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| IngestError::Index(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .push(&self.index)
            .extend(segments);
        Ok(url)
    }

    fn doc_url(&self, id: &str) -> IngestResult<Url> {
        self.url(&["_doc", id])
    }
}

fn status_error(what: &str, status: StatusCode) -> IngestError {
    IngestError::Index(format!("{} returned {}", what, status))
}

#[async_trait]
impl SearchSink for ElasticSink {
    async fn ensure_index(&self) -> IngestResult<()> {
        if self.index_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let url = self.url(&[])?;
        let resp = self
            .client
            .get(url.clone())
            .timeout(self.check_timeout)
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                let settings = serde_json::json!({
                    "settings": { "number_of_shards": 1, "number_of_replicas": 0 }
                });
                let resp = self
                    .client
                    .put(url)
                    .json(&settings)
                    .timeout(self.write_timeout)
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(status_error("index create", resp.status()));
                }
                info!(index = %self.index, "created search index");
            }
            s => return Err(status_error("index check", s)),
        }
        self.index_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, id: &str) -> IngestResult<Option<SearchDocument>> {
        let resp = self
            .client
            .get(self.doc_url(id)?)
            .timeout(self.check_timeout)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body: GetResponse = resp.json().await?;
                Ok(Some(body.source))
            }
            s => Err(status_error("document lookup", s)),
        }
    }

    async fn upsert(&self, id: &str, doc: &SearchDocument) -> IngestResult<()> {
        let resp = self
            .client
            .post(self.doc_url(id)?)
            .json(doc)
            .timeout(self.write_timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error("document write", resp.status()));
        }
        debug!(doc_id = id, "document indexed");
        Ok(())
    }

    async fn delete(&self, id: &str) -> IngestResult<()> {
        let resp = self
            .client
            .delete(self.doc_url(id)?)
            .timeout(self.write_timeout)
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            s => Err(status_error("document delete", s)),
        }
    }
}
