use thiserror::Error;

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Source unreachable or answered with a non-2xx status.
    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    /// The character dump could not be decoded at all.
    #[error("character extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("search index error: {0}")]
    Index(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("report write failed for {path}: {source}")]
    Report {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("gave up on {doc_id} after {attempts} attempts: {last}")]
    RetriesExhausted {
        doc_id: String,
        attempts: u32,
        last: String,
    },
}

impl IngestError {
    /// Transport and sink failures are worth another attempt. Undecodable
    /// bytes, a bad identifier or a spent retry budget are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Download { .. } | IngestError::Index(_))
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        IngestError::Index(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("identifier does not match <name>_<year>[<chinese>][<topic>]: {0}")]
    Grammar(String),

    #[error("bad percent-encoding in {field}: {value}")]
    Encoding { field: &'static str, value: String },
}
