use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "talk_ingest.toml";

/// Runtime settings, resolved once at start-up and handed to the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub catalog_path: PathBuf,
    pub search_url: String,
    pub index_name: String,
    pub output_dir: PathBuf,
    pub error_log: PathBuf,

    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub stuck_cooldown_ms: u64,
    /// Only identifiers matching this regex get the stuck-document repair.
    pub stuck_pattern: Option<String>,

    pub page_size: usize,
    pub pause_every: usize,
    pub short_pause_ms: u64,
    pub page_pause_ms: u64,
    pub concurrency: usize,

    pub check_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            catalog_path: PathBuf::from("data/talks.sqlite"),
            search_url: "http://localhost:9200".to_string(),
            index_name: "ted_talks".to_string(),
            output_dir: PathBuf::from("output"),
            error_log: PathBuf::from("processing_errors.log"),
            max_retries: 3,
            retry_delay_ms: 2000,
            stuck_cooldown_ms: 2000,
            stuck_pattern: None,
            page_size: 50,
            pause_every: 10,
            short_pause_ms: 1000,
            page_pause_ms: 5000,
            concurrency: 1,
            check_timeout_secs: 5,
            write_timeout_secs: 30,
            download_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (if present), then `TALK_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let d = Settings::default();
        let path = file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let built = Config::builder()
            .set_default("catalog_path", d.catalog_path.display().to_string())?
            .set_default("search_url", d.search_url)?
            .set_default("index_name", d.index_name)?
            .set_default("output_dir", d.output_dir.display().to_string())?
            .set_default("error_log", d.error_log.display().to_string())?
            .set_default("max_retries", d.max_retries as i64)?
            .set_default("retry_delay_ms", d.retry_delay_ms as i64)?
            .set_default("stuck_cooldown_ms", d.stuck_cooldown_ms as i64)?
            .set_default("page_size", d.page_size as i64)?
            .set_default("pause_every", d.pause_every as i64)?
            .set_default("short_pause_ms", d.short_pause_ms as i64)?
            .set_default("page_pause_ms", d.page_pause_ms as i64)?
            .set_default("concurrency", d.concurrency as i64)?
            .set_default("check_timeout_secs", d.check_timeout_secs as i64)?
            .set_default("write_timeout_secs", d.write_timeout_secs as i64)?
            .set_default("download_timeout_secs", d.download_timeout_secs as i64)?
            .add_source(File::from(path).required(file.is_some()))
            .add_source(Environment::with_prefix("TALK").try_parsing(true))
            .build()
            .with_context(|| format!("failed to load settings from {:?}", path))?;

        let settings: Settings = built
            .try_deserialize()
            .context("invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_retries >= 1, "max_retries must be at least 1");
        anyhow::ensure!(self.page_size >= 1, "page_size must be at least 1");
        anyhow::ensure!(self.concurrency >= 1, "concurrency must be at least 1");
        anyhow::ensure!(
            self.search_url.starts_with("http://") || self.search_url.starts_with("https://"),
            "search_url must be an http(s) URL"
        );
        if let Some(p) = &self.stuck_pattern {
            regex::Regex::new(p).with_context(|| format!("bad stuck_pattern {:?}", p))?;
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn stuck_cooldown(&self) -> Duration {
        Duration::from_millis(self.stuck_cooldown_ms)
    }

    pub fn short_pause(&self) -> Duration {
        Duration::from_millis(self.short_pause_ms)
    }

    pub fn page_pause(&self) -> Duration {
        Duration::from_millis(self.page_pause_ms)
    }

    /// Settings with every pause zeroed, for tests.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Settings {
            retry_delay_ms: 0,
            stuck_cooldown_ms: 0,
            short_pause_ms: 0,
            page_pause_ms: 0,
            ..Settings::default()
        }
    }
}
