use core::time::Duration;
use std::path::PathBuf;

use url::Url;

use crate::{
    engine::Engine,
    output::OutputFormat,
    record::DEFAULT_TITLE_BUDGET,
    scrape::Backoff,
};

/// What to do with a record whose thumbnail could not be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingThumbnail {
    /// Keep the record; the gallery draws a placeholder.
    Placeholder,
    Drop,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible `chat/completions` endpoint.
    pub endpoint: Url,
    pub model: String,
    pub api_key: Option<String>,
}

/// Everything one run needs; handed to each stage explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: &'static Engine,
    /// The engine's base URL unless overridden (mirrors, tests).
    pub base_url: Url,
    pub query: String,
    /// Zero or negative means "nothing to fetch".
    pub limit: i64,
    pub page: u32,
    pub max_pages: u32,
    pub format: OutputFormat,
    pub output_root: PathBuf,
    pub proxy: Option<String>,
    pub workers: usize,
    pub open_browser: bool,
    pub thumbnails: bool,
    pub missing_thumbnail: MissingThumbnail,
    pub render: bool,
    pub headless: bool,
    pub backoff: Backoff,
    pub timeout: Duration,
    /// Requests per second across the whole run.
    pub rate: f64,
    pub cache_ttl: Duration,
    pub title_budget: usize,
    pub llm: Option<LlmConfig>,
}

impl Config {
    pub const DEFAULT_WORKERS: usize = 8;
    pub const MAX_WORKERS: usize = 32;
    pub const DEFAULT_LIMIT: i64 = 30;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
    pub const DEFAULT_RATE: f64 = 2.0;
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

    pub fn new(engine: &'static Engine, query: impl Into<String>) -> Result<Self, url::ParseError> {
        Ok(Self {
            engine,
            base_url: engine.base()?,
            query: query.into(),
            limit: Self::DEFAULT_LIMIT,
            page: engine.first_page,
            max_pages: 1,
            format: OutputFormat::Html,
            output_root: PathBuf::from("."),
            proxy: None,
            workers: Self::DEFAULT_WORKERS,
            open_browser: true,
            thumbnails: true,
            missing_thumbnail: MissingThumbnail::Placeholder,
            render: engine.render,
            headless: true,
            backoff: Backoff::default(),
            timeout: Self::DEFAULT_TIMEOUT,
            rate: Self::DEFAULT_RATE,
            cache_ttl: Self::DEFAULT_CACHE_TTL,
            title_budget: DEFAULT_TITLE_BUDGET,
            llm: None,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, Self::MAX_WORKERS);
        self
    }

    /// Records to collect; `None` when the run has nothing to do.
    pub fn wanted(&self) -> Option<usize> {
        usize::try_from(self.limit).ok().filter(|&n| n > 0)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_root.join("results")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.output_root.join(crate::thumbnail::DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::lookup;

    #[test]
    fn defaults_follow_the_engine() {
        let engine = lookup("coverr").unwrap();
        let c = Config::new(engine, "rain").unwrap();
        assert!(c.render);
        assert_eq!(c.page, engine.first_page);
        assert_eq!(c.base_url.as_str(), "https://coverr.co/");
        assert_eq!(c.thumbnails_dir(), PathBuf::from("./thumbnails"));
    }

    #[test]
    fn non_positive_limits_want_nothing() {
        let mut c = Config::new(lookup("pexels").unwrap(), "x").unwrap();
        c.limit = 0;
        assert_eq!(c.wanted(), None);
        c.limit = -4;
        assert_eq!(c.wanted(), None);
        c.limit = 5;
        assert_eq!(c.wanted(), Some(5));
    }

    #[test]
    fn workers_are_clamped() {
        let c = Config::new(lookup("pexels").unwrap(), "x").unwrap();
        assert_eq!(c.clone().with_workers(0).workers, 1);
        assert_eq!(c.clone().with_workers(500).workers, Config::MAX_WORKERS);
        assert_eq!(c.with_workers(12).workers, 12);
    }
}
