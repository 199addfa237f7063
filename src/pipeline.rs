use hashbrown::HashSet;
use scraper::Html;
use url::Url;

use crate::{
    config::Config,
    extract::{CompiledTable, ExtractError, extract_items, page_base},
    llm::LlmFallback,
    record::{NO_LINK, VideoRecord},
    scrape::{FetchError, Fetcher, Page, puppeteer::Renderer},
};

/// One configured scrape: the engine's compiled table plus the ways to load a page.
pub struct Scraper<'a> {
    config: &'a Config,
    fetcher: &'a Fetcher,
    renderer: Option<&'a Renderer>,
    table: CompiledTable,
    llm: Option<LlmFallback>,
}

impl<'a> Scraper<'a> {
    pub fn new(
        config: &'a Config,
        fetcher: &'a Fetcher,
        renderer: Option<&'a Renderer>,
    ) -> Result<Self, ExtractError> {
        Ok(Self {
            config,
            fetcher,
            renderer,
            table: CompiledTable::compile(&config.engine.selectors)?,
            llm: config.llm.clone().map(LlmFallback::new),
        })
    }

    async fn load(&self, url: &Url) -> Result<Page, FetchError> {
        match self.renderer {
            Some(renderer) => renderer.render(url, self.config.engine.wait_for).await,
            None => self.fetcher.page(url).await,
        }
    }

    /// Records on one search page, in document order.
    pub async fn scrape_page(&self, url: &Url) -> Result<Vec<VideoRecord>, FetchError> {
        let engine = self.config.engine.id;
        let page = self.load(url).await?;
        let document = Html::parse_document(&page.body);
        let base = page_base(&document, &page.url);

        let records = extract_items(&document, &self.table, &base, engine, self.config.title_budget);
        if !records.is_empty() {
            return Ok(records);
        }

        Ok(match &self.llm {
            Some(llm) => {
                llm.extract(self.fetcher.client(), &document, &base, engine, self.config.title_budget)
                    .await
            }
            None => {
                tracing::warn!(target: "scraper", "[{engine}] no items matched on {url}");
                Vec::new()
            }
        })
    }

    /// Walks search pages into `sink` until the limit is met, a page adds
    /// nothing new, or a page cannot be loaded. Returns the pages visited.
    ///
    /// A non-positive limit returns at once without any request.
    pub async fn collect(&self, sink: &mut Vec<VideoRecord>) -> u32 {
        let config = self.config;
        let engine = config.engine.id;
        let Some(wanted) = config.wanted() else {
            tracing::info!(target: "scraper", "[{engine}] limit {} asks for nothing", config.limit);
            return 0;
        };

        let mut seen = sink.iter().map(|r| r.link.clone()).collect::<HashSet<_>>();
        let mut visited = 0;
        for page in config.page..config.page.saturating_add(config.max_pages.max(1)) {
            if sink.len() >= wanted {
                break;
            }

            let url = match config.engine.search_url(&config.base_url, &config.query, page) {
                Ok(u) => u,
                Err(e) => {
                    tracing::error!(target: "scraper", "[Page #{page}] cannot build search URL: {e}");
                    break;
                }
            };
            tracing::info!(target: "scraper", "[Page #{page}] start {url}");
            visited += 1;

            let records = match self.scrape_page(&url).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(target: "scraper", "\x1b[31m[Page #{page}] skipped: {e}\x1b[0m");
                    break;
                }
            };

            let before = sink.len();
            for record in records {
                if sink.len() >= wanted {
                    break;
                }
                if record.link != NO_LINK && !seen.insert(record.link.clone()) {
                    continue;
                }
                sink.push(record);
            }
            let added = sink.len() - before;
            tracing::info!(target: "scraper", "\x1b[36m[Page #{page}] +{added} records ({}/{wanted})\x1b[0m", sink.len());
            if added == 0 {
                break;
            }
        }
        visited
    }
}
