use core::time::Duration;
use std::{path::PathBuf, time::SystemTime};

use anyhow::Context as _;
use url::Url;
use vgscr::{
    Config,
    config::{LlmConfig, MissingThumbnail},
    engine::{self, DEFAULT_ENGINE, ENGINES},
    output::{self, OutputFormat},
    pipeline::Scraper,
    scrape::{Backoff, Fetcher, puppeteer::Renderer},
    thumbnail::{self, ThumbnailStore},
    util,
};

/// Search a stock-footage site and build a browsable thumbnail gallery.
#[derive(clap::Parser)]
#[command(version)]
struct Args {
    /// Search terms.
    #[arg(required_unless_present = "list_engines")]
    query: Option<String>,
    #[arg(short, long, default_value = DEFAULT_ENGINE)]
    engine: String,
    /// Records to collect; zero or negative collects nothing.
    #[arg(short, long, default_value_t = Config::DEFAULT_LIMIT, allow_negative_numbers = true)]
    limit: i64,
    /// First search page (defaults to the engine's first page).
    #[arg(short, long)]
    page: Option<u32>,
    /// Search pages to walk at most.
    #[arg(long, default_value_t = 1)]
    pages: u32,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Html)]
    output_format: OutputFormat,
    /// Directory receiving `results/` and `thumbnails/`.
    #[arg(long, env = "VGS_OUTPUT", default_value = ".")]
    output: PathBuf,
    #[arg(short = 'x', long, env = "VGS_PROXY")]
    proxy: Option<String>,
    /// Concurrent thumbnail downloads.
    #[arg(short, long, default_value_t = Config::DEFAULT_WORKERS)]
    workers: usize,
    /// Download thumbnails one at a time.
    #[arg(long)]
    no_async: bool,
    /// Do not open the gallery when done.
    #[arg(long)]
    no_open: bool,
    /// Skip thumbnail downloads; the gallery hotlinks the source images.
    #[arg(long)]
    no_thumbnails: bool,
    /// Leave out records whose thumbnail could not be fetched.
    #[arg(long)]
    drop_missing_thumbnails: bool,
    /// Load pages through headless Chrome.
    #[arg(long)]
    render: bool,
    /// Show the browser window while rendering.
    #[arg(long)]
    headful: bool,
    /// Replace the engine's base URL (mirrors).
    #[arg(long)]
    base_url: Option<Url>,
    /// Tries per request, the first one included.
    #[arg(long, default_value_t = Backoff::default().attempts)]
    retries: u32,
    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = Config::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,
    /// Requests per second; zero disables limiting.
    #[arg(long, default_value_t = Config::DEFAULT_RATE)]
    rate: f64,
    /// OpenAI-compatible chat completions endpoint used when selectors find nothing.
    #[arg(long, env = "VGS_LLM_ENDPOINT")]
    llm_endpoint: Option<Url>,
    #[arg(long, env = "VGS_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,
    #[arg(long, env = "VGS_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,
    #[arg(short, long)]
    verbose: bool,
    /// Print the known engines and exit.
    #[arg(long)]
    list_engines: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let Some(engine) = engine::lookup(&self.engine) else {
            anyhow::bail!(
                "unknown engine {:?}, known: {}",
                self.engine,
                engine::ids().collect::<Vec<_>>().join(", ")
            );
        };

        let mut config = Config::new(engine, self.query.unwrap_or_default().trim())?
            .with_workers(if self.no_async { 1 } else { self.workers });
        if let Some(base) = self.base_url {
            config.base_url = base;
        }
        config.limit = self.limit;
        config.page = self.page.unwrap_or(engine.first_page);
        config.max_pages = self.pages;
        config.format = self.output_format;
        config.output_root = self.output;
        config.proxy = self.proxy;
        config.open_browser = !self.no_open;
        config.thumbnails = !self.no_thumbnails;
        if self.drop_missing_thumbnails {
            config.missing_thumbnail = MissingThumbnail::Drop;
        }
        config.render |= self.render;
        config.headless = !self.headful;
        config.backoff.attempts = self.retries.max(1);
        config.timeout = Duration::from_secs(self.timeout.max(1));
        config.rate = self.rate;
        config.llm = self.llm_endpoint.map(|endpoint| LlmConfig {
            endpoint,
            model: self.llm_model,
            api_key: self.llm_api_key,
        });
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

async fn launch_renderer(config: &Config) -> Option<Renderer> {
    let (headless, proxy, timeout, backoff) = (
        config.headless,
        config.proxy.clone(),
        config.timeout,
        config.backoff,
    );
    let launched = tokio::task::spawn_blocking(move || {
        Renderer::launch(headless, proxy.as_deref(), timeout, backoff)
    })
    .await;
    match launched {
        Ok(Ok(renderer)) => Some(renderer),
        Ok(Err(e)) => {
            tracing::warn!(target: "main", "headless chrome unavailable ({e:#}), falling back to plain HTTP");
            None
        }
        Err(e) => {
            tracing::warn!(target: "main", "headless chrome launch panicked ({e}), falling back to plain HTTP");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    let args = Args::parse();
    init_logging(args.verbose);

    if args.list_engines {
        for e in ENGINES {
            println!("{:<10} {:<10} {}{}", e.id, e.name, e.base_url, if e.render { " (rendered)" } else { "" });
        }
        return Ok(());
    }

    let config = args.into_config()?;
    tracing::info!(target: "main", "searching \x1b[1;36m{}\x1b[0m for {:?} (limit {})", config.engine.name, config.query, config.limit);

    let results_dir = config.results_dir();
    let thumbs_dir = config.thumbnails_dir();
    std::fs::create_dir_all(&results_dir)
        .with_context(|| format!("cannot create {}", results_dir.display()))?;
    if config.thumbnails {
        std::fs::create_dir_all(&thumbs_dir)
            .with_context(|| format!("cannot create {}", thumbs_dir.display()))?;
    }

    let fetcher = Fetcher::from_config(&config)?;
    let renderer = if config.render && config.wanted().is_some() {
        launch_renderer(&config).await
    } else {
        None
    };
    let scraper = Scraper::new(&config, &fetcher, renderer.as_ref())?;

    let mut records = Vec::new();
    let pages = tokio::select! {
        pages = scraper.collect(&mut records) => Some(pages),
        _ = tokio::signal::ctrl_c() => None,
    };
    let interrupted = pages.is_none();
    match pages {
        Some(pages) => tracing::info!(target: "main", "{} records from {pages} page(s)", records.len()),
        None => tracing::warn!(target: "main", "interrupted, keeping {} records collected so far", records.len()),
    }

    if config.thumbnails && !records.is_empty() {
        let store = ThumbnailStore::new(&thumbs_dir, &fetcher);
        let stats = if interrupted {
            None
        } else {
            tokio::select! {
                stats = store.attach_all(&mut records, config.workers, config.missing_thumbnail) => Some(stats),
                _ = tokio::signal::ctrl_c() => None,
            }
        };
        match stats {
            Some(stats) => tracing::info!(target: "main", "thumbnails: {stats:?}"),
            None => {
                match util::sweep_partial(&thumbs_dir).await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!(target: "main", "removed {n} partial thumbnail(s)"),
                    Err(e) => tracing::warn!(target: "main", "cannot sweep {}: {e}", thumbs_dir.display()),
                }
                let reused = store.attach_cached(&mut records).await;
                let dropped = thumbnail::apply_policy(&mut records, config.missing_thumbnail);
                tracing::warn!(target: "main", "thumbnail download cut short, {reused} already cached, {dropped} dropped");
            }
        }
    }

    let path = output::output_path(&config, SystemTime::now());
    output::write(&config, &records, &path)
        .await
        .with_context(|| format!("cannot write {}", path.display()))?;

    if config.open_browser && config.format == OutputFormat::Html && !interrupted {
        if let Err(e) = output::open_in_browser(&path) {
            tracing::warn!(target: "main", "cannot open browser: {e}");
        }
    }

    Ok(())
}
