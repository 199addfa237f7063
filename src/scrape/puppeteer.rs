use core::time::Duration;
use std::{ffi::OsStr, sync::Arc};

use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::{task::spawn_blocking, time::sleep};
use url::Url;

use super::{Backoff, FetchError, Page, random_user_agent};

pub fn puppeteer(headless: bool, proxy: Option<&str>) -> anyhow::Result<Browser> {
    Browser::new(LaunchOptions {
        args: vec![OsStr::new("--disable-blink-features=AutomationControlled")],
        headless,
        proxy_server: proxy,
        idle_browser_timeout: Duration::from_secs(300),
        ..LaunchOptions::default()
    })
}

/// Opens a fresh tab and closes every other one.
#[allow(clippy::significant_drop_tightening)]
pub fn first_tab(browser: &Browser) -> anyhow::Result<Arc<Tab>> {
    let tab = browser.new_tab()?;

    {
        let tabs_guard = browser
            .get_tabs()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for remain in &*tabs_guard {
            if !Arc::ptr_eq(&tab, remain) {
                remain.close(true)?;
            }
        }
    }

    Ok(tab)
}

/// A single headless tab used for engines whose listings are built client-side.
pub struct Renderer {
    _browser: Browser,
    tab: Arc<Tab>,
    backoff: Backoff,
    timeout: Duration,
}

impl Renderer {
    /// Blocking; call from `spawn_blocking`.
    pub fn launch(
        headless: bool,
        proxy: Option<&str>,
        timeout: Duration,
        backoff: Backoff,
    ) -> anyhow::Result<Self> {
        let browser = puppeteer(headless, proxy)?;
        let tab = first_tab(&browser)?;
        let user_agent = random_user_agent();
        tracing::info!(target: "render", "choosing user-agent \x1b[1;36m{user_agent}\x1b[0m ...");
        tab.set_user_agent(user_agent, None, None)?;
        tab.set_default_timeout(timeout);
        Ok(Self {
            _browser: browser,
            tab,
            backoff,
            timeout,
        })
    }

    fn render_blocking(
        tab: &Tab,
        url: &str,
        wait_for: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Page> {
        tab.navigate_to(url)?.wait_until_navigated()?;
        if let Some(selector) = wait_for {
            if let Err(e) = tab.wait_for_element_with_custom_timeout(selector, timeout) {
                tracing::warn!(target: "render", "{url}: {selector:?} never showed up: {e}");
            }
        }
        let body = tab.get_content()?;
        let url = Url::parse(&tab.get_url())?;
        Ok(Page { url, body })
    }

    pub async fn render(&self, url: &Url, wait_for: Option<&'static str>) -> Result<Page, FetchError> {
        let mut attempt = 0;
        loop {
            let tab = Arc::clone(&self.tab);
            let target = url.to_string();
            let timeout = self.timeout;
            let result = spawn_blocking(move || Self::render_blocking(&tab, &target, wait_for, timeout))
                .await
                .map_err(|e| FetchError::Render(e.to_string()))
                .and_then(|r| r.map_err(|e| FetchError::Render(format!("{e:#}"))));

            let err = match result {
                Ok(page) => {
                    tracing::info!(target: "render", "{url}: {} bytes", page.body.len());
                    return Ok(page);
                }
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.backoff.attempts {
                return Err(err);
            }
            let wait = self.backoff.jittered(attempt - 1);
            tracing::warn!(target: "render", "{url}: {err}, retry #{attempt} in {wait:?}");
            sleep(wait).await;
        }
    }
}
