//! Last-resort extraction through an OpenAI-compatible chat endpoint, used
//! only when no item selector matched anything on a page.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use scraper::Html;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::LlmConfig,
    extract::resolve,
    record::{RawFields, VideoRecord},
    util::{collapse_whitespace, truncate_chars},
};

/// Characters of page markup sent along with the prompt.
pub const PAGE_BUDGET: usize = 24_000;

const SYSTEM_PROMPT: &str = "You extract video listings from HTML search result pages. \
Answer with a JSON array only. Each element is an object with the string keys \
title, link, img_url, duration, channel_name, channel_link, views; use null for \
anything the page does not show. Keep URLs exactly as they appear in the markup.";

static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|svg|noscript)\b.*?</(script|style|svg|noscript)\s*>|<!--.*?-->")
        .unwrap()
});

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Reply,
}

#[derive(Deserialize)]
struct Reply {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LlmItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub img_url: Option<String>,
    pub duration: Option<String>,
    pub channel_name: Option<String>,
    pub channel_link: Option<String>,
    pub views: Option<String>,
}

/// Markup minus scripts, styles, inline SVG and comments, whitespace collapsed.
pub fn visible_html(document: &Html, budget: usize) -> String {
    let html = document.root_element().html();
    let stripped = NOISE.replace_all(&html, "");
    truncate_chars(&collapse_whitespace(&stripped), budget)
}

/// Pulls the JSON array out of a reply that may be wrapped in prose or code fences.
pub fn parse_reply(content: &str) -> anyhow::Result<Vec<LlmItem>> {
    let (Some(start), Some(end)) = (content.find('['), content.rfind(']')) else {
        anyhow::bail!("no JSON array in reply");
    };
    if end < start {
        anyhow::bail!("no JSON array in reply");
    }
    Ok(serde_json::from_str(&content[start..=end])?)
}

pub fn into_records(
    items: Vec<LlmItem>,
    base: &Url,
    engine: &str,
    title_budget: usize,
) -> Vec<VideoRecord> {
    items
        .into_iter()
        .map(|item| {
            let url = |u: Option<String>| u.and_then(|u| resolve(base, &u));
            RawFields {
                title: item.title,
                link: url(item.link),
                img_url: url(item.img_url),
                duration: item.duration,
                channel_name: item.channel_name,
                channel_link: url(item.channel_link),
                views: item.views,
            }
        })
        .map(|raw| VideoRecord::new(engine, raw, title_budget))
        .filter(VideoRecord::is_valid)
        .collect()
}

pub struct LlmFallback {
    config: LlmConfig,
}

impl LlmFallback {
    pub const fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    async fn ask(&self, client: &Client, markup: &str) -> anyhow::Result<Vec<LlmItem>> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: markup,
                },
            ],
            temperature: 0.0,
        };

        let mut builder = client.post(self.config.endpoint.clone()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response: ChatResponse = builder.send().await?.error_for_status()?.json().await?;
        let Some(choice) = response.choices.into_iter().next() else {
            anyhow::bail!("empty choices");
        };
        parse_reply(&choice.message.content)
    }

    /// Never fails: any problem is logged and yields no records.
    pub async fn extract(
        &self,
        client: &Client,
        document: &Html,
        base: &Url,
        engine: &str,
        title_budget: usize,
    ) -> Vec<VideoRecord> {
        let markup = visible_html(document, PAGE_BUDGET);
        tracing::info!(target: "llm", "[{engine}] selectors found nothing, asking {} ({} chars)", self.config.endpoint, markup.len());

        match self.ask(client, &markup).await {
            Ok(items) => {
                let records = into_records(items, base, engine, title_budget);
                tracing::info!(target: "llm", "[{engine}] recovered {} records", records.len());
                records
            }
            Err(e) => {
                tracing::warn!(target: "llm", "[{engine}] fallback failed: {e:#}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DEFAULT_TITLE_BUDGET, NA};

    #[test]
    fn reply_in_code_fence() {
        let reply = "Sure!\n```json\n[{\"title\": \"Sea\", \"link\": \"/v/1\", \"views\": null}]\n```";
        let items = parse_reply(reply).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("Sea"));
        assert!(items[0].img_url.is_none());
    }

    #[test]
    fn reply_without_array_is_an_error() {
        assert!(parse_reply("I could not find any videos.").is_err());
        assert!(parse_reply("] nope [").is_err());
    }

    #[test]
    fn items_go_through_the_record_constructor() {
        let base = Url::parse("https://stock.example.com/search?q=sea").unwrap();
        let items = parse_reply(
            r#"[{"title": "Sea &amp; Sky", "link": "/v/1", "img_url": "data:image/png;base64,AA"},
                {"duration": "0:10"}]"#,
        )
        .unwrap();
        let records = into_records(items, &base, "pexels", DEFAULT_TITLE_BUDGET);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Sea & Sky");
        assert_eq!(records[0].link, "https://stock.example.com/v/1");
        assert_eq!(records[0].img_url, None);
        assert_eq!(records[0].views, NA);
    }

    #[test]
    fn noise_is_stripped_from_markup() {
        let doc = Html::parse_document(
            "<html><head><style>.a{}</style><script>var x = '<b>';</script></head>\
             <body><!-- c --><a href='/v/1'>One</a><svg><path/></svg></body></html>",
        );
        let markup = visible_html(&doc, PAGE_BUDGET);
        assert!(markup.contains("<a href=\"/v/1\">One</a>"));
        assert!(!markup.contains("script") && !markup.contains("style") && !markup.contains("svg"));
        assert!(!markup.contains("<!--"));
    }
}
