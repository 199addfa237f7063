//! Selector-fallback extraction.
//!
//! Each record field owns an ordered list of candidates; the first one that
//! yields a non-empty value wins and a field nobody matches falls back to its
//! sentinel in [`VideoRecord::new`]. Nothing in here fails at scrape time:
//! the only error is a malformed selector, reported once at startup.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::{
    engine::{FieldSpec, SelectorSpec},
    record::{RawFields, VideoRecord},
};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },
}

fn parse_selector(s: &str) -> Result<Selector, ExtractError> {
    Selector::parse(s).map_err(|e| ExtractError::Selector {
        selector: s.to_owned(),
        reason: format!("{e:?}"),
    })
}

#[derive(Debug)]
enum Candidate {
    Itself,
    Css(Selector),
}

#[derive(Debug)]
pub struct Rule {
    candidates: Vec<Candidate>,
    attrs: &'static [&'static str],
    /// Values are URLs: inline payloads are skipped and `srcset` lists cut to their first entry.
    url: bool,
}

impl Rule {
    fn compile(spec: &FieldSpec, url: bool) -> Result<Self, ExtractError> {
        let candidates = spec
            .selectors
            .iter()
            .map(|s| match s.trim() {
                "&" => Ok(Candidate::Itself),
                s => parse_selector(s).map(Candidate::Css),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            candidates,
            attrs: spec.attrs,
            url,
        })
    }

    fn value_of(&self, el: ElementRef<'_>) -> Option<String> {
        if self.attrs.is_empty() {
            let text = el
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            return (!text.is_empty()).then_some(text);
        }

        self.attrs.iter().find_map(|attr| {
            let value = el.value().attr(attr)?.trim();
            if value.is_empty() {
                return None;
            }
            if !self.url {
                return Some(value.to_owned());
            }
            if is_inline(value) {
                return None;
            }
            if !attr.ends_with("srcset") {
                return Some(value.to_owned());
            }
            let first = value.split_whitespace().next()?.trim_end_matches(',');
            (!first.is_empty()).then(|| first.to_owned())
        })
    }
}

fn has_scheme(s: &str, scheme: &str) -> bool {
    s.get(..scheme.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(scheme))
}

fn is_inline(s: &str) -> bool {
    has_scheme(s, "data:") || has_scheme(s, "javascript:")
}

/// Returns the first non-empty value produced by the rule's candidates.
pub fn first_match(node: ElementRef<'_>, rule: &Rule) -> Option<String> {
    rule.candidates.iter().find_map(|c| {
        let el = match c {
            Candidate::Itself => node,
            Candidate::Css(sel) => node.select(sel).next()?,
        };
        rule.value_of(el)
    })
}

#[derive(Debug)]
pub struct CompiledTable {
    items: Vec<Selector>,
    title: Rule,
    link: Rule,
    image: Rule,
    duration: Rule,
    channel_name: Rule,
    channel_link: Rule,
    views: Rule,
}

impl CompiledTable {
    pub fn compile(spec: &SelectorSpec) -> Result<Self, ExtractError> {
        Ok(Self {
            items: spec
                .items
                .iter()
                .map(|s| parse_selector(s))
                .collect::<Result<_, _>>()?,
            title: Rule::compile(&spec.title, false)?,
            link: Rule::compile(&spec.link, true)?,
            image: Rule::compile(&spec.image, true)?,
            duration: Rule::compile(&spec.duration, false)?,
            channel_name: Rule::compile(&spec.channel_name, false)?,
            channel_link: Rule::compile(&spec.channel_link, true)?,
            views: Rule::compile(&spec.views, false)?,
        })
    }

    /// Item containers from the first item candidate that matches anything.
    pub fn items<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        self.items
            .iter()
            .map(|sel| document.select(sel).collect::<Vec<_>>())
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }

    pub fn fields(&self, item: ElementRef<'_>, base: &Url) -> RawFields {
        let url = |rule: &Rule| first_match(item, rule).and_then(|raw| resolve(base, &raw));
        RawFields {
            title: first_match(item, &self.title),
            link: url(&self.link),
            img_url: url(&self.image),
            duration: first_match(item, &self.duration),
            channel_name: first_match(item, &self.channel_name),
            channel_link: url(&self.channel_link),
            views: first_match(item, &self.views),
        }
    }
}

/// Absolute `http(s)` form of `raw`, or `None` for inline payloads and bare anchors.
pub fn resolve(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || is_inline(raw) {
        return None;
    }
    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.into())
}

/// The URL relative links on this page are relative to.
///
/// `response_url` must be the final URL after redirects; a `<base href>` in
/// the document takes precedence over it.
pub fn page_base(document: &Html, response_url: &Url) -> Url {
    let Ok(sel) = Selector::parse("base[href]") else {
        return response_url.clone();
    };
    document
        .select(&sel)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| response_url.join(href.trim()).ok())
        .unwrap_or_else(|| response_url.clone())
}

/// Records for every item on the page, in document order.
pub fn extract_items(
    document: &Html,
    table: &CompiledTable,
    base: &Url,
    engine: &str,
    title_budget: usize,
) -> Vec<VideoRecord> {
    let items = table.items(document);
    let total = items.len();
    let records = items
        .into_iter()
        .map(|item| VideoRecord::new(engine, table.fields(item, base), title_budget))
        .filter(|r| {
            let ok = r.is_valid();
            if !ok {
                tracing::debug!(target: "extract", "[{engine}] dropping item without title and link");
            }
            ok
        })
        .collect::<Vec<_>>();
    tracing::debug!(target: "extract", "[{engine}] {} / {total} items kept", records.len());
    records
}
