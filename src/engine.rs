//! Static registry of the sites the scraper knows how to read.
//!
//! Every engine is plain `'static` data: a base URL, a search path template
//! and one ordered selector table per record field. Tables are compiled once
//! at startup by [`crate::extract::CompiledTable::compile`].

use unicase::UniCase;
use url::{Url, form_urlencoded::byte_serialize};

use crate::util::slugify;

/// Ordered candidates for one field.
///
/// `selectors` are tried in order, `"&"` standing for the item node itself.
/// With empty `attrs` the element text is taken, otherwise each attribute is
/// tried in order.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub selectors: &'static [&'static str],
    pub attrs: &'static [&'static str],
}

impl FieldSpec {
    pub const NONE: Self = Self::text(&[]);

    pub const fn text(selectors: &'static [&'static str]) -> Self {
        Self {
            selectors,
            attrs: &[],
        }
    }

    pub const fn attr(
        selectors: &'static [&'static str],
        attrs: &'static [&'static str],
    ) -> Self {
        Self { selectors, attrs }
    }

    pub const fn image(selectors: &'static [&'static str]) -> Self {
        Self::attr(selectors, IMAGE_ATTRS)
    }
}

/// Attribute priority for thumbnail URLs; lazy-loading attributes first.
pub const IMAGE_ATTRS: &[&str] = &[
    "data-src",
    "src",
    "data-lazy",
    "data-original",
    "data-thumb",
    "data-srcset",
    "srcset",
];

#[derive(Debug, Clone, Copy)]
pub struct SelectorSpec {
    /// Candidates for the listing item container itself.
    pub items: &'static [&'static str],
    pub title: FieldSpec,
    pub link: FieldSpec,
    pub image: FieldSpec,
    pub duration: FieldSpec,
    pub channel_name: FieldSpec,
    pub channel_link: FieldSpec,
    pub views: FieldSpec,
}

#[derive(Debug)]
pub struct Engine {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    /// Joined onto the base URL after substituting `{query}`, `{slug}` and `{page}`.
    pub search_path: &'static str,
    pub first_page: u32,
    /// Listing is built client-side and needs a headless browser.
    pub render: bool,
    /// Selector the renderer waits for before reading the DOM.
    pub wait_for: Option<&'static str>,
    pub selectors: SelectorSpec,
}

impl Engine {
    pub fn base(&self) -> Result<Url, url::ParseError> {
        Url::parse(self.base_url)
    }

    pub fn search_url(&self, base: &Url, query: &str, page: u32) -> Result<Url, url::ParseError> {
        let query_enc = byte_serialize(query.trim().as_bytes()).collect::<String>();
        let path = self
            .search_path
            .replace("{query}", &query_enc)
            .replace("{slug}", &slugify(query))
            .replace("{page}", &page.to_string());
        base.join(&path)
    }
}

const TITLE_ATTRS: &[&str] = &["title", "alt", "aria-label"];

#[rustfmt::skip]
pub static ENGINES: &[Engine] = &[
    Engine {
        id: "pexels",
        name: "Pexels",
        base_url: "https://www.pexels.com/",
        search_path: "search/videos/{slug}/?page={page}",
        first_page: 1,
        render: false,
        wait_for: None,
        selectors: SelectorSpec {
            items: &["article[data-testid=\"video-card\"]", "article[class*=\"MediaCard\"]", "div[class*=\"MediaCard_card\"]"],
            title: FieldSpec::attr(&["img", "a[title]"], TITLE_ATTRS),
            link: FieldSpec::attr(&["a[href*=\"/video/\"]", "a"], &["href"]),
            image: FieldSpec::image(&["img", "video"]),
            duration: FieldSpec::text(&["[class*=\"duration\"]", "time"]),
            channel_name: FieldSpec::text(&["a[href*=\"/@\"] span", "[class*=\"author\"]"]),
            channel_link: FieldSpec::attr(&["a[href*=\"/@\"]"], &["href"]),
            views: FieldSpec::NONE,
        },
    },
    Engine {
        id: "pixabay",
        name: "Pixabay",
        base_url: "https://pixabay.com/",
        search_path: "videos/search/{slug}/?pagi={page}",
        first_page: 1,
        render: false,
        wait_for: None,
        selectors: SelectorSpec {
            items: &["div[class*=\"container--\"] > a[href*=\"/videos/\"]", "div.item", "a[href*=\"/videos/\"]"],
            title: FieldSpec::attr(&["img", "&"], TITLE_ATTRS),
            link: FieldSpec::attr(&["&", "a"], &["href"]),
            image: FieldSpec::image(&["img", "video"]),
            duration: FieldSpec::text(&["[class*=\"duration\"]", "[class*=\"time\"]"]),
            channel_name: FieldSpec::text(&["[class*=\"user\"]", "[class*=\"author\"]"]),
            channel_link: FieldSpec::attr(&["a[href*=\"/users/\"]"], &["href"]),
            views: FieldSpec::text(&["[class*=\"views\"]"]),
        },
    },
    Engine {
        id: "mixkit",
        name: "Mixkit",
        base_url: "https://mixkit.co/",
        search_path: "free-stock-video/{slug}/?page={page}",
        first_page: 1,
        render: false,
        wait_for: None,
        selectors: SelectorSpec {
            items: &["div.item-grid-card", "div[class*=\"item-grid-card\"]", "article"],
            title: FieldSpec::text(&[".item-grid-card__title", "h2", "h3"]),
            link: FieldSpec::attr(&["a.item-grid-video-player__overlay-link", "a[href*=\"/free-stock-video/\"]", "a"], &["href"]),
            image: FieldSpec::image(&["video", "img"]),
            duration: FieldSpec::text(&[".item-grid-video-player__duration", "[class*=\"duration\"]"]),
            channel_name: FieldSpec::text(&[".item-grid-card__meta-data", "[class*=\"author\"]"]),
            channel_link: FieldSpec::NONE,
            views: FieldSpec::NONE,
        },
    },
    Engine {
        id: "videvo",
        name: "Videvo",
        base_url: "https://www.videvo.net/",
        search_path: "search/?q={query}&page={page}",
        first_page: 1,
        render: false,
        wait_for: None,
        selectors: SelectorSpec {
            items: &["div.video-card", "div[class*=\"VideoCard\"]", "li.search-result"],
            title: FieldSpec::text(&[".video-card__title", "h3", "img"]),
            link: FieldSpec::attr(&["a.video-card__link", "a"], &["href"]),
            image: FieldSpec::image(&["img", "video"]),
            duration: FieldSpec::text(&[".video-card__duration", "[class*=\"duration\"]"]),
            channel_name: FieldSpec::text(&[".video-card__author", "[class*=\"author\"]"]),
            channel_link: FieldSpec::attr(&[".video-card__author a", "a[href*=\"/profile/\"]"], &["href"]),
            views: FieldSpec::text(&[".video-card__views", "[class*=\"views\"]"]),
        },
    },
    Engine {
        id: "vecteezy",
        name: "Vecteezy",
        base_url: "https://www.vecteezy.com/",
        search_path: "free-videos/{slug}?page={page}",
        first_page: 1,
        render: false,
        wait_for: None,
        selectors: SelectorSpec {
            items: &["li.ez-resource-grid__item", "[data-content-type=\"video\"]", "figure"],
            title: FieldSpec::attr(&["a.ez-resource-thumb__link", "img"], TITLE_ATTRS),
            link: FieldSpec::attr(&["a.ez-resource-thumb__link", "a"], &["href"]),
            image: FieldSpec::image(&["img.ez-resource-thumb__img", "img"]),
            duration: FieldSpec::text(&[".ez-resource-thumb__duration", "[class*=\"duration\"]"]),
            channel_name: FieldSpec::NONE,
            channel_link: FieldSpec::NONE,
            views: FieldSpec::NONE,
        },
    },
    Engine {
        id: "coverr",
        name: "Coverr",
        base_url: "https://coverr.co/",
        search_path: "s?q={query}&page={page}",
        first_page: 1,
        render: true,
        wait_for: Some("a[href*=\"/videos/\"]"),
        selectors: SelectorSpec {
            items: &["div[class*=\"VideoCard\"]", "a[href*=\"/videos/\"]"],
            title: FieldSpec::text(&["[class*=\"title\"]", "h3", "img"]),
            link: FieldSpec::attr(&["a[href*=\"/videos/\"]", "&"], &["href"]),
            image: FieldSpec::image(&["img", "video"]),
            duration: FieldSpec::text(&["[class*=\"duration\"]"]),
            channel_name: FieldSpec::NONE,
            channel_link: FieldSpec::NONE,
            views: FieldSpec::text(&["[class*=\"views\"]", "[class*=\"downloads\"]"]),
        },
    },
];

pub const DEFAULT_ENGINE: &str = "pexels";

/// Case-insensitive lookup by id or display name.
pub fn lookup(key: &str) -> Option<&'static Engine> {
    let key = UniCase::new(key.trim());
    ENGINES
        .iter()
        .find(|e| UniCase::new(e.id) == key || UniCase::new(e.name) == key)
}

pub fn ids() -> impl Iterator<Item = &'static str> {
    ENGINES.iter().map(|e| e.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_accepts_names() {
        assert_eq!(lookup("PEXELS").map(|e| e.id), Some("pexels"));
        assert_eq!(lookup(" Mixkit ").map(|e| e.id), Some("mixkit"));
        assert!(lookup("nope").is_none());
        assert!(lookup(DEFAULT_ENGINE).is_some());
    }

    #[test]
    fn ids_are_unique_and_bases_parse() {
        let mut seen = hashbrown::HashSet::new();
        for e in ENGINES {
            assert!(seen.insert(e.id), "duplicate engine {}", e.id);
            assert!(e.base().is_ok(), "bad base for {}", e.id);
            assert!(!e.selectors.items.is_empty());
        }
    }

    #[test]
    fn search_url_substitutes_placeholders() {
        let pexels = lookup("pexels").unwrap();
        let url = pexels
            .search_url(&pexels.base().unwrap(), "Ocean Waves", 2)
            .unwrap();
        assert_eq!(url.as_str(), "https://www.pexels.com/search/videos/ocean-waves/?page=2");

        let videvo = lookup("videvo").unwrap();
        let url = videvo
            .search_url(&videvo.base().unwrap(), "city & night", 1)
            .unwrap();
        assert_eq!(url.as_str(), "https://www.videvo.net/search/?q=city+%26+night&page=1");
    }

    #[test]
    fn search_url_honours_overridden_base() {
        let mixkit = lookup("mixkit").unwrap();
        let base = Url::parse("http://127.0.0.1:9000/mirror/").unwrap();
        let url = mixkit.search_url(&base, "rain", 3).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/mirror/free-stock-video/rain/?page=3");
    }
}
