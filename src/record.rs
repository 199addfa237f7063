use serde::{Deserialize, Serialize};

use crate::util::{clock_in, collapse_whitespace, truncate_chars};

pub const NA: &str = "N/A";
pub const NO_LINK: &str = "#";
pub const UNTITLED: &str = "Untitled";

pub const DEFAULT_TITLE_BUDGET: usize = 100;

/// One listing entry as scraped from a search page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub title: String,
    pub link: String,
    pub img_url: Option<String>,
    pub duration: String,
    pub channel_name: String,
    pub channel_link: String,
    pub views: String,
    pub source_engine: String,
    /// Path of the cached thumbnail, relative to the output root.
    pub thumbnail: Option<String>,
}

/// Field values straight out of the extractor; URLs are already absolute.
#[derive(Debug, Default, Clone)]
pub struct RawFields {
    pub title: Option<String>,
    pub link: Option<String>,
    pub img_url: Option<String>,
    pub duration: Option<String>,
    pub channel_name: Option<String>,
    pub channel_link: Option<String>,
    pub views: Option<String>,
}

fn display(value: Option<String>, sentinel: &str) -> String {
    value
        .map(|v| collapse_whitespace(&v))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| sentinel.to_owned())
}

impl VideoRecord {
    pub fn new(engine: &str, raw: RawFields, title_budget: usize) -> Self {
        let title = raw
            .title
            .map(|t| collapse_whitespace(&html_escape::decode_html_entities(&t)))
            .filter(|t| !t.is_empty())
            .map_or_else(|| UNTITLED.to_owned(), |t| truncate_chars(&t, title_budget));

        let duration = raw.duration.map(|d| match clock_in(&d) {
            Some(clock) => clock.to_owned(),
            None => d,
        });

        Self {
            title,
            link: display(raw.link, NO_LINK),
            img_url: raw
                .img_url
                .map(|u| u.trim().to_owned())
                .filter(|u| !u.is_empty()),
            duration: display(duration, NA),
            channel_name: display(raw.channel_name, NA),
            channel_link: display(raw.channel_link, NO_LINK),
            views: display(raw.views, NA),
            source_engine: engine.to_owned(),
            thumbnail: None,
        }
    }

    /// A record carrying neither a title nor a link is noise.
    pub fn is_valid(&self) -> bool {
        !(self.title == UNTITLED && self.link == NO_LINK)
    }

    pub fn attach_thumbnail(&mut self, path: String) {
        self.thumbnail = Some(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_fall_back_to_sentinels() {
        let r = VideoRecord::new(
            "pexels",
            RawFields {
                title: Some("   ".into()),
                channel_name: Some(String::new()),
                ..RawFields::default()
            },
            DEFAULT_TITLE_BUDGET,
        );
        assert_eq!(r.title, UNTITLED);
        assert_eq!(r.link, NO_LINK);
        assert_eq!(r.img_url, None);
        assert_eq!(r.duration, NA);
        assert_eq!(r.channel_name, NA);
        assert_eq!(r.channel_link, NO_LINK);
        assert_eq!(r.views, NA);
        assert_eq!(r.source_engine, "pexels");
        assert!(!r.is_valid());
    }

    #[test]
    fn title_is_unescaped_then_truncated() {
        let r = VideoRecord::new(
            "mixkit",
            RawFields {
                title: Some("Rock &amp;  Roll &quot;Live&quot; at the beach".into()),
                ..RawFields::default()
            },
            12,
        );
        assert_eq!(r.title, "Rock & Roll…");
        assert!(r.is_valid());
    }

    #[test]
    fn duration_badge_is_reduced_to_clock() {
        let r = VideoRecord::new(
            "pixabay",
            RawFields {
                link: Some("https://pixabay.com/videos/x-1/".into()),
                duration: Some("\n  HD 0:27 \n".into()),
                ..RawFields::default()
            },
            DEFAULT_TITLE_BUDGET,
        );
        assert_eq!(r.duration, "0:27");
        assert!(r.is_valid());
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let mut records = (0..4)
            .map(|i| {
                VideoRecord::new(
                    "videvo",
                    RawFields {
                        title: Some(format!("Clip \"{i}\" <b>")),
                        link: Some(format!("https://example.com/v/{i}")),
                        img_url: (i % 2 == 0).then(|| format!("https://cdn.example.com/{i}.jpg")),
                        views: Some(format!("{i},000 views")),
                        ..RawFields::default()
                    },
                    DEFAULT_TITLE_BUDGET,
                )
            })
            .collect::<Vec<_>>();
        records[1].attach_thumbnail("thumbnails/00ff.jpg".into());

        let json = serde_json::to_string(&records).unwrap();
        let back: Vec<VideoRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 4);
        assert_eq!(back, records);
    }
}
