use std::path::{Path, PathBuf};

use futures_util::{StreamExt, stream};
use hashbrown::{HashMap, HashSet};
use unicase::UniCase;
use url::Url;

use crate::{
    config::MissingThumbnail,
    record::VideoRecord,
    scrape::{FetchError, Fetcher, Payload},
    util::{truncate_chars, url_hash, write_atomic},
};

pub const DIR_NAME: &str = "thumbnails";
pub const MIN_BYTES: usize = 64;
pub const MAX_BYTES: usize = 8 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Avif,
}

impl ImageFormat {
    pub const ALL: [Self; 6] = [Self::Jpeg, Self::Png, Self::Gif, Self::Webp, Self::Bmp, Self::Avif];

    /// Identifies the format from its magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xff, 0xd8, 0xff, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'B', b'M', ..] => Some(Self::Bmp),
            [_, _, _, _, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f' | b's', ..] => Some(Self::Avif),
            _ => None,
        }
    }

    pub const fn ext(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Avif => "avif",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThumbError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad image URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Same source URL, same file name.
pub fn file_stem(url: &str) -> String {
    format!("{:016x}", url_hash(url))
}

fn acceptable_type(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    UniCase::new(mime.get(..6).unwrap_or_default()) == UniCase::new("image/")
        || UniCase::new(mime) == UniCase::new("application/octet-stream")
        || UniCase::new(mime) == UniCase::new("binary/octet-stream")
}

pub fn validate(payload: &Payload) -> Result<ImageFormat, FetchError> {
    if let Some(ct) = payload.content_type.as_deref() {
        if !acceptable_type(ct) {
            return Err(FetchError::Rejected(format!("content-type {ct}")));
        }
    }
    let len = payload.bytes.len();
    if !(MIN_BYTES..=MAX_BYTES).contains(&len) {
        return Err(FetchError::Rejected(format!("{len} bytes")));
    }
    ImageFormat::sniff(&payload.bytes)
        .ok_or_else(|| FetchError::Rejected("unknown image format".to_owned()))
}

/// Inline SVG `data:` URI drawn for records without a usable thumbnail.
pub fn placeholder_svg(label: &str) -> String {
    let label = html_escape::encode_text(&truncate_chars(label, 40)).into_owned();
    let svg = format!(
        "<svg xmlns='http://www.w3.org/2000/svg' width='320' height='180' viewBox='0 0 320 180'>\
         <rect width='320' height='180' fill='#2b2f36'/>\
         <polygon points='145,70 145,110 180,90' fill='#8a93a3'/>\
         <text x='160' y='150' font-family='sans-serif' font-size='13' fill='#c5cad3' text-anchor='middle'>{label}</text>\
         </svg>"
    );
    let mut uri = String::from("data:image/svg+xml;charset=utf-8,");
    for c in svg.chars() {
        match c {
            '%' => uri.push_str("%25"),
            '#' => uri.push_str("%23"),
            '<' => uri.push_str("%3C"),
            '>' => uri.push_str("%3E"),
            '"' => uri.push_str("%22"),
            '\n' | '\r' => uri.push(' '),
            c => uri.push(c),
        }
    }
    uri
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailStats {
    pub downloaded: usize,
    pub reused: usize,
    pub failed: usize,
    pub dropped: usize,
}

pub struct ThumbnailStore<'a> {
    dir: PathBuf,
    fetcher: &'a Fetcher,
}

impl<'a> ThumbnailStore<'a> {
    pub fn new(dir: impl Into<PathBuf>, fetcher: &'a Fetcher) -> Self {
        Self {
            dir: dir.into(),
            fetcher,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name of an already cached thumbnail for `url`, if any.
    pub async fn cached(&self, url: &str) -> Option<String> {
        let stem = file_stem(url);
        for format in ImageFormat::ALL {
            let name = format!("{stem}.{}", format.ext());
            let meta = tokio::fs::metadata(self.dir.join(&name)).await;
            if meta.is_ok_and(|m| m.is_file()) {
                return Some(name);
            }
        }
        None
    }

    /// Returns the cached file name and whether it was already on disk.
    pub async fn fetch_one(&self, url: &str) -> Result<(String, bool), ThumbError> {
        if let Some(name) = self.cached(url).await {
            return Ok((name, true));
        }

        let target = Url::parse(url)?;
        let payload = self.fetcher.bytes(&target).await?;
        let format = validate(&payload)?;
        let name = format!("{}.{}", file_stem(url), format.ext());
        write_atomic(&self.dir.join(&name), &payload.bytes).await?;
        tracing::debug!(target: "thumbnail", "{url} -> {name} ({} bytes)", payload.bytes.len());
        Ok((name, false))
    }

    fn attach(records: &mut [VideoRecord], files: &HashMap<String, String>) {
        for record in records {
            let file = record.img_url.as_ref().and_then(|u| files.get(u));
            if let Some(file) = file {
                let path = format!("{DIR_NAME}/{file}");
                record.attach_thumbnail(path);
            }
        }
    }

    /// Downloads every distinct image URL once, `workers` at a time, and
    /// attaches the cached paths.
    pub async fn attach_all(
        &self,
        records: &mut Vec<VideoRecord>,
        workers: usize,
        policy: MissingThumbnail,
    ) -> ThumbnailStats {
        let mut seen = HashSet::new();
        let unique = records
            .iter()
            .filter_map(|r| r.img_url.clone())
            .filter(|u| seen.insert(u.clone()))
            .collect::<Vec<_>>();
        tracing::info!(target: "thumbnail", "{} distinct thumbnails for {} records, {workers} workers", unique.len(), records.len());

        let results = stream::iter(unique)
            .map(|url| async move {
                let result = self.fetch_one(&url).await;
                (url, result)
            })
            .buffer_unordered(workers.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut stats = ThumbnailStats::default();
        let mut files = HashMap::with_capacity(results.len());
        for (url, result) in results {
            match result {
                Ok((name, reused)) => {
                    if reused {
                        stats.reused += 1;
                    } else {
                        stats.downloaded += 1;
                    }
                    files.insert(url, name);
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(target: "thumbnail", "\x1b[31m{url}\x1b[0m: {e}");
                }
            }
        }

        Self::attach(records, &files);
        stats.dropped = apply_policy(records, policy);
        stats
    }

    /// Attaches whatever is already on disk without touching the network.
    pub async fn attach_cached(&self, records: &mut [VideoRecord]) -> usize {
        let urls = records
            .iter()
            .filter(|r| r.thumbnail.is_none())
            .filter_map(|r| r.img_url.clone())
            .collect::<HashSet<_>>();
        let mut files = HashMap::with_capacity(urls.len());
        for url in urls {
            if let Some(name) = self.cached(&url).await {
                files.insert(url, name);
            }
        }
        Self::attach(records, &files);
        files.len()
    }
}

/// Returns how many records were removed.
pub fn apply_policy(records: &mut Vec<VideoRecord>, policy: MissingThumbnail) -> usize {
    match policy {
        MissingThumbnail::Placeholder => 0,
        MissingThumbnail::Drop => {
            let before = records.len();
            records.retain(|r| r.thumbnail.is_some());
            before - records.len()
        }
    }
}
