use core::time::Duration;
use std::{
    hash::{BuildHasher, BuildHasherDefault, DefaultHasher},
    path::{Path, PathBuf},
    sync::LazyLock,
    time::SystemTime,
};

use regex::Regex;

static CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,2}:)?\d{1,2}:\d{2}\b").unwrap());

/// Joins the non-blank pieces of `s` with single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `s` down to at most `budget` characters, the trailing ellipsis included.
pub fn truncate_chars(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        return s.to_owned();
    }
    if budget == 0 {
        return String::new();
    }
    let mut out = s.chars().take(budget - 1).collect::<String>();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

pub fn slugify(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[inline]
pub fn url_hash(url: &str) -> u64 {
    BuildHasherDefault::<DefaultHasher>::default().hash_one(url)
}

/// Pulls a `h:mm:ss` / `mm:ss` clock out of noisy badge text like `"HD 0:15"`.
pub fn clock_in(text: &str) -> Option<&str> {
    CLOCK.find(text).map(|m| m.as_str())
}

/// `Retry-After` is either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    let wait = at.duration_since(now).unwrap_or_default();
    tracing::debug!(target: "retry-after", "{value:?} -> {wait:?}");
    Some(wait)
}

/// Infix of the temporary files [`write_atomic`] leaves behind while writing.
pub const PART_MARKER: &str = ".part-";

/// Sibling temp file, removed on drop unless `keep` is set.
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn beside(target: &Path) -> Self {
        let mut path = target.as_os_str().to_owned();
        path.push(format!("{PART_MARKER}{:08x}", rand::random::<u32>()));
        Self {
            path: PathBuf::from(path),
            keep: false,
        }
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Temp file in the same directory, then rename over the target. A failed
/// or cancelled write removes its temp file.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut part = PartFile::beside(path);
    tokio::fs::write(&part.path, data).await?;
    tokio::fs::rename(&part.path, path).await?;
    part.keep = true;
    Ok(())
}

/// Deletes leftover [`write_atomic`] temp files in `dir`; returns how many.
pub async fn sweep_partial(dir: &Path) -> std::io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().contains(PART_MARKER)
            && tokio::fs::remove_file(entry.path()).await.is_ok()
        {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_the_ellipsis() {
        assert_eq!(truncate_chars("short", 10), "short");
        let t = truncate_chars("abcdefghij klm", 8);
        assert_eq!(t, "abcdefg…");
        assert_eq!(t.chars().count(), 8);
        assert_eq!(truncate_chars("ab cd", 4), "ab…");
        assert_eq!(truncate_chars("日本語のタイトル", 4), "日本語…");
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("  Ocean Waves, 4K! "), "ocean-waves-4k");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn clock_extraction() {
        assert_eq!(clock_in("HD 0:15"), Some("0:15"));
        assert_eq!(clock_in("1:02:03 min"), Some("1:02:03"));
        assert_eq!(clock_in("no time here"), None);
    }

    #[test]
    fn retry_after_forms() {
        let now = httpdate::parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(parse_retry_after("7", now), Some(Duration::from_secs(7)));
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:49:47 GMT", now),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:49:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn hash_is_stable_within_a_run() {
        assert_eq!(url_hash("https://a/b.jpg"), url_hash("https://a/b.jpg"));
        assert_ne!(url_hash("https://a/b.jpg"), url_hash("https://a/c.jpg"));
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        write_atomic(&path, &vec![7u8; 100]).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 100);
        let names = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect::<Vec<_>>();
        assert_eq!(names, ["a.png"]);
    }

    #[test]
    fn cancelled_write_removes_its_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let part = PartFile::beside(&dir.path().join("b.png"));
        std::fs::write(&part.path, b"half").unwrap();
        assert!(part.path.is_file());
        let leftover = part.path.clone();
        drop(part);
        assert!(!leftover.exists());
    }

    #[tokio::test]
    async fn sweep_removes_only_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.png"), b"x").unwrap();
        std::fs::write(dir.path().join("c.png.part-0badf00d"), b"x").unwrap();
        std::fs::write(dir.path().join("d.jpg.part-12345678"), b"x").unwrap();
        assert_eq!(sweep_partial(dir.path()).await.unwrap(), 2);
        let names = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect::<Vec<_>>();
        assert_eq!(names, ["keep.png"]);
    }
}
