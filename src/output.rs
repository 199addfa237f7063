use core::fmt::Write as _;
use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

use crate::{
    config::Config,
    record::{NA, NO_LINK, VideoRecord},
    thumbnail::placeholder_svg,
    util::{slugify, write_atomic},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Html,
    Json,
    Csv,
}

impl OutputFormat {
    pub const fn ext(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

/// `results/<engine>_<query-slug>_<unix-seconds>.<ext>` under the output root.
pub fn output_path(config: &Config, now: SystemTime) -> PathBuf {
    let secs = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let slug = slugify(&config.query);
    let slug = if slug.is_empty() { "all" } else { &slug };
    config.results_dir().join(format!(
        "{}_{slug}_{secs}.{}",
        config.engine.id,
        config.format.ext()
    ))
}

pub fn to_json(records: &[VideoRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(records)
}

pub fn read_json(path: &Path) -> anyhow::Result<Vec<VideoRecord>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

pub fn to_csv(records: &[VideoRecord]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(writer.into_inner().map_err(|e| anyhow::anyhow!("csv: {e}"))?)
}

pub fn read_csv(data: &[u8]) -> anyhow::Result<Vec<VideoRecord>> {
    csv::Reader::from_reader(data)
        .deserialize()
        .collect::<Result<_, _>>()
        .map_err(Into::into)
}

pub struct GalleryMeta<'a> {
    pub query: &'a str,
    pub engine: &'a str,
    pub generated: SystemTime,
    /// Hotlink `img_url` when there is no local copy (thumbnail download disabled).
    pub remote_images: bool,
}

/// Relative to the results directory.
const THUMB_PREFIX: &str = "../";

const STYLE: &str = r"
*{box-sizing:border-box}
body{margin:0;font:14px/1.4 system-ui,sans-serif;background:#16181d;color:#e3e6eb}
header{padding:16px 24px;background:#1f232a;border-bottom:1px solid #2d323b;display:flex;flex-wrap:wrap;gap:12px;align-items:baseline}
header h1{font-size:18px;margin:0}
header .meta{color:#9aa3b2}
header input{margin-left:auto;padding:6px 10px;border-radius:6px;border:1px solid #3a404b;background:#16181d;color:inherit;min-width:220px}
main{display:grid;grid-template-columns:repeat(auto-fill,minmax(260px,1fr));gap:16px;padding:24px}
.card{background:#1f232a;border-radius:8px;overflow:hidden;display:flex;flex-direction:column}
.card .thumb{position:relative;aspect-ratio:16/9;background:#2b2f36}
.card img{width:100%;height:100%;object-fit:cover;display:block}
.card .dur{position:absolute;right:6px;bottom:6px;background:rgba(0,0,0,.75);padding:1px 6px;border-radius:4px;font-size:12px}
.card .body{padding:10px 12px;display:flex;flex-direction:column;gap:4px}
.card a{color:#e3e6eb;text-decoration:none}
.card a:hover{text-decoration:underline}
.card .sub{color:#9aa3b2;font-size:12px;display:flex;justify-content:space-between;gap:8px}
.card.hidden{display:none}
";

const SCRIPT: &str = r"
(function(){
  var imgs=[].slice.call(document.querySelectorAll('img[data-src]'));
  function load(img){img.src=img.dataset.src;img.removeAttribute('data-src');}
  if('IntersectionObserver' in window){
    var io=new IntersectionObserver(function(es){es.forEach(function(e){if(e.isIntersecting){load(e.target);io.unobserve(e.target);}});},{rootMargin:'200px'});
    imgs.forEach(function(i){io.observe(i);});
  }else{imgs.forEach(load);}
  var box=document.getElementById('filter');
  box.addEventListener('input',function(){
    var q=box.value.toLowerCase();
    document.querySelectorAll('.card').forEach(function(c){
      c.classList.toggle('hidden',q&&c.dataset.search.indexOf(q)<0);
    });
  });
})();
";

fn card(out: &mut String, record: &VideoRecord, remote_images: bool) {
    let placeholder = placeholder_svg(&record.title);
    let src = match (&record.thumbnail, &record.img_url) {
        (Some(local), _) => format!("{THUMB_PREFIX}{local}"),
        (None, Some(remote)) if remote_images => remote.clone(),
        _ => placeholder.clone(),
    };
    let search = format!("{} {}", record.title, record.channel_name).to_lowercase();

    let _ = write!(
        out,
        "<article class=\"card\" data-search=\"{}\">\
         <a class=\"thumb\" href=\"{}\" target=\"_blank\" rel=\"noopener\">\
         <img src=\"{}\" data-src=\"{}\" data-fallback=\"{}\" alt=\"{}\" onerror=\"this.onerror=null;this.src=this.dataset.fallback\">",
        attr(&search),
        attr(&record.link),
        attr(&placeholder),
        attr(&src),
        attr(&placeholder),
        attr(&record.title),
    );
    if record.duration != NA {
        let _ = write!(out, "<span class=\"dur\">{}</span>", text(&record.duration));
    }
    let _ = write!(
        out,
        "</a><div class=\"body\"><a href=\"{}\" target=\"_blank\" rel=\"noopener\" title=\"{}\">{}</a><div class=\"sub\">",
        attr(&record.link),
        attr(&record.title),
        text(&record.title),
    );
    if record.channel_link == NO_LINK {
        let _ = write!(out, "<span>{}</span>", text(&record.channel_name));
    } else {
        let _ = write!(
            out,
            "<a href=\"{}\" target=\"_blank\" rel=\"noopener\">{}</a>",
            attr(&record.channel_link),
            text(&record.channel_name),
        );
    }
    let _ = write!(
        out,
        "<span>{}</span></div></div></article>\n",
        text(&record.views)
    );
}

/// Self-contained page: inline CSS and JS, images lazy-loaded from `data-src`.
pub fn render_html(records: &[VideoRecord], meta: &GalleryMeta<'_>) -> String {
    let mut out = String::with_capacity(4096 + records.len() * 1536);
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\
         <title>{q} · {e}</title><style>{STYLE}</style></head><body>\n\
         <header><h1>{q}</h1><span class=\"meta\">{e} · {n} videos · {t}</span>\
         <input id=\"filter\" type=\"search\" placeholder=\"Filter…\"></header>\n<main>\n",
        q = text(meta.query),
        e = text(meta.engine),
        n = records.len(),
        t = httpdate::fmt_http_date(meta.generated),
    );
    for record in records {
        card(&mut out, record, meta.remote_images);
    }
    let _ = write!(out, "</main>\n<script>{SCRIPT}</script>\n</body></html>\n");
    out
}

/// Serializes `records` in the configured format and writes them atomically.
pub async fn write(config: &Config, records: &[VideoRecord], path: &Path) -> anyhow::Result<()> {
    let data = match config.format {
        OutputFormat::Json => to_json(records)?.into_bytes(),
        OutputFormat::Csv => to_csv(records)?,
        OutputFormat::Html => render_html(
            records,
            &GalleryMeta {
                query: &config.query,
                engine: config.engine.name,
                generated: SystemTime::now(),
                remote_images: !config.thumbnails,
            },
        )
        .into_bytes(),
    };
    write_atomic(path, &data).await?;
    tracing::info!(target: "output", "\x1b[36mwrote {} records to {}\x1b[0m", records.len(), path.display());
    Ok(())
}

pub fn open_in_browser(path: &Path) -> std::io::Result<()> {
    let path = path.canonicalize()?;
    webbrowser::open(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::lookup,
        record::{DEFAULT_TITLE_BUDGET, RawFields},
    };

    fn sample() -> Vec<VideoRecord> {
        let mut a = VideoRecord::new(
            "pexels",
            RawFields {
                title: Some("Waves, \"big\" <ones>".into()),
                link: Some("https://www.pexels.com/video/1/".into()),
                img_url: Some("https://images.pexels.com/1.jpg".into()),
                duration: Some("0:15".into()),
                channel_name: Some("Ann".into()),
                channel_link: Some("https://www.pexels.com/@ann".into()),
                ..RawFields::default()
            },
            DEFAULT_TITLE_BUDGET,
        );
        a.attach_thumbnail("thumbnails/0123456789abcdef.jpg".into());
        let b = VideoRecord::new(
            "pexels",
            RawFields {
                title: Some("Second".into()),
                link: Some("https://www.pexels.com/video/2/".into()),
                img_url: Some("https://images.pexels.com/2.jpg".into()),
                ..RawFields::default()
            },
            DEFAULT_TITLE_BUDGET,
        );
        vec![a, b]
    }

    fn meta(remote_images: bool) -> GalleryMeta<'static> {
        GalleryMeta {
            query: "sea & sky",
            engine: "Pexels",
            generated: SystemTime::UNIX_EPOCH,
            remote_images,
        }
    }

    #[test]
    fn gallery_escapes_and_lazy_loads() {
        let html = render_html(&sample(), &meta(false));
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>sea &amp; sky · Pexels</title>"));
        assert!(html.contains("data-src=\"../thumbnails/0123456789abcdef.jpg\""));
        assert!(html.contains("Waves, &quot;big&quot; &lt;ones&gt;"));
        assert!(!html.contains("<ones>"));
        assert!(html.contains("<span class=\"dur\">0:15</span>"));
        assert!(html.contains("2 videos"));
        assert_eq!(html.matches("<article").count(), 2);
        // no local copy and no hotlinking: placeholder
        assert!(!html.contains("https://images.pexels.com/2.jpg"));
        assert!(html.contains("data-src=\"data:image/svg+xml"));
    }

    #[test]
    fn gallery_hotlinks_when_downloads_are_off() {
        let html = render_html(&sample(), &meta(true));
        assert!(html.contains("data-src=\"https://images.pexels.com/2.jpg\""));
    }

    #[test]
    fn csv_keeps_the_record_shape() {
        let records = sample();
        let data = to_csv(&records).unwrap();
        let header = data.split(|&b| b == b'\n').next().unwrap();
        assert_eq!(
            header,
            b"title,link,img_url,duration,channel_name,channel_link,views,source_engine,thumbnail"
        );
        assert_eq!(read_csv(&data).unwrap(), records);
    }

    #[test]
    fn output_file_naming() {
        let mut config = Config::new(lookup("mixkit").unwrap(), "Night City").unwrap();
        config.output_root = PathBuf::from("/tmp/out");
        config.format = OutputFormat::Csv;
        let now = SystemTime::UNIX_EPOCH + core::time::Duration::from_secs(1_700_000_000);
        assert_eq!(
            output_path(&config, now),
            PathBuf::from("/tmp/out/results/mixkit_night-city_1700000000.csv")
        );
    }
}
