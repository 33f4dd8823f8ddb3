//! Downloads remote Markdown images next to their document and rewrites
//! the references to point at the local copies.
//!
//! A document that is not yet a bundle index cannot host sibling files,
//! so the probe requests expansion first; the re-scan after promotion
//! tags the same lines under the bundle identity. Static jpg, jpeg, png
//! and gif downloads are converted to lossless WebP; animated GIFs and
//! every other format are kept byte-for-byte.

use std::{
    collections::HashMap,
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use auxmark_config::ImageLocalizerConfig;
use auxmark_model::{Action, Job};
use image::{AnimationDecoder, codecs::gif::GifDecoder, codecs::webp::WebPEncoder};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::contract::Detector;
use crate::detectors::fetch::{self, RetryPolicy};

static IMAGE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[(.*?)\]\((.*?)\)").expect("image reference regex should compile")
});

/// Localizes `![alt](https://…)` references.
#[derive(Debug)]
pub struct ImageLocalizer {
    config: ImageLocalizerConfig,
    client: reqwest::Client,
    /// Successful downloads recorded by `preprocess` and consumed by
    /// `postprocess`: remote URL to local filename, per tagged line.
    localized: Mutex<HashMap<(PathBuf, usize), HashMap<String, String>>>,
}

impl ImageLocalizer {
    pub fn new(config: ImageLocalizerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            client,
            localized: Mutex::new(HashMap::new()),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.config.max_retries,
            base_delay: self.config.retry_base_delay(),
            backoff: self.config.retry_backoff,
        }
    }

    /// Applies the blocklist, then the allowlist, to the URL's host.
    /// Filtered references are left remote without any report.
    fn domain_allows(&self, url: &str) -> bool {
        let host = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase));
        let Some(host) = host else {
            return false;
        };

        let blocked = self
            .config
            .blocklist
            .iter()
            .any(|entry| domain_matches(&host, entry, self.config.block_subdomains));
        if blocked {
            debug!(url, "image domain is blocklisted, leaving reference remote");
            return false;
        }

        if self.config.allowlist.iter().any(|entry| entry == "*") {
            return true;
        }
        let allowed = self
            .config
            .allowlist
            .iter()
            .any(|entry| domain_matches(&host, entry, self.config.allow_subdomains));
        if !allowed {
            debug!(url, "image domain is not allowlisted, leaving reference remote");
        }
        allowed
    }

    /// Downloads one image into `target_dir` and returns the local
    /// filename, or `None` on failure.
    async fn localize(&self, url: &str, target_dir: &Path) -> Option<String> {
        let body = fetch::fetch_with_retry(&self.client, url, &self.retry_policy()).await?;

        let original_filename = filename_from_url(url);
        let extension = Path::new(&original_filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let gif_source = extension == "gif";
        let convert = self.config.convert_to_webp
            && matches!(extension.as_str(), "jpg" | "jpeg" | "png" | "gif");

        let preferred = if convert {
            let stem = Path::new(&original_filename)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| original_filename.clone());
            format!("{stem}.webp")
        } else {
            original_filename
        };
        let output_path = conflict_free_path(target_dir, &preferred);

        let task = tokio::task::spawn_blocking(move || {
            write_local_file(body, output_path, convert, gif_source)
        });
        let (actual_path, outcome) = match task.await {
            Ok(written) => written,
            Err(err) => {
                warn!(url, error = %err, "image save task failed");
                return None;
            }
        };

        match outcome {
            Ok(()) => {
                debug!(url, local = %actual_path.display(), "localized image");
                actual_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            }
            Err(err) => {
                warn!(
                    url,
                    path = %actual_path.display(),
                    error = %err,
                    "failed to save image"
                );
                if actual_path.exists()
                    && let Err(cleanup) = fs::remove_file(&actual_path)
                {
                    warn!(
                        path = %actual_path.display(),
                        error = %cleanup,
                        "failed to remove partial download"
                    );
                }
                None
            }
        }
    }

    #[cfg(test)]
    fn note_localized(&self, document: &Path, line_index: usize, url: &str, local: &str) {
        let Ok(mut store) = self.localized.lock() else {
            return;
        };
        store
            .entry((document.to_path_buf(), line_index))
            .or_default()
            .insert(url.to_string(), local.to_string());
    }
}

#[async_trait]
impl Detector for ImageLocalizer {
    fn name(&self) -> &'static str {
        "image_localizer"
    }

    fn prefilter(&self) -> &Regex {
        &IMAGE_REFERENCE
    }

    fn probe(&self, document: &Path, _line_index: usize, line: &str) -> (Action, Value) {
        let mut images = Vec::new();
        for captures in IMAGE_REFERENCE.captures_iter(line) {
            let alt = &captures[1];
            let target = captures[2].trim();
            let (url, title) = split_image_target(target);

            if !url.starts_with("http://") && !url.starts_with("https://") {
                continue;
            }
            if !self.domain_allows(url) {
                continue;
            }

            images.push(json!({
                "url": url,
                "alt": alt,
                "title": title,
            }));
        }

        if images.is_empty() {
            return (Action::Ignore, Value::Null);
        }

        let metadata = json!({ "images": images });
        let is_bundle_index =
            document.file_stem().and_then(|stem| stem.to_str()) == Some("index");
        if is_bundle_index {
            (Action::TagPreprocessAndPostprocess, metadata)
        } else {
            (Action::Expand, metadata)
        }
    }

    async fn preprocess(&self, job: &Job) -> bool {
        let Some(images) = job.metadata.get("images").and_then(Value::as_array) else {
            return true;
        };
        let target_dir = job.document.parent().unwrap_or_else(|| Path::new("."));

        let mut localized = HashMap::new();
        let mut all_succeeded = true;
        for image in images {
            let Some(url) = image.get("url").and_then(Value::as_str) else {
                continue;
            };
            match self.localize(url, target_dir).await {
                Some(filename) => {
                    localized.insert(url.to_string(), filename);
                }
                None => {
                    all_succeeded = false;
                    warn!(
                        url,
                        document = %job.document.display(),
                        line = job.line_index + 1,
                        "failed to localize image"
                    );
                }
            }
        }

        if !localized.is_empty()
            && let Ok(mut store) = self.localized.lock()
        {
            store
                .entry((job.document.clone(), job.line_index))
                .or_default()
                .extend(localized);
        }

        all_succeeded
    }

    fn postprocess(
        &self,
        document: &Path,
        line_index: usize,
        line: &str,
        metadata: &Value,
    ) -> String {
        let Some(images) = metadata.get("images").and_then(Value::as_array) else {
            return line.to_string();
        };
        let Ok(store) = self.localized.lock() else {
            return line.to_string();
        };
        let Some(replacements) = store.get(&(document.to_path_buf(), line_index)) else {
            return line.to_string();
        };

        let mut result = line.to_string();
        for image in images {
            let Some(url) = image.get("url").and_then(Value::as_str) else {
                continue;
            };
            let Some(local) = replacements.get(url) else {
                continue;
            };
            let (old_ref, new_ref) = match image.get("title").and_then(Value::as_str) {
                Some(title) => (
                    format!("]({url} {title})"),
                    format!("]({local} {title})"),
                ),
                None => (format!("]({url})"), format!("]({local})")),
            };
            result = result.replace(&old_ref, &new_ref);
        }
        result
    }
}

/// Splits `url "title"` into the URL and the verbatim title text,
/// quotes included. A target without a quoted title comes back whole.
fn split_image_target(target: &str) -> (&str, Option<&str>) {
    if target.contains(" \"") || target.contains(" '") {
        let mut parts = target.splitn(2, char::is_whitespace);
        if let (Some(url), Some(rest)) = (parts.next(), parts.next()) {
            let title = rest.trim_start();
            if !title.is_empty() {
                return (url, Some(title));
            }
        }
    }
    (target, None)
}

fn domain_matches(host: &str, entry: &str, include_subdomains: bool) -> bool {
    let entry = entry.to_ascii_lowercase();
    host == entry || (include_subdomains && host.ends_with(&format!(".{entry}")))
}

/// Last path segment of the URL, or `image.jpg` when the path has none.
fn filename_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            Path::new(parsed.path())
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "image.jpg".to_string())
}

/// First free path for `preferred` in `target_dir`, counting up through
/// `name_2.ext`, `name_3.ext`, … on conflicts.
fn conflict_free_path(target_dir: &Path, preferred: &str) -> PathBuf {
    let candidate = target_dir.join(preferred);
    if !candidate.exists() {
        return candidate;
    }

    let stem = Path::new(preferred)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| preferred.to_string());
    let extension = Path::new(preferred)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 2u32;
    loop {
        let candidate = target_dir.join(format!("{stem}_{counter}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Writes the downloaded bytes, converting to lossless WebP when asked.
/// Returns the path actually written; an animated GIF steps back to a
/// `.gif` sibling of the planned WebP path. Runs on a blocking thread,
/// decoding and encoding are CPU-bound.
fn write_local_file(
    body: Vec<u8>,
    output_path: PathBuf,
    convert: bool,
    gif_source: bool,
) -> (PathBuf, std::io::Result<()>) {
    if !convert {
        let outcome = fs::write(&output_path, &body);
        return (output_path, outcome);
    }

    if gif_source && is_animated_gif(&body) {
        // WebP re-encoding keeps only the first frame; keep the original.
        let animated_path = output_path.with_extension("gif");
        let outcome = fs::write(&animated_path, &body);
        return (animated_path, outcome);
    }

    let outcome = encode_lossless_webp(&body, &output_path);
    (output_path, outcome)
}

fn is_animated_gif(body: &[u8]) -> bool {
    match GifDecoder::new(Cursor::new(body)) {
        Ok(decoder) => {
            decoder
                .into_frames()
                .take(2)
                .filter_map(|frame| frame.ok())
                .count()
                > 1
        }
        Err(_) => false,
    }
}

fn encode_lossless_webp(body: &[u8], output_path: &Path) -> std::io::Result<()> {
    let decoded = image::load_from_memory(body).map_err(std::io::Error::other)?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let file = fs::File::create(output_path)?;
    WebPEncoder::new_lossless(file)
        .encode(rgba.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .map_err(std::io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Frame, ImageEncoder, Rgba, RgbaImage, codecs::gif::GifEncoder, codecs::png::PngEncoder};
    use tempfile::TempDir;

    fn allow_all() -> ImageLocalizerConfig {
        ImageLocalizerConfig {
            allowlist: vec!["*".to_string()],
            ..ImageLocalizerConfig::default()
        }
    }

    fn probe_line(detector: &ImageLocalizer, document: &str, line: &str) -> (Action, Value) {
        detector.probe(Path::new(document), 0, line)
    }

    fn png_bytes() -> Vec<u8> {
        // 2x1 RGBA image: one red pixel, one green pixel.
        let rgba: Vec<u8> = vec![255, 0, 0, 255, 0, 255, 0, 255];
        let mut encoded = Vec::new();
        PngEncoder::new(&mut encoded)
            .write_image(&rgba, 2, 1, image::ExtendedColorType::Rgba8)
            .expect("encode png");
        encoded
    }

    fn gif_bytes(frame_count: usize) -> Vec<u8> {
        let mut encoded = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut encoded);
            for index in 0..frame_count {
                let shade = (index * 40) as u8;
                let buffer = RgbaImage::from_pixel(4, 4, Rgba([shade, 0, 0, 255]));
                encoder.encode_frame(Frame::new(buffer)).expect("encode frame");
            }
        }
        encoded
    }

    #[test]
    fn probe_captures_url_alt_and_quoted_title() {
        let detector = ImageLocalizer::new(allow_all());
        let (action, metadata) = probe_line(
            &detector,
            "content/post.md",
            r#"![a cat](https://img.example.com/cat.jpg "portrait")"#,
        );

        assert_eq!(action, Action::Expand);
        let images = metadata["images"].as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["url"], "https://img.example.com/cat.jpg");
        assert_eq!(images[0]["alt"], "a cat");
        assert_eq!(images[0]["title"], "\"portrait\"");
    }

    #[test]
    fn probe_finds_every_image_on_the_line_and_skips_relative_ones() {
        let detector = ImageLocalizer::new(allow_all());
        let line = "![a](https://one.example/a.png) ![b](./local.png) ![c](http://two.example/c.gif)";
        let (_, metadata) = probe_line(&detector, "content/post.md", line);

        let images = metadata["images"].as_array().unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0]["url"], "https://one.example/a.png");
        assert_eq!(images[1]["url"], "http://two.example/c.gif");
    }

    #[test]
    fn single_quoted_titles_are_kept_verbatim() {
        let (url, title) = split_image_target("https://e.example/x.png 'my title'");
        assert_eq!(url, "https://e.example/x.png");
        assert_eq!(title, Some("'my title'"));

        let (url, title) = split_image_target("https://e.example/x.png");
        assert_eq!(url, "https://e.example/x.png");
        assert_eq!(title, None);
    }

    #[test]
    fn bundle_index_documents_are_tagged_not_expanded() {
        let detector = ImageLocalizer::new(allow_all());
        let line = "![x](https://img.example.com/x.png)";

        let (action, _) = probe_line(&detector, "content/post/index.md", line);
        assert_eq!(action, Action::TagPreprocessAndPostprocess);

        let (action, _) = probe_line(&detector, "content/post.md", line);
        assert_eq!(action, Action::Expand);
    }

    #[test]
    fn lines_without_external_images_are_ignored() {
        let detector = ImageLocalizer::new(allow_all());
        let (action, _) = probe_line(&detector, "content/post.md", "plain prose");
        assert_eq!(action, Action::Ignore);

        let (action, _) =
            probe_line(&detector, "content/post.md", "![local](images/x.png)");
        assert_eq!(action, Action::Ignore);
    }

    #[test]
    fn empty_allowlist_blocks_every_domain() {
        let detector = ImageLocalizer::new(ImageLocalizerConfig::default());
        let (action, _) = probe_line(
            &detector,
            "content/post.md",
            "![x](https://img.example.com/x.png)",
        );
        assert_eq!(action, Action::Ignore);
    }

    #[test]
    fn blocklist_wins_over_a_wildcard_allowlist() {
        let config = ImageLocalizerConfig {
            allowlist: vec!["*".to_string()],
            blocklist: vec!["bad.example".to_string()],
            ..ImageLocalizerConfig::default()
        };
        let detector = ImageLocalizer::new(config);

        let line = "![x](https://bad.example/x.png) ![y](https://good.example/y.png)";
        let (_, metadata) = probe_line(&detector, "content/post.md", line);
        let images = metadata["images"].as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["url"], "https://good.example/y.png");
    }

    #[test]
    fn subdomain_matching_is_opt_in() {
        let exact = ImageLocalizer::new(ImageLocalizerConfig {
            allowlist: vec!["example.com".to_string()],
            ..ImageLocalizerConfig::default()
        });
        assert!(!exact.domain_allows("https://img.example.com/x.png"));
        assert!(exact.domain_allows("https://example.com/x.png"));

        let with_subdomains = ImageLocalizer::new(ImageLocalizerConfig {
            allowlist: vec!["example.com".to_string()],
            allow_subdomains: true,
            ..ImageLocalizerConfig::default()
        });
        assert!(with_subdomains.domain_allows("https://img.example.com/x.png"));
        assert!(!with_subdomains.domain_allows("https://notexample.com/x.png"));
    }

    #[test]
    fn filenames_come_from_the_url_path() {
        assert_eq!(
            filename_from_url("https://e.example/img/cat.png?width=200"),
            "cat.png"
        );
        assert_eq!(filename_from_url("https://e.example/"), "image.jpg");
        assert_eq!(filename_from_url("https://e.example"), "image.jpg");
    }

    #[test]
    fn name_conflicts_count_upward() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cat.webp"), b"x").unwrap();
        fs::write(dir.path().join("cat_2.webp"), b"x").unwrap();

        assert_eq!(
            conflict_free_path(dir.path(), "cat.webp"),
            dir.path().join("cat_3.webp")
        );
        assert_eq!(
            conflict_free_path(dir.path(), "dog.webp"),
            dir.path().join("dog.webp")
        );
    }

    #[test]
    fn static_images_convert_to_lossless_webp() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("cat.webp");

        let (actual, outcome) = write_local_file(png_bytes(), output.clone(), true, false);
        outcome.unwrap();
        assert_eq!(actual, output);

        let written = fs::read(&output).unwrap();
        assert_eq!(&written[0..4], b"RIFF");
        assert_eq!(&written[8..12], b"WEBP");
    }

    #[test]
    fn animated_gifs_keep_their_original_bytes() {
        let animated = gif_bytes(3);
        assert!(is_animated_gif(&animated));
        assert!(!is_animated_gif(&gif_bytes(1)));

        let dir = TempDir::new().unwrap();
        let planned = dir.path().join("loop.webp");
        let (actual, outcome) =
            write_local_file(animated.clone(), planned, true, true);
        outcome.unwrap();

        assert_eq!(actual, dir.path().join("loop.gif"));
        assert_eq!(fs::read(&actual).unwrap(), animated);
    }

    #[test]
    fn unconverted_formats_are_saved_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let body = b"<svg>not really an image</svg>".to_vec();
        let output = dir.path().join("figure.svg");

        let (actual, outcome) = write_local_file(body.clone(), output.clone(), false, false);
        outcome.unwrap();
        assert_eq!(actual, output);
        assert_eq!(fs::read(&output).unwrap(), body);
    }

    #[test]
    fn postprocess_rewrites_only_successful_downloads() {
        let detector = ImageLocalizer::new(allow_all());
        let document = Path::new("content/post/index.md");
        let line = "![a](https://e.example/a.png) and ![b](https://e.example/b.png)";

        let (_, metadata) = detector.probe(document, 4, line);
        detector.note_localized(document, 4, "https://e.example/a.png", "a.webp");

        let rewritten = detector.postprocess(document, 4, line, &metadata);
        assert_eq!(
            rewritten,
            "![a](a.webp) and ![b](https://e.example/b.png)"
        );
    }

    #[test]
    fn postprocess_preserves_titles_and_untouched_lines() {
        let detector = ImageLocalizer::new(allow_all());
        let document = Path::new("content/post/index.md");
        let line = r#"![cat](https://e.example/cat.jpg "portrait")"#;

        let (_, metadata) = detector.probe(document, 0, line);

        // No recorded download: the line must come back unchanged.
        assert_eq!(detector.postprocess(document, 0, line, &metadata), line);

        detector.note_localized(document, 0, "https://e.example/cat.jpg", "cat.webp");
        assert_eq!(
            detector.postprocess(document, 0, line, &metadata),
            r#"![cat](cat.webp "portrait")"#
        );
    }
}
