//! Caches X/Twitter embeds referenced by Hugo `{{< x … >}}` shortcodes.
//!
//! The shortcode reads `data/x_embeds/{id}.json` and `{id}.html` at site
//! build time, so this detector only needs the preprocess phase: fetch
//! the oEmbed payload once, sanitize the HTML, and write both files.
//! Lines are never rewritten.

use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use auxmark_config::EmbedCacheConfig;
use auxmark_model::{Action, Job};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::contract::Detector;
use crate::detectors::fetch::{self, RetryPolicy};

const OEMBED_ENDPOINT: &str = "https://publish.x.com/oembed";

/// Backoff multiplier for oEmbed fetches; not configurable.
const OEMBED_RETRY_BACKOFF: f64 = 2.0;

static X_SHORTCODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{<\s*x\s+user="([^"]+)"\s+id="([^"]+)"\s*>\}\}"#)
        .expect("x shortcode regex should compile")
});

static STATUS_IN_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:x\.com|twitter\.com)/\w+/status/(\d+)")
        .expect("status url regex should compile")
});

static STATUS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"status/(\d+)").expect("status path regex should compile"));

static LANGUAGE_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)languageCode\s*=\s*["']([^"']+)["']"#)
        .expect("language code regex should compile")
});

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<script\b[^>]*/?>")
        .expect("script block regex should compile")
});

static EVENT_HANDLER_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s+on\w+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("event handler regex should compile")
});

static IFRAME_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<iframe\b.*?</iframe>|<iframe\b[^>]*/?>")
        .expect("iframe regex should compile")
});

static EMBED_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<embed\b[^>]*/?>").expect("embed tag regex should compile"));

/// Fetches and caches oEmbed payloads for X/Twitter shortcodes.
#[derive(Debug)]
pub struct EmbedCache {
    config: EmbedCacheConfig,
    site_root: PathBuf,
    data_dir: PathBuf,
    client: reqwest::Client,
}

impl EmbedCache {
    pub fn new(site_root: &Path, config: EmbedCacheConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .expect("Failed to create HTTP client");

        let data_dir = if config.data_dir.is_absolute() {
            config.data_dir.clone()
        } else {
            site_root.join(&config.data_dir)
        };

        Self {
            config,
            site_root: site_root.to_path_buf(),
            data_dir,
            client,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.config.max_retries,
            base_delay: self.config.retry_base_delay(),
            backoff: OEMBED_RETRY_BACKOFF,
        }
    }

    async fn cache_embed(&self, tweet_id: &str) -> bool {
        let json_path = self.data_dir.join(format!("{tweet_id}.json"));
        if self.cache_is_fresh(&json_path) {
            debug!(tweet_id, "embed cache is fresh, skipping fetch");
            return true;
        }

        let Some(payload) = self.fetch_oembed(tweet_id).await else {
            return false;
        };

        match self.save_embed(tweet_id, &payload) {
            Ok(()) => {
                debug!(tweet_id, dir = %self.data_dir.display(), "cached embed");
                true
            }
            Err(err) => {
                warn!(tweet_id, error = %err, "failed to write embed cache");
                false
            }
        }
    }

    fn cache_is_fresh(&self, json_path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(json_path) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        match modified.elapsed() {
            Ok(age) => age < self.config.cache_max_age(),
            // A timestamp in the future counts as fresh.
            Err(_) => true,
        }
    }

    async fn fetch_oembed(&self, tweet_id: &str) -> Option<Value> {
        let mut params: Vec<(&str, String)> =
            vec![("url", format!("https://x.com/i/status/{tweet_id}"))];
        if self.config.defang {
            // No point receiving the widget script we would strip anyway.
            params.push(("omit_script", "true".to_string()));
        }
        if let Some(lang) = self.resolve_lang() {
            params.push(("lang", lang));
        }

        let oembed_url = match Url::parse_with_params(OEMBED_ENDPOINT, &params) {
            Ok(url) => url,
            Err(err) => {
                warn!(tweet_id, error = %err, "failed to build oEmbed URL");
                return None;
            }
        };

        let body =
            fetch::fetch_with_retry(&self.client, oembed_url.as_str(), &self.retry_policy())
                .await?;

        match serde_json::from_slice(&body) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(tweet_id, error = %err, "oEmbed response is not valid JSON");
                None
            }
        }
    }

    fn resolve_lang(&self) -> Option<String> {
        let configured = self.config.lang.trim();
        if configured.is_empty() {
            return None;
        }
        if configured != "auto" {
            return Some(configured.to_string());
        }
        detect_site_language(&self.site_root)
    }

    fn save_embed(&self, tweet_id: &str, payload: &Value) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;

        let pretty = serde_json::to_string_pretty(payload)?;
        fs::write(self.data_dir.join(format!("{tweet_id}.json")), pretty)?;

        if let Some(html) = payload.get("html").and_then(Value::as_str) {
            let content = if self.config.defang {
                sanitize_embed_html(html)
            } else {
                html.to_string()
            };
            fs::write(self.data_dir.join(format!("{tweet_id}.html")), content)?;
        }

        Ok(())
    }
}

#[async_trait]
impl Detector for EmbedCache {
    fn name(&self) -> &'static str {
        "embed_cache"
    }

    fn prefilter(&self) -> &Regex {
        &X_SHORTCODE
    }

    fn probe(&self, _document: &Path, _line_index: usize, line: &str) -> (Action, Value) {
        let Some(captures) = X_SHORTCODE.captures(line) else {
            return (Action::Ignore, Value::Null);
        };

        let user = &captures[1];
        let Some(tweet_id) = extract_tweet_id(&captures[2]) else {
            return (Action::Ignore, Value::Null);
        };

        (
            Action::TagPreprocessOnly,
            json!({ "user": user, "tweet_id": tweet_id }),
        )
    }

    async fn preprocess(&self, job: &Job) -> bool {
        let Some(tweet_id) = job.metadata.get("tweet_id").and_then(Value::as_str) else {
            warn!(
                document = %job.document.display(),
                line = job.line_index + 1,
                "embed job carries no tweet id"
            );
            return false;
        };
        self.cache_embed(tweet_id).await
    }
}

/// Pulls a numeric tweet id out of a raw id or a status URL.
pub fn extract_tweet_id(input: &str) -> Option<String> {
    if !input.is_empty() && input.bytes().all(|byte| byte.is_ascii_digit()) {
        return Some(input.to_string());
    }

    for pattern in [&*STATUS_IN_URL, &*STATUS_PATH] {
        if let Some(captures) = pattern.captures(input) {
            return Some(captures[1].to_string());
        }
    }

    None
}

/// Reads `languageCode` from the site's `hugo.toml` or `config.toml` and
/// maps it onto the embed widget's language tags.
fn detect_site_language(site_root: &Path) -> Option<String> {
    for name in ["hugo.toml", "config.toml"] {
        let Ok(contents) = fs::read_to_string(site_root.join(name)) else {
            continue;
        };
        if let Some(captures) = LANGUAGE_CODE.captures(&contents) {
            let hugo_code = captures[1].to_ascii_lowercase();
            if let Some(lang) = embed_language_for(&hugo_code) {
                return Some(lang.to_string());
            }
        }
    }
    None
}

fn embed_language_for(hugo_code: &str) -> Option<&'static str> {
    const SUPPORTED: &[&str] = &[
        "ar", "bn", "cs", "da", "de", "el", "en", "en-gb", "es", "fa", "fi", "fil",
        "fr", "he", "hi", "hu", "id", "it", "ja", "ko", "msa", "nl", "no", "pl",
        "pt", "ro", "ru", "sv", "th", "tr", "uk", "ur", "vi", "zh-cn", "zh-tw",
    ];

    match hugo_code {
        "en-us" => Some("en"),
        "ja-jp" => Some("ja"),
        "ko-kr" => Some("ko"),
        _ => SUPPORTED.iter().find(|&&code| code == hugo_code).copied(),
    }
}

/// Strips script blocks and event-handler attributes, and comments out
/// frames. The oEmbed payload is a narrow, known shape (a blockquote
/// plus the widget script), which regex passes cover fully.
fn sanitize_embed_html(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(html, "");
    let without_handlers = EVENT_HANDLER_ATTR.replace_all(&without_scripts, "");
    let without_iframes =
        IFRAME_BLOCK.replace_all(&without_handlers, "<!-- iframe removed -->");
    EMBED_TAG
        .replace_all(&without_iframes, "<!-- embed removed -->")
        .into_owned()
}
