use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, warn};

/// File name searched for at the site root and inside each theme.
pub const CONFIG_FILE_NAME: &str = ".auxmark.toml";

/// Top-level auxmark settings. Sections map to TOML tables; a partial
/// file overrides only the keys it names.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuxmarkConfig {
    pub general: GeneralConfig,
    pub worker: WorkerConfig,
    pub detectors: DetectorsConfig,
}

/// `[general]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log at debug level. The `--verbose` flag and `RUST_LOG` both
    /// override this.
    pub verbose: bool,
    /// Classify and report without touching the filesystem or network.
    pub dry_run: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            dry_run: false,
        }
    }
}

/// `[worker]` table: preprocessing concurrency and origin pacing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Upper bound on concurrently running preprocessing jobs. Jobs for
    /// the same origin never overlap regardless of this value.
    pub max_workers: usize,
    /// Minimum spacing in seconds between successive requests to one
    /// origin, measured from the end of the previous request.
    pub rate_limit_delay: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            rate_limit_delay: 1.0,
        }
    }
}

impl WorkerConfig {
    /// Worker bound clamped to at least one.
    pub fn effective_workers(&self) -> usize {
        self.max_workers.max(1)
    }

    /// Pacing interval; negative or non-finite values collapse to zero.
    pub fn rate_limit_interval(&self) -> Duration {
        seconds_to_duration(self.rate_limit_delay)
    }
}

/// `[detectors]` table, one sub-table per built-in detector.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorsConfig {
    pub image_localizer: ImageLocalizerConfig,
    pub embed_cache: EmbedCacheConfig,
}

/// `[detectors.image_localizer]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageLocalizerConfig {
    pub enabled: bool,
    /// Convert downloaded jpg/jpeg/png/gif images to lossless WebP.
    /// Animated GIFs are kept as-is.
    pub convert_to_webp: bool,
    /// Total download attempts for retryable failures (HTTP 429/5xx,
    /// timeouts, connection errors). Permanent errors never retry.
    pub max_retries: u32,
    /// Base delay in seconds before the first retry.
    pub retry_delay: f64,
    /// Multiplier applied to the delay after each failed attempt.
    pub retry_backoff: f64,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Domains images may be fetched from. Empty blocks everything;
    /// `["*"]` allows everything.
    pub allowlist: Vec<String>,
    /// Treat `allowlist` entries as also matching their subdomains.
    pub allow_subdomains: bool,
    /// Domains never fetched, checked before the allowlist.
    pub blocklist: Vec<String>,
    /// Treat `blocklist` entries as also matching their subdomains.
    pub block_subdomains: bool,
}

impl Default for ImageLocalizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            convert_to_webp: true,
            max_retries: 3,
            retry_delay: 1.0,
            retry_backoff: 2.0,
            timeout: 30,
            allowlist: Vec::new(),
            allow_subdomains: false,
            blocklist: Vec::new(),
            block_subdomains: false,
        }
    }
}

impl ImageLocalizerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_base_delay(&self) -> Duration {
        seconds_to_duration(self.retry_delay)
    }
}

/// `[detectors.embed_cache]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbedCacheConfig {
    pub enabled: bool,
    /// Cached embeds younger than this many days are not refetched.
    pub cache_max_age_days: u64,
    /// Sanitize cached embed HTML: script blocks removed, event-handler
    /// attributes stripped, iframes commented out.
    pub defang: bool,
    /// Embed language. `"auto"` reads `languageCode` from the site's
    /// `hugo.toml`/`config.toml`; any other value is passed through.
    pub lang: String,
    /// Cache directory, relative to the site root unless absolute.
    pub data_dir: PathBuf,
    /// Total fetch attempts for retryable failures.
    pub max_retries: u32,
    pub retry_delay: f64,
    /// Per-request timeout in seconds.
    pub timeout: u64,
}

impl Default for EmbedCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_max_age_days: 30,
            defang: true,
            lang: "auto".to_string(),
            data_dir: PathBuf::from("data/x_embeds"),
            max_retries: 3,
            retry_delay: 1.0,
            timeout: 30,
        }
    }
}

impl EmbedCacheConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_base_delay(&self) -> Duration {
        seconds_to_duration(self.retry_delay)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_days * 24 * 60 * 60)
    }
}

impl AuxmarkConfig {
    /// Load configuration for a site rooted at `root`.
    ///
    /// An explicit path wins over discovery. A missing, unreadable, or
    /// invalid file logs a warning and falls back to defaults; the run
    /// itself never fails over configuration.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_default_file(root),
        };

        let Some(path) = path else {
            debug!("no {CONFIG_FILE_NAME} found, using defaults");
            return Self::default();
        };

        match Self::load_from_file(&path) {
            Ok(config) => {
                debug!(path = %path.display(), "loaded configuration");
                config
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to load configuration, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read config from {}", path.display())
        })?;
        toml::from_str(&contents)
            .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err))
    }

    /// Search order: `<root>/.auxmark.toml`, then `<root>/themes/<name>/`
    /// in lexical theme order, first hit wins.
    pub fn find_default_file(root: &Path) -> Option<PathBuf> {
        let candidate = root.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }

        let entries = fs::read_dir(root.join("themes")).ok()?;
        let mut themes: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        themes.sort();

        themes
            .into_iter()
            .map(|theme| theme.join(CONFIG_FILE_NAME))
            .find(|path| path.exists())
    }
}

fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}
