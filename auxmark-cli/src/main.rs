//! Scans the enclosing Hugo site checkout and runs the configured
//! detectors over its git-tracked markdown documents.

use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use anyhow::Context;
use auxmark_config::AuxmarkConfig;
use auxmark_core::{
    DetectorRegistry, EngineError, Orchestrator, RunOptions,
    detectors::{EmbedCache, ImageLocalizer},
    discovery,
};
use auxmark_model::RunSummary;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DETECTOR_ALIASES: &[(&str, &str)] =
    &[("image", "image_localizer"), ("embed", "embed_cache")];

const KNOWN_DETECTORS: &[&str] = &["image_localizer", "embed_cache"];

/// Auxiliary Markdown processing tool for Hugo sites.
///
/// Localizes remote images next to their documents (promoting standalone
/// pages to bundles as needed) and pre-caches X/Twitter embeds under
/// `data/`, then rewrites the touched lines in place.
#[derive(Parser, Debug)]
#[command(name = "auxmark", version)]
struct Cli {
    /// Comma-separated detectors to run: image_localizer, embed_cache
    /// (short names: image, embed). Default: every enabled detector.
    #[arg(long, value_delimiter = ',')]
    detector: Vec<String>,

    /// Show what would be done without making changes
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Override the configured preprocessing worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Configuration file (default: discovered .auxmark.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) => println!("{summary}"),
        Err(err) => {
            if is_interrupt(&err) {
                eprintln!("auxmark: interrupted");
                process::exit(130);
            }
            eprintln!("auxmark: {err:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunSummary> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let root = discovery::find_site_root(&cwd).await?;

    // The configuration can lower the default log level, so the
    // subscriber goes up after the load; a load failure is reported once
    // logging works.
    let (config, config_issue) = load_config(&root, cli.config.as_deref());
    init_tracing(cli.verbose || config.general.verbose);
    if let Some((path, err)) = config_issue {
        warn!(
            path = %path.display(),
            error = %err,
            "failed to load configuration, using defaults"
        );
    }
    debug!(root = %root.display(), "using site root");

    let selection = resolve_selection(&cli.detector)?;
    let registry = build_registry(&root, &config, selection.as_deref())?;
    let documents = discovery::markdown_documents(&root).await?;

    let options = RunOptions {
        dry_run: cli.dry_run || config.general.dry_run,
        workers: cli
            .workers
            .map(|workers| workers.max(1))
            .unwrap_or_else(|| config.worker.effective_workers()),
        min_interval: config.worker.rate_limit_interval(),
    };
    info!(
        documents = documents.len(),
        detectors = registry.len(),
        workers = options.workers,
        dry_run = options.dry_run,
        "processing site"
    );

    let orchestrator = Orchestrator::new(registry, options);
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, letting in-flight work settle");
            cancel.cancel();
        }
    });

    Ok(orchestrator.run(documents).await?)
}

fn is_interrupt(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Interrupted)
    )
}

fn load_config(
    root: &Path,
    explicit: Option<&Path>,
) -> (AuxmarkConfig, Option<(PathBuf, anyhow::Error)>) {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => AuxmarkConfig::find_default_file(root),
    };
    let Some(path) = path else {
        return (AuxmarkConfig::default(), None);
    };

    match AuxmarkConfig::load_from_file(&path) {
        Ok(config) => (config, None),
        Err(err) => (AuxmarkConfig::default(), Some((path, err))),
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Expands short aliases and drops unknown names with a warning. A
/// selection that resolves to nothing is a setup error; an empty flag
/// list means "all enabled".
fn resolve_selection(requested: &[String]) -> anyhow::Result<Option<Vec<String>>> {
    if requested.is_empty() {
        return Ok(None);
    }

    let mut selected: Vec<String> = Vec::new();
    for raw in requested {
        let name = raw.trim();
        if name.is_empty() {
            continue;
        }
        let resolved = DETECTOR_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, full)| *full)
            .or_else(|| KNOWN_DETECTORS.iter().copied().find(|known| *known == name));
        match resolved {
            Some(known) => {
                if !selected.iter().any(|existing| existing == known) {
                    selected.push(known.to_string());
                }
            }
            None => warn!(detector = name, "unknown detector, skipping"),
        }
    }

    if selected.is_empty() {
        anyhow::bail!("no valid detectors selected");
    }
    Ok(Some(selected))
}

fn build_registry(
    root: &Path,
    config: &AuxmarkConfig,
    selection: Option<&[String]>,
) -> Result<DetectorRegistry, EngineError> {
    let selected = |name: &str| {
        selection
            .map(|names| names.iter().any(|chosen| chosen == name))
            .unwrap_or(true)
    };

    let mut registry = DetectorRegistry::new();
    if config.detectors.image_localizer.enabled && selected("image_localizer") {
        registry.register(Arc::new(ImageLocalizer::new(
            config.detectors.image_localizer.clone(),
        )))?;
    }
    if config.detectors.embed_cache.enabled && selected("embed_cache") {
        registry.register(Arc::new(EmbedCache::new(
            root,
            config.detectors.embed_cache.clone(),
        )))?;
    }
    Ok(registry)
}
