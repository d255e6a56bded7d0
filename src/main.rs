use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use feedscout::cache::{MemoryCache, SqliteCache};
use feedscout::config::{CacheBackendKind, Config};
use feedscout::feed::{DiscoveryPolicy, FeedLoader, FeedSummary, HttpFile, LoadSource, LoadedFeed};
use feedscout::registry::{Implementation, Registry, Role};

#[derive(Parser, Debug)]
#[command(name = "feedscout", about = "Find the feed behind a URL", version)]
struct Args {
    /// Page or feed URL (`feed:` URLs are accepted)
    url: String,

    /// Discovery strategies: comma-separated names or a bitmask
    /// (autodiscovery, local-extension, local-body, remote-extension, remote-body, all, none)
    #[arg(long, value_name = "LIST")]
    policy: Option<DiscoveryPolicy>,

    /// Config file (default: ~/.config/feedscout/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Skip the cache for this run
    #[arg(long)]
    no_cache: bool,

    /// List every verified feed instead of the first one
    #[arg(long)]
    all: bool,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    requested_url: String,
    feed_url: String,
    source: Option<LoadSource>,
    summary: Option<FeedSummary>,
}

impl Report {
    fn new(requested_url: &str, feed_url: &str, body: &[u8], source: Option<LoadSource>) -> Self {
        let summary = match FeedSummary::parse(body, feed_url) {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(url = %feed_url, error = %e, "Located feed did not parse");
                None
            }
        };
        Self {
            requested_url: requested_url.to_owned(),
            feed_url: feed_url.to_owned(),
            source,
            summary,
        }
    }

    fn from_loaded(loaded: &LoadedFeed) -> Self {
        Self::new(
            loaded.requested_url.as_str(),
            &loaded.feed_url,
            &loaded.body,
            Some(loaded.source),
        )
    }

    fn print_text(&self) {
        match &self.summary {
            Some(summary) => println!("{}  {}", self.feed_url, summary.title),
            None => println!("{}", self.feed_url),
        }
        if let Some(summary) = &self.summary {
            if let Some(site) = &summary.site_url {
                println!("  site:    {site}");
            }
            println!("  entries: {}", summary.entries);
        }
        if let Some(source) = self.source {
            println!("  source:  {source:?}");
        }
    }
}

async fn build_registry(config: &Config) -> Result<Registry> {
    let registry = Registry::new();

    let file = HttpFile::new(config.http_settings()).context("Failed to build HTTP client")?;
    registry.register(Role::File, Implementation::File(Arc::new(file)));
    registry.register(
        Role::Locator,
        Implementation::Locator(Arc::new(config.locator_builder())),
    );

    match config.cache.backend {
        CacheBackendKind::Memory => registry.register(
            Role::Cache,
            Implementation::Cache(Arc::new(MemoryCache::new(config.cache.capacity))),
        ),
        CacheBackendKind::Sqlite if config.cache.enabled => {
            let cache = SqliteCache::open(&config.cache.location)
                .await
                .with_context(|| {
                    format!("Failed to open cache database '{}'", config.cache.location)
                })?;
            registry.register(Role::Cache, Implementation::Cache(Arc::new(cache)));
        }
        CacheBackendKind::Sqlite => {}
    }

    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match args.config.as_deref() {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => match Config::default_path() {
            Some(path) => Config::load(&path)
                .with_context(|| format!("Failed to load config '{}'", path.display()))?,
            None => Config::default(),
        },
    };
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if args.no_cache {
        config.cache.enabled = false;
    }

    let registry = build_registry(&config).await?;
    let loader = FeedLoader::new(Arc::new(registry), config.load_settings());

    let reports: Vec<Report> = if args.all {
        loader
            .discover_all(&args.url)
            .await
            .with_context(|| format!("Discovery failed for {}", args.url))?
            .iter()
            .map(|feed| {
                Report::new(
                    &args.url,
                    feed.url().as_str(),
                    feed.document().body(),
                    None,
                )
            })
            .collect()
    } else {
        loader
            .load(&args.url)
            .await
            .with_context(|| format!("Failed to load {}", args.url))?
            .as_ref()
            .map(Report::from_loaded)
            .into_iter()
            .collect()
    };

    if args.json {
        let json = if args.all {
            serde_json::to_string_pretty(&reports)?
        } else {
            serde_json::to_string_pretty(&reports.first())?
        };
        println!("{json}");
    } else if reports.is_empty() {
        eprintln!("No feed found for {}", args.url);
    } else {
        for report in &reports {
            report.print_text();
        }
    }

    if reports.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
