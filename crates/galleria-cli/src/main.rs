use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use galleria_ai::{EmbeddingCache, EmbeddingClient, EmbeddingKind, build_provider, match_gallery};
use galleria_core::{Gallery, SelectorConfig};
use galleria_select::{
    HttpContextExtractor, HttpFinalSelector, HttpGalleryProvider, Orchestrator, fetch_galleries,
};
use tracing::Level;

mod display;

/// Pick one image per character for a conversation scene.
#[derive(Parser)]
#[command(name = "galleria", version, about)]
struct Cli {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, env = "GALLERIA_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    endpoints: Endpoints,

    #[command(subcommand)]
    command: Command,
}

/// Endpoint overrides applied on top of the configuration file.
#[derive(Args)]
struct Endpoints {
    /// Embedding server base URL
    #[arg(long, global = true, env = "GALLERIA_EMBED_URL")]
    embed_url: Option<String>,

    /// Scene extraction service URL
    #[arg(long, global = true, env = "GALLERIA_EXTRACT_URL")]
    extract_url: Option<String>,

    /// Final selection service URL
    #[arg(long, global = true, env = "GALLERIA_SELECT_URL")]
    select_url: Option<String>,

    /// Gallery provider base URL
    #[arg(long, global = true, env = "GALLERIA_GALLERY_URL")]
    gallery_url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full selection pipeline on a conversation
    Select {
        /// File holding the conversation text ("-" reads stdin)
        text: PathBuf,

        /// JSON file holding an array of galleries
        #[arg(long, conflicts_with = "gallery_id")]
        galleries: Option<PathBuf>,

        /// Gallery to fetch from the gallery provider (repeatable)
        #[arg(long = "gallery-id")]
        gallery_id: Vec<String>,

        /// Abandon the request after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Match a name against galleries without calling any service
    Match {
        name: String,

        /// JSON file holding an array of galleries
        #[arg(long)]
        galleries: PathBuf,
    },
    /// Embed text (or an image URL with --image) and print the vector
    Embed {
        content: String,

        #[arg(long)]
        image: bool,
    },
    /// Check the embedding server
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("galleria v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref(), &cli.endpoints)?;

    match cli.command {
        Command::Select {
            text,
            galleries,
            gallery_id,
            deadline_secs,
            json,
        } => {
            cmd_select(
                &config,
                &text,
                galleries.as_deref(),
                &gallery_id,
                deadline_secs,
                json,
            )
            .await
        }
        Command::Match { name, galleries } => cmd_match(&config, &name, &galleries),
        Command::Embed { content, image } => cmd_embed(&config, &content, image).await,
        Command::Health => cmd_health(&config).await,
    }
}

fn load_config(path: Option<&Path>, endpoints: &Endpoints) -> anyhow::Result<SelectorConfig> {
    let mut config = match path {
        Some(p) => SelectorConfig::load(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => SelectorConfig::default(),
    };

    let overrides = [
        (&endpoints.embed_url, &mut config.embedding.endpoint),
        (&endpoints.extract_url, &mut config.collaborators.extraction_endpoint),
        (&endpoints.select_url, &mut config.collaborators.selection_endpoint),
        (&endpoints.gallery_url, &mut config.collaborators.gallery_endpoint),
    ];
    for (value, slot) in overrides {
        if let Some(url) = value {
            *slot = url.clone();
        }
    }
    Ok(config)
}

// ── Commands ──

async fn cmd_select(
    config: &SelectorConfig,
    text_path: &Path,
    galleries_path: Option<&Path>,
    gallery_ids: &[String],
    deadline_secs: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let text = read_text(text_path)?;
    let galleries = match galleries_path {
        Some(path) => read_galleries(path)?,
        None => {
            if gallery_ids.is_empty() {
                bail!("pass --galleries FILE or at least one --gallery-id");
            }
            let endpoint = required(&config.collaborators.gallery_endpoint, "gallery")?;
            let provider = HttpGalleryProvider::new(endpoint, config.embedding.request_timeout())?;
            fetch_galleries(&provider, gallery_ids)
                .await
                .context("fetching galleries")?
        }
    };

    let orchestrator = build_orchestrator(config)?;
    let started = chrono::Utc::now();
    let report = match deadline_secs {
        Some(secs) => {
            orchestrator
                .select_with_deadline(&text, &galleries, Duration::from_secs(secs))
                .await
        }
        None => orchestrator.select(&text, &galleries).await,
    }
    .context("selection failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display::print_report(&report, started);
    }
    Ok(())
}

fn cmd_match(config: &SelectorConfig, name: &str, galleries_path: &Path) -> anyhow::Result<()> {
    let galleries = read_galleries(galleries_path)?;
    let found = match_gallery(name, &galleries, &config.aliases)?;
    display::print_match(name, found.as_ref());
    Ok(())
}

async fn cmd_embed(config: &SelectorConfig, content: &str, image: bool) -> anyhow::Result<()> {
    let kind = if image {
        EmbeddingKind::Image
    } else {
        EmbeddingKind::Text
    };
    let client = build_embeddings(config)?;
    let vector = client
        .get_embedding(kind, content)
        .await
        .with_context(|| format!("embedding via {}", config.embedding.endpoint))?;
    display::print_embedding(kind, content, &vector, client.provider_name());
    Ok(())
}

async fn cmd_health(config: &SelectorConfig) -> anyhow::Result<()> {
    let provider = build_provider(&config.embedding)?;
    let health = provider
        .health()
        .await
        .with_context(|| format!("checking {}", config.embedding.endpoint))?;
    display::print_health(&config.embedding.endpoint, &health);
    Ok(())
}

// ── Composition ──

fn build_embeddings(config: &SelectorConfig) -> anyhow::Result<Arc<EmbeddingClient>> {
    let cache = Arc::new(EmbeddingCache::from_config(&config.cache));
    let provider = build_provider(&config.embedding).context("building embedding provider")?;
    tracing::debug!(
        provider = provider.name(),
        capacity = cache.capacity(),
        "embedding client ready"
    );
    Ok(Arc::new(EmbeddingClient::new(cache, provider)))
}

fn build_orchestrator(config: &SelectorConfig) -> anyhow::Result<Orchestrator> {
    let collaborators = &config.collaborators;
    let extractor = HttpContextExtractor::new(
        required(&collaborators.extraction_endpoint, "extraction")?,
        config.selection.extraction_timeout(),
    )?;
    let selector = HttpFinalSelector::new(
        required(&collaborators.selection_endpoint, "selection")?,
        config.selection.disambiguation_timeout(),
    )?;

    Ok(Orchestrator::new(
        Arc::new(extractor),
        Arc::new(selector),
        build_embeddings(config)?,
    )
    .with_aliases(config.aliases.clone())
    .with_config(config.selection.clone())
    .with_max_concurrency(config.embedding.max_concurrency))
}

fn required<'a>(endpoint: &'a str, service: &str) -> anyhow::Result<&'a str> {
    if endpoint.trim().is_empty() {
        bail!("no {service} endpoint configured");
    }
    Ok(endpoint)
}

// ── Input ──

fn read_text(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading conversation from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_galleries(path: &Path) -> anyhow::Result<Vec<Gallery>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing galleries in {}", path.display()))
}
