use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use imagedb::{
    CatalogStore, EmbeddingProvider, FeatureEmbedder, FeatureEmbedderConfig, ImageSearchService,
    ImageSource, IndexConfig, JsonCatalogStore, SearchRequest, DEFAULT_LIMIT, DEFAULT_WEIGHT_TEXT,
};

#[derive(Debug, Parser)]
#[command(name = "imagedb")]
#[command(version = imagedb::VERSION)]
#[command(about = "Image catalog search and clustering tools", long_about = None)]
struct Cli {
    /// Root holding `index/`, `static/` and `database/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// JSON config file; flags below override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    dim: Option<usize>,
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Run without an embedding provider.
    #[arg(long, global = true)]
    no_embedder: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Search {
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long)]
        reference: Option<u64>,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
        #[arg(long, default_value_t = DEFAULT_WEIGHT_TEXT)]
        weight_text: f32,
    },
    /// Rebuild the index from a directory (default: the upload directory).
    Rebuild {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Import {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Copy one file into the upload directory and index it.
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    Clusters {
        #[arg(long, default_value_t = 5)]
        k: usize,
    },
    Status,
    Remove {
        #[arg(long)]
        id: u64,
    },
    Favorites,
    Favorite {
        #[arg(long)]
        id: u64,
    },
    Records,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let store: Arc<dyn CatalogStore> = Arc::new(
        JsonCatalogStore::open(cli.root.join("database").join("images.json"))
            .context("open record store")?,
    );
    let provider: Option<Arc<dyn EmbeddingProvider>> = if cli.no_embedder {
        None
    } else {
        Some(Arc::new(FeatureEmbedder::new(FeatureEmbedderConfig {
            dim: cfg.dim,
            ..Default::default()
        })))
    };
    let service = ImageSearchService::open(cfg, provider, Some(store.clone()))?;

    match cli.cmd {
        Command::Search {
            query,
            reference,
            limit,
            weight_text,
        } => {
            let req = SearchRequest {
                query,
                reference_id: reference,
                limit,
                weight_text,
            };
            print_json(&service.search(&req))
        }
        Command::Rebuild { dir } => {
            let dir = dir.unwrap_or_else(|| service.config().upload_dir.clone());
            let indexed = service.rebuild(&dir);
            print_json(&serde_json::json!({ "indexed": indexed }))
        }
        Command::Import { dir } => {
            let (processed, failed) = service.batch_import(&dir);
            print_json(&serde_json::json!({ "processed": processed, "failed": failed }))
        }
        Command::Ingest { file } => ingest(&service, &file),
        Command::Clusters { k } => print_json(&service.clusters(k)),
        Command::Status => print_json(&service.status()),
        Command::Remove { id } => {
            let removed = service.remove(id)?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Command::Favorites => print_json(&store.list_favorites()?),
        Command::Favorite { id } => {
            let favorite = store.toggle_favorite(id)?;
            print_json(&serde_json::json!({ "id": id, "favorite": favorite }))
        }
        Command::Records => print_json(&store.list_all()?),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<IndexConfig> {
    let mut cfg = match &cli.config {
        Some(path) => IndexConfig::load_json(path)?,
        None => IndexConfig::with_root(&cli.root),
    };
    if let Some(dim) = cli.dim {
        cfg.dim = dim;
    }
    if let Some(workers) = cli.workers {
        cfg.workers = workers;
    }
    Ok(cfg)
}

fn ingest(service: &ImageSearchService, file: &Path) -> anyhow::Result<()> {
    let ingested = service
        .ingest_upload(ImageSource::Path(file.to_path_buf()))
        .with_context(|| format!("ingest {}", file.display()))?;
    print_json(&serde_json::json!({
        "id": ingested.id,
        "path": ingested.path,
        "record_id": ingested.record_id,
        "width": ingested.metadata.width,
        "height": ingested.metadata.height,
    }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("encode output")?;
    println!("{out}");
    Ok(())
}
