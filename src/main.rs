use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;

mod aggregate;
mod catalog;
mod cli;
mod config;
mod extractor;
mod matcher;
mod segment;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use extractor::Extractor;
use semantic::{EmbeddingCache, FastEmbedProvider, FileCache, MemoryCache};

fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(base_path) = std::env::var("SKX_BASE_PATH") {
        return Ok(PathBuf::from(base_path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/skx"))
}

fn load_config(args: &cli::Args) -> anyhow::Result<Config> {
    let path = match (&args.config, std::env::var("SKX_CONFIG")) {
        (Some(path), _) => path.clone(),
        (None, Ok(path)) => PathBuf::from(path),
        (None, Err(_)) => base_path()?.join("config.yaml"),
    };

    let mut config = Config::load_from(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    log::debug!("Using config at {}", path.display());
    log::debug!("Catalog paths resolve against {}", config.base_path().display());
    config.apply_threshold_overrides(&args.thresholds)?;

    Ok(config)
}

fn build_extractor(config: &Config, no_cache: bool) -> anyhow::Result<Extractor> {
    let provider = FastEmbedProvider::new(&config.model, config.models_dir())
        .context("failed to initialize embedding model")?;

    let cache: Box<dyn EmbeddingCache> = if no_cache {
        log::info!("Embedding cache disabled");
        Box::new(MemoryCache::new())
    } else {
        let cache = FileCache::new(config.cache_dir());
        log::info!("Embedding cache at {}", cache.dir().display());
        Box::new(cache)
    };

    let extractor = Extractor::from_config(config, Arc::new(provider), cache.as_ref())?;
    Ok(extractor)
}

fn read_documents(texts: Vec<String>) -> anyhow::Result<Vec<String>> {
    if !texts.is_empty() {
        return Ok(texts);
    }

    let stdin = std::io::stdin();
    let documents = stdin
        .lock()
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read documents from stdin")?;
    Ok(documents)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    match args.command {
        #[cfg(feature = "markdown-docs")]
        cli::Command::MarkdownDocs {} => {
            clap_markdown::print_help_markdown::<cli::Args>();
            Ok(())
        }

        cli::Command::Serve { ref host, port } => {
            let mut config = load_config(&args)?;
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let extractor = build_extractor(&config, args.no_cache)?;
            log::info!("Selection policy: {:?}", extractor.policy());
            web::start_daemon(Arc::new(extractor), config.server.clone())
        }

        cli::Command::Extract {
            ref catalog,
            ids_only,
            ref texts,
        } => {
            let config = load_config(&args)?;
            let extractor = build_extractor(&config, args.no_cache)?;
            if !extractor.has_catalog(catalog) {
                bail!("unknown catalog '{catalog}'");
            }
            let documents = read_documents(texts.clone())?;

            if ids_only {
                let ids = extractor.extract_ids(catalog, &documents)?;
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                let matches = extractor.extract(catalog, &documents)?;
                println!("{}", serde_json::to_string_pretty(&matches)?);
            }
            Ok(())
        }

        cli::Command::Warm {} => {
            let config = load_config(&args)?;
            let extractor = build_extractor(&config, args.no_cache)?;

            for info in extractor.catalogs() {
                println!("{}: {} entries", info.name, info.entries);
            }
            Ok(())
        }
    }
}
