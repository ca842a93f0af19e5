use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to config.yaml. Defaults to $SKX_CONFIG or <base path>/config.yaml
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override a catalog threshold, e.g. --threshold skills=0.5
    #[clap(long = "threshold", global = true, value_name = "NAME=VALUE")]
    pub thresholds: Vec<String>,

    /// Keep catalog embeddings in memory only
    #[clap(long, global = true, default_value = "false")]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate cli docs in markdown format
    #[cfg(feature = "markdown-docs")]
    #[clap(hide = true)]
    MarkdownDocs {},

    /// Start the extraction HTTP service.
    Serve {
        /// Bind address, overrides server.host
        #[clap(long)]
        host: Option<String>,

        /// Bind port, overrides server.port
        #[clap(short, long)]
        port: Option<u16>,
    },

    /// Extract catalog entries from documents.
    ///
    /// Each TEXT argument is one document. Without arguments every
    /// line of stdin is a document.
    Extract {
        /// Catalog to match against
        #[clap(short, long, default_value = "skills")]
        catalog: String,

        /// Print identifiers only
        #[clap(long, default_value = "false")]
        ids_only: bool,

        #[clap(allow_hyphen_values = true)]
        texts: Vec<String>,
    },

    /// Load every catalog and fill the embedding cache, then exit.
    Warm {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extract() {
        let args = Args::parse_from([
            "skx",
            "extract",
            "--catalog",
            "occupations",
            "--ids-only",
            "--threshold",
            "occupations=0.4",
            "first doc",
            "second doc",
        ]);

        assert_eq!(args.thresholds, vec!["occupations=0.4".to_string()]);
        match args.command {
            Command::Extract {
                catalog,
                ids_only,
                texts,
            } => {
                assert_eq!(catalog, "occupations");
                assert!(ids_only);
                assert_eq!(texts, vec!["first doc", "second doc"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_serve_defaults() {
        let args = Args::parse_from(["skx", "--no-cache", "serve", "-p", "9000"]);
        assert!(args.no_cache);
        assert!(args.config.is_none());
        assert!(matches!(
            args.command,
            Command::Serve {
                host: None,
                port: Some(9000)
            }
        ));
    }
}
