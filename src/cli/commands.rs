//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - fetch: load URLs and print the results
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// resload - Load resources concurrently with grouped completion
#[derive(Parser, Debug)]
#[command(name = "resload")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch URLs and report each result in argument order
    ///
    /// Plain URLs load as one batch; with `--image` each URL is its own image batch.
    Fetch {
        /// URLs to load, reported in this order
        #[arg(required = true)]
        urls: Vec<String>,

        /// Load as images and report their dimensions
        #[arg(short, long)]
        image: bool,

        /// Maximum concurrent loads (overrides config)
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::parse_from(["resload", "fetch", "http://a", "http://b", "--image", "-n", "2"]);
        match cli.command {
            Commands::Fetch {
                urls,
                image,
                concurrency,
            } => {
                assert_eq!(urls, vec!["http://a", "http://b"]);
                assert!(image);
                assert_eq!(concurrency, Some(2));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_fetch_help_describes_batching() {
        use clap::CommandFactory;
        let command = Cli::command();
        let fetch = command.find_subcommand("fetch").unwrap();
        let about = fetch.get_about().map(|a| a.to_string()).unwrap_or_default();
        assert!(about.contains("argument order"));
        assert!(!about.contains("as one batch"));
    }

    #[test]
    fn test_fetch_requires_url() {
        assert!(Cli::try_parse_from(["resload", "fetch"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["resload", "config", "--verbose", "--config", "/tmp/r.yml"]);
        assert!(cli.is_verbose());
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/r.yml")));
        assert!(matches!(cli.command, Commands::Config));
    }
}
