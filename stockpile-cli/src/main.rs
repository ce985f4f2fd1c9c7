//! Stockpile CLI - download and manage locally stored resources.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use commands::mv::TargetTier;

#[derive(Parser)]
#[command(name = "stockpile")]
#[command(version = stockpile::VERSION)]
#[command(about = "Download resources into tiered local storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs and wait for them to finish
    Fetch {
        /// URLs to download (http, https or file)
        #[arg(required = true)]
        urls: Vec<String>,

        /// Spool to disk while downloading (for big files)
        #[arg(long)]
        large: bool,

        /// Scheduling priority; higher runs sooner
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        priority: i32,
    },

    /// List stored resources
    List {
        /// Only show resources whose id contains this text
        filter: Option<String>,
    },

    /// Delete stored resources
    Rm {
        /// Resource ids to delete
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,

        /// Delete every writable resource
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },

    /// Move stored resources to another tier
    Mv {
        /// Resource ids to move
        #[arg(required = true)]
        ids: Vec<String>,

        /// Destination tier
        #[arg(long, value_enum)]
        to: TargetTier,
    },

    /// Decode stored images and print their size
    View {
        /// Resource ids to decode
        #[arg(required = true)]
        ids: Vec<String>,

        /// Shrink to at most this width (0 = unbounded)
        #[arg(long, default_value = "0")]
        max_width: u32,

        /// Shrink to at most this height (0 = unbounded)
        #[arg(long, default_value = "0")]
        max_height: u32,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fetch {
            urls,
            large,
            priority,
        } => commands::fetch::run(FetchArgs {
            urls,
            large,
            priority,
        }),
        Commands::List { filter } => commands::list::run(filter),
        Commands::Rm { ids, all } => commands::rm::run(ids, all),
        Commands::Mv { ids, to } => commands::mv::run(ids, to),
        Commands::View {
            ids,
            max_width,
            max_height,
        } => commands::view::run(ids, max_width, max_height),
        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "stockpile",
            "fetch",
            "https://example.com/a.bin",
            "--large",
            "--priority",
            "-2",
        ])
        .unwrap();
        match cli.command {
            Commands::Fetch {
                urls,
                large,
                priority,
            } => {
                assert_eq!(urls, vec!["https://example.com/a.bin"]);
                assert!(large);
                assert_eq!(priority, -2);
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_rm_requires_ids_or_all() {
        assert!(Cli::try_parse_from(["stockpile", "rm"]).is_err());
        assert!(Cli::try_parse_from(["stockpile", "rm", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["stockpile", "rm", "a", "b"]).is_ok());
    }

    #[test]
    fn test_parse_mv_requires_target() {
        assert!(Cli::try_parse_from(["stockpile", "mv", "a"]).is_err());
        let cli = Cli::try_parse_from(["stockpile", "mv", "a", "b", "--to", "external"]).unwrap();
        match cli.command {
            Commands::Mv { ids, to } => {
                assert_eq!(ids, vec!["a", "b"]);
                assert_eq!(to, TargetTier::External);
            }
            _ => panic!("expected mv"),
        }
    }

    #[test]
    fn test_parse_view_bounds() {
        let cli =
            Cli::try_parse_from(["stockpile", "view", "cover.png", "--max-width", "320"]).unwrap();
        match cli.command {
            Commands::View {
                ids,
                max_width,
                max_height,
            } => {
                assert_eq!(ids, vec!["cover.png"]);
                assert_eq!(max_width, 320);
                assert_eq!(max_height, 0);
            }
            _ => panic!("expected view"),
        }
    }
}
