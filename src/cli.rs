use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    actions::{Reply, Request},
    config::Config,
};

/// The command line interface for the gateway.
///
/// Settings come from the optional configuration file,
/// then `CCC*` environment variables override them.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file (RON)
    pub config: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON request, two device commands with a flag.
    Request,

    /// Show an example JSON reply to a device command.
    Reply,
}

/// Run a subcommand, printing its output.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(Examples::Config) => println!("{}", Config::example().serialize_pretty()),
        Commands::Examples(Examples::Request) => println!("{}", Request::example().serialize()),
        Commands::Examples(Examples::Reply) => println!("{}", Reply::example().serialize()),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_examples() {
        let cli = Cli::parse_from(["cac-pivot", "examples", "request"]);

        assert!(matches!(
            cli.command,
            Some(Commands::Examples(Examples::Request))
        ));
    }

    #[test]
    fn parses_config_path() {
        let cli = Cli::parse_from(["cac-pivot", "/etc/cccpivot.ron"]);

        assert_eq!(cli.config, Some(PathBuf::from("/etc/cccpivot.ron")));
        assert!(cli.command.is_none());
    }
}
