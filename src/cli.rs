//! CLI argument parsing for the catalog-importer binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "catalog-importer", about = "Product catalog CSV import service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API and the import workers in one process (default)
    Serve,
    /// Run only the HTTP API
    Api,
    /// Run only the import workers
    Worker,
    /// Run database migrations and exit
    Migrate,
}

impl Cli {
    /// The requested command, `serve` when none is given
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

impl Command {
    pub fn runs_api(&self) -> bool {
        matches!(self, Command::Serve | Command::Api)
    }

    pub fn runs_workers(&self) -> bool {
        matches!(self, Command::Serve | Command::Worker)
    }
}
