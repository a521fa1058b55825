use clap::{Parser, Subcommand};

pub mod run;
pub mod validate;

use run::RunArgs;
use validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(
    name = "conveyer",
    about = "Run pipelines of named string channels",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a topology, feeding stdin into one channel and printing others
    Run(RunArgs),

    /// Check a topology file and list its stages and channels
    Validate(ValidateArgs),
}

pub async fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args).await,
        Commands::Validate(args) => validate::execute(args).await,
    }
}
