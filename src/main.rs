use std::process;

use clap::Parser;

mod cli;

use cli::{Cli, execute};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let cli = Cli::parse();
    // exit explicitly: a pending stdin read would otherwise hold the runtime open
    match execute(cli.command).await {
        Ok(()) => process::exit(0),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}
