use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use conveyer::Topology;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Topology file (YAML)
    pub topology: PathBuf,
}

pub async fn execute(args: ValidateArgs) -> anyhow::Result<()> {
    let topology = Topology::from_path(&args.topology)?;
    let conveyer = topology
        .build()
        .with_context(|| format!("Topology {} is not valid", args.topology.display()))?;

    let stages = conveyer.stage_labels();
    let channels = conveyer.channel_names();
    println!(
        "✅ Topology is valid: {} stage(s), {} channel(s), capacity {}",
        stages.len(),
        channels.len(),
        conveyer.config().capacity
    );
    for label in stages {
        println!("  stage    {label}");
    }
    for name in channels {
        println!("  channel  {name}");
    }
    Ok(())
}
