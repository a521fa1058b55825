use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::Args;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    signal,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use conveyer::{Channel, ChannelError, Conveyer, ConveyerConfig, Topology, logger::init_tracing};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Topology file (YAML)
    pub topology: PathBuf,

    /// Channel that receives one item per stdin line
    #[arg(long)]
    pub input: String,

    /// Channel to print; repeat for several
    #[arg(long = "output", required = true)]
    pub outputs: Vec<String>,

    /// How long to let the pipeline settle after stdin ends
    #[arg(long, default_value = "200")]
    pub drain_ms: u64,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// .env file with CONVEYER_CAPACITY / CONVEYER_SEND_TIMEOUT_MS defaults
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let _log_guard = init_tracing(&args.log_level, args.log_dir.clone())?;

    let defaults = ConveyerConfig::from_env(args.env_file.as_deref());
    let topology = Topology::from_path(&args.topology)?;
    let conveyer = Arc::new(
        topology
            .build_with(&defaults)
            .with_context(|| format!("Topology {} is not valid", args.topology.display()))?,
    );

    if conveyer.channel(&args.input).is_err() {
        bail!("input channel `{}` is not part of the topology", args.input);
    }

    let mut printers = JoinSet::new();
    for name in &args.outputs {
        let channel = conveyer
            .channel(name)
            .with_context(|| format!("output channel `{name}` is not part of the topology"))?;
        printers.spawn(print_channel(channel));
    }

    let cancel = CancellationToken::new();
    let runner = tokio::spawn({
        let conveyer = conveyer.clone();
        let cancel = cancel.clone();
        async move {
            let result = conveyer.run(cancel.clone()).await;
            // unblocks the stdin feeder once the stages are gone
            cancel.cancel();
            result
        }
    });

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping conveyer");
                cancel.cancel();
            }
        }
    });

    let fed = feed_stdin(&conveyer, &args.input, &cancel).await?;
    info!(fed, "stdin exhausted");

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_millis(args.drain_ms)) => cancel.cancel(),
    }

    let result = runner.await.context("conveyer task aborted")?;

    let mut printed = 0;
    while let Some(count) = printers.join_next().await {
        printed += count.context("output printer aborted")?;
    }
    info!(printed, "conveyer outputs drained");

    if let Err(err) = result {
        error!("{err:#}");
        return Err(err.into());
    }
    Ok(())
}

/// Push every stdin line into `input`, retrying while the channel is full.
async fn feed_stdin(
    conveyer: &Conveyer,
    input: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut fed = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(fed),
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            return Ok(fed);
        };

        loop {
            match conveyer.send(input, line.clone()).await {
                Ok(()) => {
                    fed += 1;
                    break;
                }
                Err(ChannelError::Timeout { .. }) | Err(ChannelError::Full(_)) => {
                    if cancel.is_cancelled() {
                        return Ok(fed);
                    }
                    debug!(channel = %input, "input channel full, retrying");
                    if conveyer.config().send_timeout.is_zero() {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
                Err(ChannelError::Closed(_)) => {
                    warn!("conveyer stopped before all input was fed");
                    return Ok(fed);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

async fn print_channel(channel: Channel) -> usize {
    let mut printed = 0;
    while let Some(item) = channel.recv().await {
        println!("{}\t{}", channel.name(), item);
        printed += 1;
    }
    debug!(channel = %channel.name(), printed, "output closed");
    printed
}
