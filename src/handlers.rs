//! Reference stage implementations.
//!
//! Each stage is available both as a configurable struct and as a plain
//! `async fn` using the default markers, so either can be handed to the
//! `Conveyer::register_*` calls.

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{
    channel::Channel,
    error::StageError,
    stage::{Decorator, Multiplexer, Separator},
};

pub const DEFAULT_PREFIX: &str = "decorated: ";
pub const DEFAULT_POISON: &str = "no decorator";
pub const DEFAULT_SKIP: &str = "no multiplexer";

/// Receive the next item, or `None` when the input closed or `cancel` fired.
async fn next_item(cancel: &CancellationToken, input: &Channel) -> Option<String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        item = input.recv() => item,
    }
}

/// Forward `item`, returning `Ok(false)` if `cancel` fired first.
async fn forward(
    cancel: &CancellationToken,
    output: &Channel,
    item: String,
) -> Result<bool, StageError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(false),
        sent = output.send(item) => sent.map(|_| true).map_err(StageError::from),
    }
}

/// Tags every item with a prefix; an item carrying the poison marker aborts
/// the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixDecorator {
    pub prefix: String,
    pub poison: String,
}

impl Default for PrefixDecorator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_POISON)
    }
}

impl PrefixDecorator {
    pub fn new(prefix: impl Into<String>, poison: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            poison: poison.into(),
        }
    }

    pub fn apply(&self, item: String) -> Result<String, StageError> {
        if !self.poison.is_empty() && item.contains(&self.poison) {
            return Err(StageError::Undecoratable(item));
        }
        if item.starts_with(&self.prefix) {
            Ok(item)
        } else {
            Ok(format!("{}{}", self.prefix, item))
        }
    }
}

#[async_trait]
impl Decorator for PrefixDecorator {
    async fn decorate(
        &self,
        cancel: CancellationToken,
        input: Channel,
        output: Channel,
    ) -> Result<(), StageError> {
        while let Some(item) = next_item(&cancel, &input).await {
            let item = self.apply(item).inspect_err(|err| {
                warn!(channel = %input.name(), error = %err, "rejecting poison item");
            })?;
            trace!(channel = %output.name(), item = %item, "decorated");
            if !forward(&cancel, &output, item).await? {
                break;
            }
        }
        Ok(())
    }
}

/// [`PrefixDecorator`] with the default prefix and poison marker.
pub async fn prefix_decorator(
    cancel: CancellationToken,
    input: Channel,
    output: Channel,
) -> Result<(), StageError> {
    PrefixDecorator::default().decorate(cancel, input, output).await
}

/// Merges every input into one output, dropping items that carry the skip
/// marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipMultiplexer {
    pub skip: String,
}

impl Default for SkipMultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP)
    }
}

impl SkipMultiplexer {
    pub fn new(skip: impl Into<String>) -> Self {
        Self { skip: skip.into() }
    }

    fn keeps(&self, item: &str) -> bool {
        self.skip.is_empty() || !item.contains(&self.skip)
    }

    async fn drain_feed(
        self,
        cancel: CancellationToken,
        input: Channel,
        output: Channel,
    ) -> Result<(), StageError> {
        while let Some(item) = next_item(&cancel, &input).await {
            if !self.keeps(&item) {
                trace!(channel = %input.name(), item = %item, "skipped");
                continue;
            }
            if !forward(&cancel, &output, item).await? {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Multiplexer for SkipMultiplexer {
    async fn multiplex(
        &self,
        cancel: CancellationToken,
        inputs: Vec<Channel>,
        output: Channel,
    ) -> Result<(), StageError> {
        if inputs.is_empty() {
            return Err(StageError::NoChannels);
        }

        // A failing feed stops its siblings without touching the run scope.
        let feeds_cancel = cancel.child_token();
        let mut feeds = JoinSet::new();
        for input in inputs {
            feeds.spawn(self.clone().drain_feed(feeds_cancel.clone(), input, output.clone()));
        }

        join_feeds(feeds, &feeds_cancel).await
    }
}

/// Wait for every feed of a fan-in stage. The first failing feed cancels
/// `feeds_cancel` and its error is returned; a panicking feed is re-raised
/// in the calling stage.
pub(crate) async fn join_feeds(
    mut feeds: JoinSet<Result<(), StageError>>,
    feeds_cancel: &CancellationToken,
) -> Result<(), StageError> {
    let mut outcome = Ok(());
    while let Some(joined) = feeds.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                feeds_cancel.cancel();
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                feeds_cancel.cancel();
                if outcome.is_ok() {
                    outcome = Err(StageError::Failed(format!("multiplexer feed aborted: {err}")));
                }
            }
        }
    }
    outcome
}

/// [`SkipMultiplexer`] with the default skip marker.
pub async fn multiplexer(
    cancel: CancellationToken,
    inputs: Vec<Channel>,
    output: Channel,
) -> Result<(), StageError> {
    SkipMultiplexer::default().multiplex(cancel, inputs, output).await
}

/// Deals items across its outputs in strict rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundRobinSeparator;

#[async_trait]
impl Separator for RoundRobinSeparator {
    async fn separate(
        &self,
        cancel: CancellationToken,
        input: Channel,
        outputs: Vec<Channel>,
    ) -> Result<(), StageError> {
        if outputs.is_empty() {
            return Err(StageError::NoChannels);
        }

        let mut next = 0;
        while let Some(item) = next_item(&cancel, &input).await {
            if !forward(&cancel, &outputs[next], item).await? {
                break;
            }
            next = (next + 1) % outputs.len();
        }
        Ok(())
    }
}

/// [`RoundRobinSeparator`] as a plain function.
pub async fn separator(
    cancel: CancellationToken,
    input: Channel,
    outputs: Vec<Channel>,
) -> Result<(), StageError> {
    RoundRobinSeparator.separate(cancel, input, outputs).await
}
