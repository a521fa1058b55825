// src/conveyer.rs

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    channel::{Channel, ChannelRegistry, UNDEFINED},
    config::ConveyerConfig,
    error::{ChannelError, ConveyerError},
    stage::{Decorator, Multiplexer, Separator, StageSpec},
};

/// A pipeline of named string channels and the stages wired between them.
///
/// Assemble the graph with the `register_*` calls, then drive it once with
/// [`Conveyer::run`]. `send`/`recv` work from any task at any time; wrap the
/// conveyer in an `Arc` to share it with the task running it.
#[derive(Debug)]
pub struct Conveyer {
    config: ConveyerConfig,
    channels: ChannelRegistry,
    stages: Mutex<Vec<StageSpec>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl Conveyer {
    /// A conveyer whose channels each buffer `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(ConveyerConfig::new(capacity))
    }

    pub fn with_config(config: ConveyerConfig) -> Self {
        let config = config.normalized();
        Self {
            channels: ChannelRegistry::new(config.capacity),
            config,
            stages: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConveyerConfig {
        &self.config
    }

    fn lock_stages(&self) -> MutexGuard<'_, Vec<StageSpec>> {
        self.stages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_stage(
        &self,
        build: impl FnOnce(usize, &ChannelRegistry) -> Result<StageSpec, ConveyerError>,
    ) -> Result<(), ConveyerError> {
        let mut stages = self.lock_stages();
        if self.started.load(Ordering::Acquire) {
            return Err(ConveyerError::RegistrationClosed);
        }
        let spec = build(stages.len(), &self.channels)?;
        debug!(stage = %spec.label(), "stage registered");
        stages.push(spec);
        Ok(())
    }

    pub fn register_decorator<D>(
        &self,
        handler: D,
        input: &str,
        output: &str,
    ) -> Result<(), ConveyerError>
    where
        D: Decorator + 'static,
    {
        self.push_stage(|index, channels| {
            let input = channels.get_or_create(input);
            let output = channels.get_or_create(output);
            Ok(StageSpec::decorator(index, Arc::new(handler), input, output))
        })
    }

    pub fn register_multiplexer<M, S>(
        &self,
        handler: M,
        inputs: &[S],
        output: &str,
    ) -> Result<(), ConveyerError>
    where
        M: Multiplexer + 'static,
        S: AsRef<str>,
    {
        self.push_stage(|index, channels| {
            if inputs.is_empty() {
                return Err(ConveyerError::EmptyInputs {
                    stage: format!("multiplexer#{index}(-> {output})"),
                });
            }
            let inputs = inputs
                .iter()
                .map(|name| channels.get_or_create(name.as_ref()))
                .collect();
            let output = channels.get_or_create(output);
            Ok(StageSpec::multiplexer(index, Arc::new(handler), inputs, output))
        })
    }

    pub fn register_separator<P, S>(
        &self,
        handler: P,
        input: &str,
        outputs: &[S],
    ) -> Result<(), ConveyerError>
    where
        P: Separator + 'static,
        S: AsRef<str>,
    {
        self.push_stage(|index, channels| {
            if outputs.is_empty() {
                return Err(ConveyerError::EmptyOutputs {
                    stage: format!("separator#{index}({input} ->)"),
                });
            }
            let input = channels.get_or_create(input);
            let outputs = outputs
                .iter()
                .map(|name| channels.get_or_create(name.as_ref()))
                .collect();
            Ok(StageSpec::separator(index, Arc::new(handler), input, outputs))
        })
    }

    /// Run every registered stage until they all return.
    ///
    /// The first stage error (or panic) cancels the others. Cancelling
    /// `cancel` stops the whole run. Once every stage is done all channels are
    /// closed, so later `recv` calls drain what is left and then yield
    /// [`UNDEFINED`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ConveyerError> {
        let stages = {
            let mut stages = self.lock_stages();
            if self.started.swap(true, Ordering::AcqRel) {
                return Err(ConveyerError::AlreadyRun);
            }
            std::mem::take(&mut *stages)
        };

        let scope = cancel.child_token();
        info!(
            stages = stages.len(),
            channels = self.channels.len(),
            "conveyer starting"
        );

        let mut tasks = JoinSet::new();
        for spec in stages {
            let label = spec.label().to_string();
            let span = info_span!("stage", kind = %spec.kind(), label = %label);
            let token = scope.clone();
            tasks.spawn(
                async move {
                    debug!("stage started");
                    let outcome = AssertUnwindSafe(spec.execute(token)).catch_unwind().await;
                    debug!("stage exited");
                    (label, outcome)
                }
                .instrument(span),
            );
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((_, Ok(Ok(())))) => None,
                Ok((stage, Ok(Err(source)))) => Some(ConveyerError::Stage { stage, source }),
                Ok((stage, Err(_panic))) => Some(ConveyerError::StagePanicked { stage }),
                Err(err) => Some(ConveyerError::StagePanicked {
                    stage: format!("unknown ({err})"),
                }),
            };

            if let Some(err) = failure {
                warn!(error = %err, "stage failed, cancelling conveyer");
                scope.cancel();
                first_error.get_or_insert(err);
            }
        }

        self.close_channels();

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("conveyer finished");
                Ok(())
            }
        }
    }

    /// Close every channel. Only the first call has an effect; `run` makes it
    /// on its way out, after every stage has returned.
    pub(crate) fn close_channels(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("channels already closed");
            return false;
        }
        let closed = self.channels.close_all();
        debug!(closed, "channels closed");
        true
    }

    /// Push `item` into the channel `name`.
    ///
    /// Waits up to the configured send timeout for space, failing with
    /// `ChannelError::Timeout`; with a zero timeout a full channel fails at
    /// once with `ChannelError::Full`.
    pub async fn send(&self, name: &str, item: impl Into<String>) -> Result<(), ChannelError> {
        let channel = self.channels.lookup(name)?;
        channel.send_timeout(item.into(), self.config.send_timeout).await
    }

    /// Take the next item from the channel `name`, waiting for one to arrive.
    ///
    /// A closed and drained channel yields the [`UNDEFINED`] sentinel, which
    /// cannot be told apart from a real `"undefined"` item. Use
    /// [`Conveyer::channel`] when that matters.
    pub async fn recv(&self, name: &str) -> Result<String, ChannelError> {
        let channel = self.channels.lookup(name)?;
        Ok(channel.recv().await.unwrap_or_else(|| UNDEFINED.to_string()))
    }

    /// The shared handle of a registered channel.
    pub fn channel(&self, name: &str) -> Result<Channel, ChannelError> {
        self.channels.lookup(name)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.names()
    }

    /// Labels of the stages still waiting to run.
    pub fn stage_labels(&self) -> Vec<String> {
        self.lock_stages()
            .iter()
            .map(|spec| spec.label().to_string())
            .collect()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}
