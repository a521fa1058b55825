use thiserror::Error;

/// Errors raised by a single channel operation.
///
/// These never affect a running pipeline: they are returned to whoever
/// called `send`/`recv` and nothing else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No stage ever referenced this channel name.
    #[error("channel `{0}` not found")]
    NotFound(String),

    /// The channel buffer is saturated and no wait was allowed.
    #[error("channel `{0}` is full")]
    Full(String),

    /// The channel stayed full for the whole send window.
    #[error("send to channel `{name}` timed out after {waited_ms} ms")]
    Timeout { name: String, waited_ms: u64 },

    /// The pipeline has shut down and the channel no longer accepts items.
    #[error("channel `{0}` is closed")]
    Closed(String),
}

/// Errors a stage function returns to abort the whole run.
#[derive(Error, Debug)]
pub enum StageError {
    /// The decorator received an item carrying its poison marker.
    #[error("can't be decorated: {0:?}")]
    Undecoratable(String),

    /// A fan-in or fan-out stage was handed an empty channel list.
    #[error("no channels passed to stage")]
    NoChannels,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Free-form failure for user supplied stages.
    #[error("{0}")]
    Failed(String),
}

/// Errors surfaced by the pipeline itself.
#[derive(Error, Debug)]
pub enum ConveyerError {
    #[error("conveyer run failed: stage `{stage}`: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("conveyer run failed: stage `{stage}` panicked")]
    StagePanicked { stage: String },

    #[error("conveyer has already been run")]
    AlreadyRun,

    #[error("stages cannot be registered once the conveyer has started")]
    RegistrationClosed,

    #[error("stage `{stage}` has no input channels")]
    EmptyInputs { stage: String },

    #[error("stage `{stage}` has no output channels")]
    EmptyOutputs { stage: String },
}

impl ConveyerError {
    /// The stage error behind a failed run, if there is one.
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            ConveyerError::Stage { source, .. } => Some(source),
            _ => None,
        }
    }
}
