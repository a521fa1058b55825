use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{channel::Channel, error::StageError};

/// 1:1 transform stage.
///
/// Implementations must race every channel operation against `cancel` and
/// return `Ok(())` once the input closes or the token fires.
#[async_trait]
pub trait Decorator: Send + Sync {
    async fn decorate(
        &self,
        cancel: CancellationToken,
        input: Channel,
        output: Channel,
    ) -> Result<(), StageError>;
}

/// N:1 fan-in stage.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    async fn multiplex(
        &self,
        cancel: CancellationToken,
        inputs: Vec<Channel>,
        output: Channel,
    ) -> Result<(), StageError>;
}

/// 1:N fan-out stage.
#[async_trait]
pub trait Separator: Send + Sync {
    async fn separate(
        &self,
        cancel: CancellationToken,
        input: Channel,
        outputs: Vec<Channel>,
    ) -> Result<(), StageError>;
}

#[async_trait]
impl<F, Fut> Decorator for F
where
    F: Fn(CancellationToken, Channel, Channel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
{
    async fn decorate(
        &self,
        cancel: CancellationToken,
        input: Channel,
        output: Channel,
    ) -> Result<(), StageError> {
        (self)(cancel, input, output).await
    }
}

#[async_trait]
impl<F, Fut> Multiplexer for F
where
    F: Fn(CancellationToken, Vec<Channel>, Channel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
{
    async fn multiplex(
        &self,
        cancel: CancellationToken,
        inputs: Vec<Channel>,
        output: Channel,
    ) -> Result<(), StageError> {
        (self)(cancel, inputs, output).await
    }
}

#[async_trait]
impl<F, Fut> Separator for F
where
    F: Fn(CancellationToken, Channel, Vec<Channel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
{
    async fn separate(
        &self,
        cancel: CancellationToken,
        input: Channel,
        outputs: Vec<Channel>,
    ) -> Result<(), StageError> {
        (self)(cancel, input, outputs).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Decorator,
    Multiplexer,
    Separator,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Decorator => "decorator",
            StageKind::Multiplexer => "multiplexer",
            StageKind::Separator => "separator",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Binding {
    Decorator {
        handler: Arc<dyn Decorator>,
        input: Channel,
        output: Channel,
    },
    Multiplexer {
        handler: Arc<dyn Multiplexer>,
        inputs: Vec<Channel>,
        output: Channel,
    },
    Separator {
        handler: Arc<dyn Separator>,
        input: Channel,
        outputs: Vec<Channel>,
    },
}

/// A registered stage: the user function plus the channels it was bound to.
pub struct StageSpec {
    label: String,
    binding: Binding,
}

impl StageSpec {
    pub(crate) fn decorator(
        index: usize,
        handler: Arc<dyn Decorator>,
        input: Channel,
        output: Channel,
    ) -> Self {
        let label = format!("decorator#{index}({} -> {})", input.name(), output.name());
        Self {
            label,
            binding: Binding::Decorator {
                handler,
                input,
                output,
            },
        }
    }

    pub(crate) fn multiplexer(
        index: usize,
        handler: Arc<dyn Multiplexer>,
        inputs: Vec<Channel>,
        output: Channel,
    ) -> Self {
        let label = format!(
            "multiplexer#{index}({} -> {})",
            join_names(&inputs),
            output.name()
        );
        Self {
            label,
            binding: Binding::Multiplexer {
                handler,
                inputs,
                output,
            },
        }
    }

    pub(crate) fn separator(
        index: usize,
        handler: Arc<dyn Separator>,
        input: Channel,
        outputs: Vec<Channel>,
    ) -> Self {
        let label = format!(
            "separator#{index}({} -> {})",
            input.name(),
            join_names(&outputs)
        );
        Self {
            label,
            binding: Binding::Separator {
                handler,
                input,
                outputs,
            },
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> StageKind {
        match self.binding {
            Binding::Decorator { .. } => StageKind::Decorator,
            Binding::Multiplexer { .. } => StageKind::Multiplexer,
            Binding::Separator { .. } => StageKind::Separator,
        }
    }

    /// Names of the channels this stage reads from.
    pub fn inputs(&self) -> Vec<&str> {
        match &self.binding {
            Binding::Decorator { input, .. } | Binding::Separator { input, .. } => {
                vec![input.name()]
            }
            Binding::Multiplexer { inputs, .. } => inputs.iter().map(Channel::name).collect(),
        }
    }

    /// Names of the channels this stage writes to.
    pub fn outputs(&self) -> Vec<&str> {
        match &self.binding {
            Binding::Decorator { output, .. } | Binding::Multiplexer { output, .. } => {
                vec![output.name()]
            }
            Binding::Separator { outputs, .. } => outputs.iter().map(Channel::name).collect(),
        }
    }

    /// Drive the stage to completion.
    pub(crate) async fn execute(self, cancel: CancellationToken) -> Result<(), StageError> {
        match self.binding {
            Binding::Decorator {
                handler,
                input,
                output,
            } => handler.decorate(cancel, input, output).await,
            Binding::Multiplexer {
                handler,
                inputs,
                output,
            } => handler.multiplex(cancel, inputs, output).await,
            Binding::Separator {
                handler,
                input,
                outputs,
            } => handler.separate(cancel, input, outputs).await,
        }
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("label", &self.label)
            .field("kind", &self.kind())
            .finish()
    }
}

fn join_names(channels: &[Channel]) -> String {
    channels
        .iter()
        .map(Channel::name)
        .collect::<Vec<_>>()
        .join(", ")
}
