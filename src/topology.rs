//! YAML description of a pipeline built from the reference stages.
//!
//! ```yaml
//! capacity: 8
//! send_timeout_ms: 100
//! stages:
//!   - kind: decorator
//!     input: raw
//!     output: tagged
//!   - kind: separator
//!     input: tagged
//!     outputs: [left, right]
//!   - kind: multiplexer
//!     inputs: [left, right]
//!     output: merged
//! ```

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
    config::ConveyerConfig,
    conveyer::Conveyer,
    error::ConveyerError,
    handlers::{
        DEFAULT_POISON, DEFAULT_PREFIX, DEFAULT_SKIP, PrefixDecorator, RoundRobinSeparator,
        SkipMultiplexer,
    },
};

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("failed to read topology {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid topology yaml: {0}")]
    Parse(#[from] serde_yaml_bw::Error),

    #[error("invalid topology: {0}")]
    Invalid(String),

    #[error(transparent)]
    Register(#[from] ConveyerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Topology {
    /// Overrides the configured channel capacity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Overrides the configured send timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_timeout_ms: Option<u64>,
    #[serde(default)]
    pub stages: Vec<StageDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDef {
    Decorator {
        input: String,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        poison: Option<String>,
    },
    Multiplexer {
        inputs: Vec<String>,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip: Option<String>,
    },
    Separator {
        input: String,
        outputs: Vec<String>,
    },
}

impl StageDef {
    fn channel_names(&self) -> Vec<&str> {
        match self {
            StageDef::Decorator { input, output, .. } => vec![input.as_str(), output.as_str()],
            StageDef::Multiplexer { inputs, output, .. } => {
                inputs.iter().chain(Some(output)).map(String::as_str).collect()
            }
            StageDef::Separator { input, outputs } => {
                Some(input).into_iter().chain(outputs).map(String::as_str).collect()
            }
        }
    }
}

impl Topology {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, TopologyError> {
        Ok(serde_yaml_bw::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let topology = Self::from_yaml_str(&contents)?;
        info!(path = %path.display(), stages = topology.stages.len(), "topology loaded");
        Ok(topology)
    }

    pub fn to_yaml_string(&self) -> Result<String, TopologyError> {
        Ok(serde_yaml_bw::to_string(self)?)
    }

    /// Check the things registration would otherwise trip over.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.capacity == Some(0) {
            return Err(TopologyError::Invalid("capacity must be at least 1".into()));
        }

        for (index, stage) in self.stages.iter().enumerate() {
            match stage {
                StageDef::Multiplexer { inputs, .. } if inputs.is_empty() => {
                    return Err(TopologyError::Invalid(format!(
                        "stage {index}: multiplexer needs at least one input"
                    )));
                }
                StageDef::Separator { outputs, .. } if outputs.is_empty() => {
                    return Err(TopologyError::Invalid(format!(
                        "stage {index}: separator needs at least one output"
                    )));
                }
                _ => {}
            }

            if stage.channel_names().iter().any(|name| name.trim().is_empty()) {
                return Err(TopologyError::Invalid(format!(
                    "stage {index}: channel names must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// Every channel the topology mentions, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(StageDef::channel_names)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Settings for the conveyer, falling back to `defaults` where the file
    /// is silent.
    pub fn config(&self, defaults: &ConveyerConfig) -> ConveyerConfig {
        ConveyerConfig {
            capacity: self.capacity.unwrap_or(defaults.capacity),
            send_timeout: self
                .send_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_timeout),
        }
    }

    pub fn build(&self) -> Result<Conveyer, TopologyError> {
        self.build_with(&ConveyerConfig::default())
    }

    /// Validate, then register every stage on a fresh conveyer.
    pub fn build_with(&self, defaults: &ConveyerConfig) -> Result<Conveyer, TopologyError> {
        self.validate()?;
        let conveyer = Conveyer::with_config(self.config(defaults));

        for stage in &self.stages {
            match stage {
                StageDef::Decorator {
                    input,
                    output,
                    prefix,
                    poison,
                } => {
                    let decorator = PrefixDecorator::new(
                        prefix.as_deref().unwrap_or(DEFAULT_PREFIX),
                        poison.as_deref().unwrap_or(DEFAULT_POISON),
                    );
                    conveyer.register_decorator(decorator, input, output)?;
                }
                StageDef::Multiplexer {
                    inputs,
                    output,
                    skip,
                } => {
                    let multiplexer = SkipMultiplexer::new(skip.as_deref().unwrap_or(DEFAULT_SKIP));
                    conveyer.register_multiplexer(multiplexer, inputs.as_slice(), output)?;
                }
                StageDef::Separator { input, outputs } => {
                    conveyer.register_separator(RoundRobinSeparator, input, outputs.as_slice())?;
                }
            }
        }
        Ok(conveyer)
    }
}
