//! A pipeline engine over named, bounded string channels.
//!
//! Stages come in three shapes: a [`Decorator`] transforms one channel into
//! another, a [`Multiplexer`] merges many channels into one and a
//! [`Separator`] deals one channel out over many. Stages bind to channels by
//! name, so registering two stages that mention the same name connects them.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use conveyer::{Conveyer, handlers};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn tag_and_split() -> anyhow::Result<()> {
//!     let conveyer = Arc::new(Conveyer::new(8));
//!     conveyer.register_decorator(handlers::prefix_decorator, "raw", "tagged")?;
//!     conveyer.register_separator(handlers::separator, "tagged", &["left", "right"])?;
//!
//!     let cancel = CancellationToken::new();
//!     let running = tokio::spawn({
//!         let conveyer = conveyer.clone();
//!         let cancel = cancel.clone();
//!         async move { conveyer.run(cancel).await }
//!     });
//!
//!     conveyer.send("raw", "x").await?;
//!     assert_eq!(conveyer.recv("left").await?, "decorated: x");
//!     cancel.cancel();
//!     running.await??;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod conveyer;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod stage;
pub mod topology;

pub use channel::{Channel, ChannelRegistry, UNDEFINED};
pub use config::ConveyerConfig;
pub use conveyer::Conveyer;
pub use error::{ChannelError, ConveyerError, StageError};
pub use stage::{Decorator, Multiplexer, Separator, StageKind};
pub use topology::{StageDef, Topology, TopologyError};
