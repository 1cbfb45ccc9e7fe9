//! Typed, concurrently executing pipelines of stages.
//!
//! Stages exchange values through bounded, ordered conduits (crossbeam
//! channels). Each stage runs on its own thread; a full conduit blocks its
//! writer, so slow consumers apply backpressure upstream without any extra
//! throttling. Every blocking point also waits on a shared
//! [`CancellationToken`], and a [`Pipeline`] cancels all of its stages as
//! soon as one of them fails.
//!
//! # Features
//!
//! - Five stage kinds: [`Transform`], [`WorkerPool`], [`Generator`],
//!   [`Aggregator`] and [`Zip`]
//! - Fan-in ([`merge`]) and fan-out ([`broadcast`]) primitives usable on
//!   their own
//! - Wiring with [`connect`], [`connect_to_many`] and [`connect_from_many`]
//! - Fail-fast orchestration: first error wins, siblings are cancelled
//! - Deadlines carried on the token
//! - Per-stage metrics: received/emitted counts, latency percentiles
//!
//! # Example
//!
//! ```
//! use stage_pipeline::{
//!     connect, Aggregator, CancellationToken, Generator, Pipeline, StageConfig, WorkerPool,
//! };
//! use std::sync::{Arc, Mutex};
//!
//! let source = Generator::from_values(["a", "b", "c"].map(String::from));
//! let upper = WorkerPool::with_config(
//!     |s: String| Ok(s.to_uppercase()),
//!     StageConfig::new().with_worker_count(2),
//! );
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = {
//!     let seen = Arc::clone(&seen);
//!     Aggregator::new(move |s: String| {
//!         seen.lock().unwrap().push(s);
//!         Ok(())
//!     })
//! };
//!
//! connect(&source, &upper)?;
//! connect(&upper, &sink)?;
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add(source).add(upper).add(sink);
//! pipeline.run(&CancellationToken::new())?;
//!
//! let mut seen = seen.lock().unwrap().clone();
//! seen.sort();
//! assert_eq!(seen, ["A", "B", "C"]);
//! # Ok::<(), stage_pipeline::PipelineError>(())
//! ```

pub mod cancel;
pub mod conduit;
pub mod config;
pub mod connect;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod pipeline;
pub mod stage;
pub mod stages;

// Re-exports for convenience
pub use cancel::{CancelReason, CancellationToken};
pub use conduit::{Receiver, Sender};
pub use config::StageConfig;
pub use connect::{connect, connect_from_many, connect_to_many};
pub use error::{BoxError, PipelineError, Result};
pub use fanout::{broadcast, merge};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{start, Pipeline, PipelineMetrics};
pub use stage::{Runnable, Stage, StageId, StageKind};
pub use stages::{Aggregator, Generator, Transform, WorkerPool, Zip};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
