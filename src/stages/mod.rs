//! The built-in stage kinds.
//!
//! | Kind | Inputs | Outputs |
//! |---|---|---|
//! | [`Transform`] | any number, merged | any number, broadcast |
//! | [`WorkerPool`] | exactly one | exactly one |
//! | [`Generator`] | none | any number, broadcast |
//! | [`Aggregator`] | any number, merged | none |
//! | [`Zip`] | at least one, read in lockstep | any number, broadcast |
//!
//! Each kind is a cheap cloneable handle: clone it to wire it and to hand it
//! to a [`Pipeline`](crate::Pipeline).

use crate::cancel::CancellationToken;
use crate::conduit::Receiver;
use crate::error::BoxError;

mod aggregator;
mod generator;
mod transform;
mod worker_pool;
mod zip;

pub use aggregator::Aggregator;
pub use generator::Generator;
pub use transform::Transform;
pub use worker_pool::WorkerPool;
pub use zip::Zip;

/// Per-value transformation used by [`Transform`] and [`WorkerPool`]
pub type ProcessFn<In, Out> = Box<dyn Fn(In) -> Result<Out, BoxError> + Send + Sync>;

/// Source factory used by [`Generator`]
pub type GenerateFn<Out> =
    Box<dyn Fn(&CancellationToken) -> Result<Receiver<Out>, BoxError> + Send + Sync>;

/// Side-effecting consumer used by [`Aggregator`]
pub type SinkFn<In> = Box<dyn Fn(In) -> Result<(), BoxError> + Send + Sync>;

/// Tuple combiner used by [`Zip`]
pub type CombineFn<In, Out> = Box<dyn Fn(Vec<In>) -> Result<Out, BoxError> + Send + Sync>;
