//! Wiring stages together before a run.
//!
//! Capability errors from the stages involved are returned unchanged.

use crate::error::Result;
use crate::stage::Stage;

/// Attach a new output of `from` as an input of `to`
pub fn connect<A, B, C, S, T>(from: &S, to: &T) -> Result<()>
where
    S: Stage<A, B> + ?Sized,
    T: Stage<B, C> + ?Sized,
{
    let output = from.create_output()?;
    to.attach_input(vec![output])
}

/// Give every target its own output of `from`
///
/// All outputs are created before any is attached, so a source that can only
/// expose one output (a [`WorkerPool`](crate::WorkerPool)) fails before any
/// target is touched.
pub fn connect_to_many<A, B, C, S, T>(from: &S, targets: &[&T]) -> Result<()>
where
    S: Stage<A, B> + ?Sized,
    T: Stage<B, C> + ?Sized,
{
    let outputs = targets
        .iter()
        .map(|_| from.create_output())
        .collect::<Result<Vec<_>>>()?;

    for (target, output) in targets.iter().zip(outputs) {
        target.attach_input(vec![output])?;
    }
    Ok(())
}

/// Attach one output from each source to `to` in a single call
pub fn connect_from_many<A, B, C, S, T>(sources: &[&S], to: &T) -> Result<()>
where
    S: Stage<A, B> + ?Sized,
    T: Stage<B, C> + ?Sized,
{
    let inputs = sources
        .iter()
        .map(|source| source.create_output())
        .collect::<Result<Vec<_>>>()?;
    to.attach_input(inputs)
}
