//! Merge (fan-in) and broadcast (fan-out) primitives.
//!
//! Both are free functions so custom stages can reuse them. Every blocking
//! operation races the cancellation token.

use crate::cancel::CancellationToken;
use crate::conduit::{self, Receiver, Sender};
use crate::error::{PipelineError, Result};
use std::thread;
use tracing::trace;

/// Merge several input conduits into one
///
/// Spawns one forwarding thread per input. Each forwarder owns a clone of
/// the merged sender, so the merged conduit closes exactly once: when the
/// last forwarder returns because its source closed, the merged receiver
/// was dropped, or `token` fired. Values from one source keep their order;
/// interleaving across sources is unspecified.
pub fn merge<T: Send + 'static>(
    token: &CancellationToken,
    inputs: Vec<Receiver<T>>,
    buffer_size: isize,
) -> Result<Receiver<T>> {
    if inputs.is_empty() {
        return Err(PipelineError::EmptyInputSet);
    }
    let (tx, rx) = conduit::conduit(buffer_size)?;

    for (idx, input) in inputs.into_iter().enumerate() {
        let output = tx.clone();
        let token = token.clone();
        thread::Builder::new()
            .name(format!("merge-{}", idx))
            .spawn(move || forward(&token, &input, &output))?;
    }

    Ok(rx)
}

fn forward<T>(token: &CancellationToken, input: &Receiver<T>, output: &Sender<T>) {
    loop {
        let value = match conduit::recv(token, input) {
            Ok(Some(value)) => value,
            _ => return,
        };
        match conduit::send(token, output, value) {
            Ok(true) => {}
            _ => return,
        }
    }
}

/// Deliver `value` to every output, in order
///
/// If `token` fires while a write is pending the call returns the
/// cancellation error at once, and outputs later in the list get nothing
/// for this value. Outputs whose consumer is gone are skipped.
pub fn broadcast<T: Clone>(
    token: &CancellationToken,
    outputs: &[Sender<T>],
    value: T,
) -> Result<()> {
    let Some((last, rest)) = outputs.split_last() else {
        return Ok(());
    };
    for output in rest {
        deliver(token, output, value.clone())?;
    }
    deliver(token, last, value)
}

fn deliver<T>(token: &CancellationToken, output: &Sender<T>, value: T) -> Result<()> {
    if !conduit::send(token, output, value)? {
        trace!("output has no consumer, value dropped");
    }
    Ok(())
}
