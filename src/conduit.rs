//! Bounded, ordered, typed conduits between stages.
//!
//! A conduit is a crossbeam bounded channel. It closes when its last
//! [`Sender`] is dropped; receivers drain what is buffered and then observe
//! the closure without blocking. Capacity `0` makes a rendezvous conduit.

use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result};
use crossbeam::channel;
use crossbeam::select;

pub use crossbeam::channel::{Receiver, Sender};

/// Validate a configured buffer size
pub fn buffer_capacity(size: isize) -> Result<usize> {
    usize::try_from(size).map_err(|_| PipelineError::InvalidBufferSize(size))
}

/// Create a conduit holding up to `capacity` values
pub fn conduit<T>(capacity: isize) -> Result<(Sender<T>, Receiver<T>)> {
    Ok(channel::bounded(buffer_capacity(capacity)?))
}

/// Receive the next value, racing the token
///
/// Returns `Ok(None)` once the conduit is closed and drained. A closure
/// observed after the token fired reports the cancellation instead, since
/// upstream stages close their outputs when they are cancelled.
pub fn recv<T>(token: &CancellationToken, input: &Receiver<T>) -> Result<Option<T>> {
    select! {
        recv(input) -> msg => match msg {
            Ok(value) => Ok(Some(value)),
            Err(_) => token.check().map(|()| None),
        },
        recv(token.cancelled()) -> _ => Err(token.error()),
    }
}

/// Send a value, racing the token
///
/// Returns `Ok(false)` if every receiver of the conduit has been dropped.
pub fn send<T>(token: &CancellationToken, output: &Sender<T>, value: T) -> Result<bool> {
    select! {
        send(output, value) -> res => Ok(res.is_ok()),
        recv(token.cancelled()) -> _ => Err(token.error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_negative_capacity_rejected() {
        assert!(matches!(
            conduit::<u8>(-1),
            Err(PipelineError::InvalidBufferSize(-1))
        ));
        assert_eq!(buffer_capacity(0).unwrap(), 0);
    }

    #[test]
    fn test_fifo_and_close() {
        let token = CancellationToken::new();
        let (tx, rx) = conduit(4).unwrap();
        for i in 0..4 {
            assert!(send(&token, &tx, i).unwrap());
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(v) = recv(&token, &rx).unwrap() {
            seen.push(v);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        // Closed stays closed.
        assert!(recv(&token, &rx).unwrap().is_none());
    }

    #[test]
    fn test_blocked_send_unblocks_on_cancel() {
        let token = CancellationToken::new();
        let (tx, _rx) = conduit::<u32>(0).unwrap();

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                token.cancel();
            })
        };
        assert!(matches!(
            send(&token, &tx, 7),
            Err(PipelineError::Cancelled)
        ));
        canceller.join().unwrap();
    }

    #[test]
    fn test_closed_after_cancel_reports_cancel() {
        let token = CancellationToken::new();
        let (tx, rx) = conduit::<u32>(1).unwrap();
        drop(tx);
        token.cancel();
        assert!(matches!(recv(&token, &rx), Err(PipelineError::Cancelled)));
    }

    #[test]
    fn test_send_to_dropped_receiver() {
        let token = CancellationToken::new();
        let (tx, rx) = conduit::<u32>(1).unwrap();
        drop(rx);
        assert!(!send(&token, &tx, 1).unwrap());
    }
}
