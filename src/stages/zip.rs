use super::CombineFn;
use crate::cancel::CancellationToken;
use crate::conduit::{self, Receiver, Sender};
use crate::config::StageConfig;
use crate::error::{BoxError, PipelineError, Result};
use crate::fanout::broadcast;
use crate::metrics::StageMetrics;
use crate::stage::{Runnable, Stage, StageCore, StageId, StageKind};
use crossbeam::channel::TryRecvError;
use std::sync::Arc;

/// Reads one value from every input per step, in attachment order, and
/// combines the tuple into one output value
///
/// Inputs must be the same length. If the first input closes at a tuple
/// boundary and every other input is already closed, the stage finishes. If
/// any input closes while another is still open, the run fails at once with
/// [`PipelineError::ZipInputClosed`].
pub struct Zip<In, Out> {
    inner: Arc<ZipInner<In, Out>>,
}

struct ZipInner<In, Out> {
    core: StageCore<In, Out>,
    combine: CombineFn<In, Out>,
}

impl<In, Out> Clone for Zip<In, Out> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<In, Out> Zip<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + 'static,
{
    /// Create a zip with the default config
    pub fn new<F>(combine: F) -> Self
    where
        F: Fn(Vec<In>) -> std::result::Result<Out, BoxError> + Send + Sync + 'static,
    {
        Self::with_config(combine, StageConfig::default())
    }

    /// Create a zip with a custom config
    pub fn with_config<F>(combine: F, config: StageConfig) -> Self
    where
        F: Fn(Vec<In>) -> std::result::Result<Out, BoxError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ZipInner {
                core: StageCore::new(StageKind::Zip, config),
                combine: Box::new(combine),
            }),
        }
    }
}

impl<In, Out> ZipInner<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + 'static,
{
    fn drive(
        &self,
        token: &CancellationToken,
        inputs: Vec<Receiver<In>>,
        outputs: &[Sender<Out>],
    ) -> Result<()> {
        if inputs.is_empty() {
            return Err(PipelineError::NoZipInput(self.core.id));
        }

        loop {
            token.check()?;
            let Some(tuple) = self.next_tuple(token, &inputs)? else {
                return Ok(());
            };
            let result = self.core.invoke(|| (self.combine)(tuple))?;
            broadcast(token, outputs, result)?;
        }
    }

    /// `None` when every input ended together
    fn next_tuple(
        &self,
        token: &CancellationToken,
        inputs: &[Receiver<In>],
    ) -> Result<Option<Vec<In>>> {
        let mut tuple = Vec::with_capacity(inputs.len());
        for (idx, input) in inputs.iter().enumerate() {
            match conduit::recv(token, input)? {
                Some(value) => {
                    self.core.metrics.record_received();
                    tuple.push(value);
                }
                None if idx == 0 => {
                    self.expect_exhausted(&inputs[1..])?;
                    return Ok(None);
                }
                None => return Err(PipelineError::ZipInputClosed(self.core.id)),
            }
        }
        Ok(Some(tuple))
    }

    /// Every remaining input must already be closed and drained; one that is
    /// still open, or still holds a value, fails the run at once
    fn expect_exhausted(&self, rest: &[Receiver<In>]) -> Result<()> {
        for input in rest {
            match input.try_recv() {
                Err(TryRecvError::Disconnected) => {}
                Ok(_) | Err(TryRecvError::Empty) => {
                    return Err(PipelineError::ZipInputClosed(self.core.id))
                }
            }
        }
        Ok(())
    }
}

impl<In, Out> Runnable for Zip<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + 'static,
{
    fn id(&self) -> StageId {
        self.inner.core.id
    }

    fn run(&self, token: &CancellationToken) -> Result<()> {
        let inner = &self.inner;
        inner
            .core
            .run_with(token, |inputs, outputs| inner.drive(token, inputs, outputs))
    }

    fn metrics(&self) -> StageMetrics {
        self.inner.core.metrics.clone()
    }
}

impl<In, Out> Stage<In, Out> for Zip<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + 'static,
{
    fn attach_input(&self, inputs: Vec<Receiver<In>>) -> Result<()> {
        self.inner.core.attach(inputs)
    }

    fn create_output(&self) -> Result<Receiver<Out>> {
        self.inner.core.add_output()
    }
}
