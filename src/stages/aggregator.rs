use super::SinkFn;
use crate::cancel::CancellationToken;
use crate::conduit::{self, Receiver, Sender};
use crate::config::StageConfig;
use crate::error::{BoxError, PipelineError, Result};
use crate::fanout::merge;
use crate::metrics::StageMetrics;
use crate::stage::{Runnable, Stage, StageCore, StageId, StageKind};
use std::sync::Arc;

/// Terminal stage: hands every value from its merged inputs to a sink
/// function for its side effect
///
/// Finishes successfully once every input has closed. An aggregator has no
/// outputs.
pub struct Aggregator<In> {
    inner: Arc<AggregatorInner<In>>,
}

struct AggregatorInner<In> {
    core: StageCore<In, ()>,
    sink: SinkFn<In>,
}

impl<In> Clone for Aggregator<In> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<In> Aggregator<In>
where
    In: Send + 'static,
{
    /// Create an aggregator with the default config
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(In) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::with_config(sink, StageConfig::default())
    }

    /// Create an aggregator with a custom config
    pub fn with_config<F>(sink: F, config: StageConfig) -> Self
    where
        F: Fn(In) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(AggregatorInner {
                core: StageCore::new(StageKind::Aggregator, config),
                sink: Box::new(sink),
            }),
        }
    }
}

impl<In> AggregatorInner<In>
where
    In: Send + 'static,
{
    fn drive(
        &self,
        token: &CancellationToken,
        inputs: Vec<Receiver<In>>,
        _outputs: &[Sender<()>],
    ) -> Result<()> {
        let input = merge(token, inputs, self.core.config.input_buffer_size)?;

        while let Some(value) = conduit::recv(token, &input)? {
            self.core.metrics.record_received();
            self.core.invoke(|| (self.sink)(value))?;
        }
        Ok(())
    }
}

impl<In> Runnable for Aggregator<In>
where
    In: Send + 'static,
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

impl<In> Stage<In, ()> for Aggregator<In>
where
    In: Send + 'static,
{
    fn attach_input(&self, inputs: Vec<Receiver<In>>) -> Result<()> {
        self.inner.core.attach(inputs)
    }

    fn create_output(&self) -> Result<Receiver<()>> {
        Err(PipelineError::NoOutputCapability(self.inner.core.id))
    }
}
