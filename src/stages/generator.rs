use super::GenerateFn;
use crate::cancel::CancellationToken;
use crate::conduit::{self, Receiver, Sender};
use crate::config::StageConfig;
use crate::error::{BoxError, PipelineError, Result};
use crate::fanout::broadcast;
use crate::metrics::StageMetrics;
use crate::stage::{Runnable, Stage, StageCore, StageId, StageKind};
use std::sync::Arc;

/// Source stage: drains a conduit produced by a user factory and broadcasts
/// every value to its outputs
///
/// The factory receives the run's token and should stop producing when it
/// fires. A generator has no inputs.
pub struct Generator<Out> {
    inner: Arc<GeneratorInner<Out>>,
}

struct GeneratorInner<Out> {
    core: StageCore<(), Out>,
    generate: GenerateFn<Out>,
}

impl<Out> Clone for Generator<Out> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Out> Generator<Out>
where
    Out: Clone + Send + 'static,
{
    /// Create a generator with the default config
    pub fn new<F>(generate: F) -> Self
    where
        F: Fn(&CancellationToken) -> std::result::Result<Receiver<Out>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self::with_config(generate, StageConfig::default())
    }

    /// Create a generator with a custom config
    pub fn with_config<F>(generate: F, config: StageConfig) -> Self
    where
        F: Fn(&CancellationToken) -> std::result::Result<Receiver<Out>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            inner: Arc::new(GeneratorInner {
                core: StageCore::new(StageKind::Generator, config),
                generate: Box::new(generate),
            }),
        }
    }

    /// Generator over a fixed sequence of values
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Out> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::new(move |token| {
            let token = token.clone();
            let values = values.clone().into_iter();
            let (tx, rx) = crossbeam::channel::bounded(0);
            std::thread::Builder::new()
                .name("generator-source".into())
                .spawn(move || {
                    for value in values {
                        if !matches!(conduit::send(&token, &tx, value), Ok(true)) {
                            return;
                        }
                    }
                })?;
            Ok(rx)
        })
    }
}

impl<Out> GeneratorInner<Out>
where
    Out: Clone + Send + 'static,
{
    fn drive(
        &self,
        token: &CancellationToken,
        _inputs: Vec<Receiver<()>>,
        outputs: &[Sender<Out>],
    ) -> Result<()> {
        let source = (self.generate)(token)
            .map_err(|source| PipelineError::stage(self.core.id, source))?;

        while let Some(value) = conduit::recv(token, &source)? {
            self.core.metrics.record_received();
            broadcast(token, outputs, value)?;
            self.core.metrics.record_emitted();
        }
        Ok(())
    }
}

impl<Out> Runnable for Generator<Out>
where
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

impl<Out> Stage<(), Out> for Generator<Out>
where
    Out: Clone + Send + 'static,
{
    fn attach_input(&self, _inputs: Vec<Receiver<()>>) -> Result<()> {
        Err(PipelineError::NoInputCapability(self.inner.core.id))
    }

    fn create_output(&self) -> Result<Receiver<Out>> {
        self.inner.core.add_output()
    }
}
