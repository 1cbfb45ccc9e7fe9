use super::ProcessFn;
use crate::cancel::CancellationToken;
use crate::conduit::{self, Receiver, Sender};
use crate::config::{StageConfig, DEFAULT_WORKER_COUNT};
use crate::error::{BoxError, PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::stage::{Runnable, Stage, StageCore, StageId, StageKind};
use crossbeam::channel;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::trace;

/// Spreads one input across a fixed number of worker threads
///
/// Takes exactly one input and exposes exactly one output, sized to the
/// worker count. Result order is unspecified. The first worker error stops
/// every worker; `run` returns that error once all workers have exited,
/// and only then closes the output.
///
/// The processing function is called from several threads at once.
pub struct WorkerPool<In, Out> {
    inner: Arc<WorkerPoolInner<In, Out>>,
}

struct WorkerPoolInner<In, Out> {
    core: StageCore<In, Out>,
    process: ProcessFn<In, Out>,
}

impl<In, Out> Clone for WorkerPool<In, Out> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<In, Out> WorkerPool<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Create a pool with the default worker count
    pub fn new<F>(process: F) -> Self
    where
        F: Fn(In) -> std::result::Result<Out, BoxError> + Send + Sync + 'static,
    {
        Self::with_config(process, StageConfig::default())
    }

    /// Create a pool from `config`; a worker count of zero or less falls
    /// back to the default
    pub fn with_config<F>(process: F, mut config: StageConfig) -> Self
    where
        F: Fn(In) -> std::result::Result<Out, BoxError> + Send + Sync + 'static,
    {
        if config.worker_count <= 0 {
            config.worker_count = DEFAULT_WORKER_COUNT;
        }
        Self {
            inner: Arc::new(WorkerPoolInner {
                core: StageCore::new(StageKind::WorkerPool, config),
                process: Box::new(process),
            }),
        }
    }

    /// Number of worker threads a run spawns
    pub fn worker_count(&self) -> usize {
        self.inner.workers()
    }
}

impl<In, Out> WorkerPoolInner<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn workers(&self) -> usize {
        // Positive by construction.
        self.core.config.worker_count as usize
    }

    fn drive(
        &self,
        token: &CancellationToken,
        mut inputs: Vec<Receiver<In>>,
        outputs: &[Sender<Out>],
    ) -> Result<()> {
        let input = inputs
            .pop()
            .ok_or(PipelineError::RequiresSingleInput(self.core.id))?;
        // Without an output the pool runs for its side effects only.
        let output = outputs.first();

        let pool_token = token.child_token();
        let (errors_tx, errors_rx) = channel::bounded::<PipelineError>(1);

        // The output stays open until every worker has been joined.
        thread::scope(|s| {
            for idx in 0..self.workers() {
                let worker = thread::Builder::new()
                    .name(format!("{}-worker-{}", self.core.id, idx))
                    .spawn_scoped(s, || self.work(&pool_token, &input, output, &errors_tx));
                if let Err(e) = worker {
                    pool_token.cancel();
                    return Err(PipelineError::Spawn(e));
                }
            }
            Ok(())
        })?;

        if let Ok(err) = errors_rx.try_recv() {
            return Err(err);
        }
        token.check()
    }

    fn work(
        &self,
        token: &CancellationToken,
        input: &Receiver<In>,
        output: Option<&Sender<Out>>,
        errors: &Sender<PipelineError>,
    ) {
        let err = match panic::catch_unwind(AssertUnwindSafe(|| self.drain(token, input, output)))
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) if e.is_cancelled() => return,
            Ok(Err(e)) => e,
            Err(payload) => PipelineError::from_panic(self.core.id, payload),
        };

        if errors.try_send(err).is_err() {
            trace!(stage = %self.core.id, "pool already failed, dropping worker error");
        }
        token.cancel();
    }

    fn drain(
        &self,
        token: &CancellationToken,
        input: &Receiver<In>,
        output: Option<&Sender<Out>>,
    ) -> Result<()> {
        while let Some(value) = conduit::recv(token, input)? {
            self.core.metrics.record_received();
            let result = self.core.invoke(|| (self.process)(value))?;
            if let Some(output) = output {
                if !conduit::send(token, output, result)? {
                    trace!(stage = %self.core.id, "output has no consumer, result dropped");
                }
            }
        }
        Ok(())
    }
}

impl<In, Out> Runnable for WorkerPool<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
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

impl<In, Out> Stage<In, Out> for WorkerPool<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Attach the single input; any other count, or a second attach, fails
    /// with [`PipelineError::RequiresSingleInput`]
    fn attach_input(&self, inputs: Vec<Receiver<In>>) -> Result<()> {
        let id = self.inner.core.id;
        if inputs.len() != 1 {
            return Err(PipelineError::RequiresSingleInput(id));
        }
        self.inner.core.rewire(|wiring| {
            if !wiring.inputs.is_empty() {
                return Err(PipelineError::RequiresSingleInput(id));
            }
            wiring.inputs.extend(inputs);
            Ok(())
        })
    }

    /// Create the single output, buffered to the worker count; a second
    /// call fails with [`PipelineError::RequiresSingleOutput`]
    fn create_output(&self) -> Result<Receiver<Out>> {
        let inner = &self.inner;
        inner.core.rewire(|wiring| {
            if !wiring.outputs.is_empty() {
                return Err(PipelineError::RequiresSingleOutput(inner.core.id));
            }
            let (tx, rx) = channel::bounded(inner.workers());
            wiring.outputs.push(tx);
            Ok(rx)
        })
    }
}
