use crate::cancel::CancellationToken;
use crate::conduit::{Receiver, Sender};
use crate::config::StageConfig;
use crate::error::{BoxError, PipelineError, Result};
use crate::metrics::StageMetrics;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

static NEXT_STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// The kind of work a stage performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Transform,
    WorkerPool,
    Generator,
    Aggregator,
    Zip,
}

impl StageKind {
    /// Short label used in stage identities and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::WorkerPool => "worker-pool",
            Self::Generator => "generator",
            Self::Aggregator => "aggregator",
            Self::Zip => "zip",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide unique identity of a stage
///
/// Sequence numbers come from one monotonically increasing counter shared by
/// every stage kind, so two stages never share an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId {
    seq: u64,
    kind: StageKind,
}

impl StageId {
    /// Allocate the next identity
    pub fn next(kind: StageKind) -> Self {
        Self {
            seq: NEXT_STAGE_SEQ.fetch_add(1, Ordering::Relaxed) + 1,
            kind,
        }
    }

    /// Position in the global allocation order
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Kind of stage this identity belongs to
    pub fn kind(&self) -> StageKind {
        self.kind
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-stage-{}", self.kind, self.seq)
    }
}

/// Something a [`Pipeline`](crate::Pipeline) can run
pub trait Runnable: Send + Sync {
    /// Identity assigned at construction
    fn id(&self) -> StageId;

    /// Run until the work is exhausted, a function fails, or `token` fires
    ///
    /// Blocks the calling thread. Returns
    /// [`PipelineError::AlreadyRunning`] if a run is already in flight.
    fn run(&self, token: &CancellationToken) -> Result<()>;

    /// Live counters for this stage
    fn metrics(&self) -> StageMetrics;
}

/// A runnable stage with typed, wireable inputs and outputs
pub trait Stage<In, Out>: Runnable {
    /// Attach one or more input conduits
    fn attach_input(&self, inputs: Vec<Receiver<In>>) -> Result<()>;

    /// Create a new output conduit and return its receiving end
    fn create_output(&self) -> Result<Receiver<Out>>;
}

/// Conduits wired into a stage before it runs
pub(crate) struct Wiring<In, Out> {
    pub inputs: Vec<Receiver<In>>,
    pub outputs: Vec<Sender<Out>>,
}

impl<In, Out> Default for Wiring<In, Out> {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// Clears the run flag when a run ends
pub(crate) struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// State shared by every stage kind: identity, sizing, run flag and wiring
pub(crate) struct StageCore<In, Out> {
    pub id: StageId,
    pub config: StageConfig,
    pub metrics: StageMetrics,
    running: AtomicBool,
    wiring: Mutex<Wiring<In, Out>>,
}

impl<In, Out> StageCore<In, Out> {
    pub fn new(kind: StageKind, config: StageConfig) -> Self {
        Self {
            id: StageId::next(kind),
            config,
            metrics: StageMetrics::new(),
            running: AtomicBool::new(false),
            wiring: Mutex::new(Wiring::default()),
        }
    }

    /// Mutate the wiring, refusing while a run is in flight
    ///
    /// The flag is read under the wiring lock, and `start` flips it before
    /// taking that lock, so a successful edit is always seen by the run.
    pub fn rewire<R>(&self, f: impl FnOnce(&mut Wiring<In, Out>) -> Result<R>) -> Result<R> {
        let mut wiring = self.wiring.lock();
        if self.is_running() {
            return Err(PipelineError::StageBusy(self.id));
        }
        f(&mut wiring)
    }

    pub fn attach(&self, inputs: Vec<Receiver<In>>) -> Result<()> {
        self.rewire(|wiring| {
            wiring.inputs.extend(inputs);
            Ok(())
        })
    }

    /// Create an output conduit of the configured capacity
    pub fn add_output(&self) -> Result<Receiver<Out>> {
        let capacity = self.config.output_buffer_size;
        self.rewire(|wiring| {
            let (tx, rx) = crate::conduit::conduit(capacity)?;
            wiring.outputs.push(tx);
            Ok(rx)
        })
    }

    /// Mark the stage running and take its wiring for this run
    pub fn start(&self) -> Result<(RunningGuard<'_>, Wiring<In, Out>)> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PipelineError::AlreadyRunning(self.id))?;
        let guard = RunningGuard {
            flag: &self.running,
        };
        let wiring = std::mem::take(&mut *self.wiring.lock());
        debug!(
            stage = %self.id,
            inputs = wiring.inputs.len(),
            outputs = wiring.outputs.len(),
            "stage started"
        );
        Ok((guard, wiring))
    }

    /// Call a user function, timing it and tagging its error with this stage
    pub fn invoke<R>(&self, f: impl FnOnce() -> std::result::Result<R, BoxError>) -> Result<R> {
        let started = Instant::now();
        let result = f();
        self.metrics.record_latency(started.elapsed());
        match result {
            Ok(value) => {
                self.metrics.record_emitted();
                Ok(value)
            }
            Err(source) => Err(PipelineError::stage(self.id, source)),
        }
    }

    /// Run `drive` once over this run's wiring
    ///
    /// `drive` gets the inputs by value and borrows the outputs. The outputs
    /// close only after the outcome has been reported on `token`, so a
    /// failure cancels the run before downstream stages see the closure.
    pub fn run_with<F>(&self, token: &CancellationToken, drive: F) -> Result<()>
    where
        F: FnOnce(Vec<Receiver<In>>, &[Sender<Out>]) -> Result<()>,
    {
        let (_running, Wiring { inputs, outputs }) = self.start()?;
        let result = panic::catch_unwind(AssertUnwindSafe(|| drive(inputs, &outputs)))
            .unwrap_or_else(|payload| Err(PipelineError::from_panic(self.id, payload)));
        self.finish(token, result)
    }

    /// Log and count the outcome of a run; failures are reported on `token`
    pub fn finish(&self, token: &CancellationToken, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => debug!(stage = %self.id, "stage finished"),
            Err(e) if e.is_cancelled() => debug!(stage = %self.id, reason = %e, "stage stopped"),
            Err(e) => {
                self.metrics.record_failed();
                warn!(stage = %self.id, error = %e, "stage failed");
                token.fail();
            }
        }
        result
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = StageId::next(StageKind::Transform);
        let b = StageId::next(StageKind::Zip);
        assert!(b.seq() > a.seq());
        assert_ne!(a, b);
        assert_eq!(b.kind(), StageKind::Zip);
    }

    #[test]
    fn test_id_display() {
        let id = StageId::next(StageKind::WorkerPool);
        assert_eq!(id.to_string(), format!("worker-pool-stage-{}", id.seq()));
    }

    #[test]
    fn test_start_rejects_second_run() {
        let core: StageCore<u32, u32> = StageCore::new(StageKind::Transform, StageConfig::new());
        let (guard, _wiring) = core.start().unwrap();
        assert!(core.is_running());
        assert!(matches!(core.start(), Err(PipelineError::AlreadyRunning(_))));

        drop(guard);
        assert!(!core.is_running());
        assert!(core.start().is_ok());
    }

    #[test]
    fn test_rewire_while_running_is_busy() {
        let core: StageCore<u32, u32> = StageCore::new(StageKind::Transform, StageConfig::new());
        let _rx = core.add_output().unwrap();
        let (_guard, wiring) = core.start().unwrap();
        assert_eq!(wiring.outputs.len(), 1);

        assert!(matches!(core.add_output(), Err(PipelineError::StageBusy(_))));
        assert!(matches!(core.attach(vec![]), Err(PipelineError::StageBusy(_))));
    }

    #[test]
    fn test_failure_cancels_scope_before_outputs_close() {
        let core: StageCore<u32, u32> = StageCore::new(StageKind::Transform, StageConfig::new());
        let out = core.add_output().unwrap();
        let scope = CancellationToken::new().failure_scope();

        let result = core.run_with(&scope, |_, outputs| {
            assert_eq!(outputs.len(), 1);
            Err(PipelineError::stage(core.id, "broken".into()))
        });
        assert!(matches!(result, Err(PipelineError::Stage { .. })));
        assert!(scope.is_cancelled());
        assert!(out.recv().is_err());
        assert_eq!(core.metrics.total_failed(), 1);
        assert!(!core.is_running());
    }

    #[test]
    fn test_run_with_catches_panics() {
        let core: StageCore<u32, u32> = StageCore::new(StageKind::Zip, StageConfig::new());
        let token = CancellationToken::new();

        let result = core.run_with(&token, |_, _| panic!("drive exploded"));
        assert!(matches!(
            result,
            Err(PipelineError::Panicked { stage, message }) if stage == core.id && message == "drive exploded"
        ));
        // A plain token is never cancelled by a failure.
        assert!(!token.is_cancelled());
        assert!(!core.is_running());
    }

    #[test]
    fn test_negative_output_buffer() {
        let config = StageConfig::new().with_output_buffer_size(-2);
        let core: StageCore<u32, u32> = StageCore::new(StageKind::Transform, config);
        assert!(matches!(
            core.add_output(),
            Err(PipelineError::InvalidBufferSize(-2))
        ));
    }
}
