use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::stage::{Runnable, StageId};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{debug, error, info};

/// A set of wired stages run together under one cancellation scope
///
/// Wiring is done on the stages themselves before they are added; the
/// pipeline only runs them. Running consumes the pipeline.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Runnable>>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Add a stage
    pub fn add(&mut self, stage: impl Runnable + 'static) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Add several already-boxed stages
    pub fn extend<I>(&mut self, stages: I) -> &mut Self
    where
        I: IntoIterator<Item = Box<dyn Runnable>>,
    {
        self.stages.extend(stages);
        self
    }

    /// Number of stages added so far
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if no stage has been added
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Handles to every stage's counters; they stay live through the run
    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            stages: self
                .stages
                .iter()
                .map(|stage| (stage.id(), stage.metrics()))
                .collect(),
        }
    }

    /// Run every stage on its own thread until all have returned
    ///
    /// Stages run under a [failure scope](CancellationToken::failure_scope)
    /// of `token`: the first stage failure cancels every sibling, and the
    /// cancellations it causes never displace it. Returns that failure, or
    /// the cancellation outcome if the run was only cancelled, or `Ok(())`.
    pub fn run(self, token: &CancellationToken) -> Result<()> {
        let run_token = token.failure_scope();
        let landing = Landing::new();
        info!(stages = self.stages.len(), "pipeline starting");

        let (run_token, landing) = (&run_token, &landing);
        thread::scope(|s| {
            for stage in &self.stages {
                let stage: &dyn Runnable = &**stage;
                let spawned = thread::Builder::new()
                    .name(stage.id().to_string())
                    .spawn_scoped(s, move || {
                        if let Err(e) = run_caught(stage, run_token) {
                            landing.report(run_token, stage.id(), e);
                        }
                    });
                if let Err(e) = spawned {
                    landing.report(run_token, stage.id(), PipelineError::Spawn(e));
                    break;
                }
            }
        });

        match landing.take() {
            Some(e) => {
                error!(error = %e, "pipeline failed");
                Err(e)
            }
            None => {
                info!("pipeline finished");
                Ok(())
            }
        }
    }
}

/// Live counters for every stage of a pipeline
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub stages: Vec<(StageId, StageMetrics)>,
}

impl PipelineMetrics {
    /// One line per stage
    pub fn summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for (id, metrics) in &self.stages {
            summary.push_str(&format!("  {}: {}\n", id, metrics.snapshot().format()));
        }
        summary
    }
}

fn run_caught(stage: &dyn Runnable, token: &CancellationToken) -> Result<()> {
    panic::catch_unwind(AssertUnwindSafe(|| stage.run(token)))
        .unwrap_or_else(|payload| Err(PipelineError::from_panic(stage.id(), payload)))
}

/// One-slot landing zones for the first failure and the first cancellation
struct Landing {
    failure: (Sender<PipelineError>, Receiver<PipelineError>),
    cancellation: (Sender<PipelineError>, Receiver<PipelineError>),
}

impl Landing {
    fn new() -> Self {
        Self {
            failure: channel::bounded(1),
            cancellation: channel::bounded(1),
        }
    }

    /// Keep the first error of its kind and cancel the run; drop the rest
    fn report(&self, token: &CancellationToken, stage: StageId, err: PipelineError) {
        let slot = if err.is_cancelled() {
            &self.cancellation.0
        } else {
            &self.failure.0
        };
        if let Err(dropped) = slot.try_send(err) {
            debug!(%stage, error = %dropped.into_inner(), "dropping later stage error");
        }
        token.cancel();
    }

    /// The failure if any stage failed, else the first cancellation
    fn take(&self) -> Option<PipelineError> {
        self.failure
            .1
            .try_recv()
            .or_else(|_| self.cancellation.1.try_recv())
            .ok()
    }
}

/// Run one stage on its own thread, outside any pipeline
///
/// Returns the stage's result, or the cancellation outcome as soon as
/// `token` fires; the stage thread then winds down on its own.
pub fn start<R>(stage: R, token: &CancellationToken) -> Result<()>
where
    R: Runnable + 'static,
{
    let (done_tx, done_rx) = channel::bounded(1);
    let run_token = token.clone();
    let id = stage.id();
    thread::Builder::new()
        .name(stage.id().to_string())
        .spawn(move || {
            let _ = done_tx.send(run_caught(&stage, &run_token));
        })?;

    select! {
        recv(done_rx) -> result => result.unwrap_or_else(|_| {
            Err(PipelineError::Panicked {
                stage: id,
                message: "stage thread exited without a result".into(),
            })
        }),
        recv(token.cancelled()) -> _ => Err(token.error()),
    }
}
