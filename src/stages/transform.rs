use super::ProcessFn;
use crate::cancel::CancellationToken;
use crate::conduit::{self, Receiver, Sender};
use crate::config::StageConfig;
use crate::error::{BoxError, Result};
use crate::fanout::{broadcast, merge};
use crate::metrics::StageMetrics;
use crate::stage::{Runnable, Stage, StageCore, StageId, StageKind};
use std::sync::Arc;

/// Applies a function to every value from its merged inputs and broadcasts
/// each result to all of its outputs
///
/// Stops on the first processing error. Outputs are closed on every exit
/// path so downstream stages observe the shutdown.
pub struct Transform<In, Out> {
    inner: Arc<TransformInner<In, Out>>,
}

struct TransformInner<In, Out> {
    core: StageCore<In, Out>,
    process: ProcessFn<In, Out>,
}

impl<In, Out> Clone for Transform<In, Out> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<In, Out> Transform<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + 'static,
{
    /// Create a transform with the default config
    pub fn new<F>(process: F) -> Self
    where
        F: Fn(In) -> std::result::Result<Out, BoxError> + Send + Sync + 'static,
    {
        Self::with_config(process, StageConfig::default())
    }

    /// Create a transform with a custom config
    pub fn with_config<F>(process: F, config: StageConfig) -> Self
    where
        F: Fn(In) -> std::result::Result<Out, BoxError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(TransformInner {
                core: StageCore::new(StageKind::Transform, config),
                process: Box::new(process),
            }),
        }
    }
}

impl<In, Out> TransformInner<In, Out>
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
        let input = merge(token, inputs, self.core.config.input_buffer_size)?;

        while let Some(value) = conduit::recv(token, &input)? {
            self.core.metrics.record_received();
            let result = self.core.invoke(|| (self.process)(value))?;
            broadcast(token, outputs, result)?;
        }
        Ok(())
    }
}

impl<In, Out> Runnable for Transform<In, Out>
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

impl<In, Out> Stage<In, Out> for Transform<In, Out>
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crossbeam::channel::bounded;
    use std::thread;
    use std::time::Duration;

    fn feed(values: Vec<u32>) -> Receiver<u32> {
        let (tx, rx) = bounded(values.len());
        for v in values {
            tx.send(v).unwrap();
        }
        rx
    }

    #[test]
    fn test_transform_broadcasts_to_every_output() {
        let stage = Transform::new(|x: u32| Ok(x * 2));
        stage.attach_input(vec![feed(vec![1, 2, 3])]).unwrap();
        let a = stage.create_output().unwrap();
        let b = stage.create_output().unwrap();

        stage.run(&CancellationToken::new()).unwrap();

        assert_eq!(a.iter().collect::<Vec<_>>(), vec![2, 4, 6]);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![2, 4, 6]);
        assert_eq!(stage.metrics().total_emitted(), 3);
    }

    #[test]
    fn test_transform_merges_inputs() {
        let stage = Transform::new(|x: u32| Ok(x));
        stage
            .attach_input(vec![feed(vec![1, 2]), feed(vec![10, 20])])
            .unwrap();
        let out = stage.create_output().unwrap();

        stage.run(&CancellationToken::new()).unwrap();

        let mut seen: Vec<u32> = out.iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 10, 20]);
    }

    #[test]
    fn test_transform_error_is_wrapped_and_outputs_closed() {
        let stage = Transform::new(|x: u32| {
            if x == 2 {
                Err("bad value".into())
            } else {
                Ok(x)
            }
        });
        stage.attach_input(vec![feed(vec![1, 2, 3])]).unwrap();
        let out = stage.create_output().unwrap();

        let err = stage.run(&CancellationToken::new()).unwrap_err();
        assert!(matches!(&err, PipelineError::Stage { stage: id, .. } if *id == stage.id()));
        assert!(err.to_string().ends_with("bad value"));
        assert_eq!(out.iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(stage.metrics().total_failed(), 1);
    }

    #[test]
    fn test_transform_without_inputs_fails_and_closes_outputs() {
        let stage = Transform::new(|x: u32| Ok(x));
        let out = stage.create_output().unwrap();

        assert!(matches!(
            stage.run(&CancellationToken::new()),
            Err(PipelineError::EmptyInputSet)
        ));
        assert!(out.recv().is_err());
    }

    #[test]
    fn test_transform_rejects_reentry_and_rewiring() {
        let stage = Transform::new(|x: u32| Ok(x));
        // Input that stays open keeps the stage running.
        let (_hold, rx) = bounded::<u32>(0);
        stage.attach_input(vec![rx]).unwrap();

        let token = CancellationToken::new();
        let handle = {
            let stage = stage.clone();
            let token = token.clone();
            thread::spawn(move || stage.run(&token))
        };
        while !stage.inner.core.is_running() {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(matches!(
            stage.run(&token),
            Err(PipelineError::AlreadyRunning(_))
        ));
        assert!(matches!(
            stage.create_output(),
            Err(PipelineError::StageBusy(_))
        ));

        token.cancel();
        assert!(matches!(
            handle.join().unwrap(),
            Err(PipelineError::Cancelled)
        ));
    }
}
