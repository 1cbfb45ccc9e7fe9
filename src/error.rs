use crate::stage::StageId;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type returned by user-supplied stage functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while wiring or running stages
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Stage accepts exactly one input conduit
    #[error("{0}: worker pool requires exactly one input")]
    RequiresSingleInput(StageId),

    /// Stage exposes exactly one output conduit
    #[error("{0}: worker pool exposes exactly one output")]
    RequiresSingleOutput(StageId),

    /// Merge called without any input conduit
    #[error("cannot merge an empty set of inputs")]
    EmptyInputSet,

    /// Buffer size below zero
    #[error("invalid buffer size: {0}")]
    InvalidBufferSize(isize),

    /// Wiring attempted while the stage is running
    #[error("{0}: stage is running and cannot be rewired")]
    StageBusy(StageId),

    /// Stage invoked while a previous run is still in flight
    #[error("{0}: stage is already running")]
    AlreadyRunning(StageId),

    /// Stage has no input side
    #[error("{0}: stage has no inputs")]
    NoInputCapability(StageId),

    /// Stage has no output side
    #[error("{0}: stage has no outputs")]
    NoOutputCapability(StageId),

    /// Zip stage started without inputs
    #[error("{0}: zip has no input conduits")]
    NoZipInput(StageId),

    /// One zip input ended while others still had values
    #[error("{0}: zip input closed before its siblings")]
    ZipInputClosed(StageId),

    /// A user function failed inside a stage
    #[error("{stage}: {source}")]
    Stage {
        stage: StageId,
        #[source]
        source: BoxError,
    },

    /// The run was cancelled
    #[error("pipeline cancelled")]
    Cancelled,

    /// The run outlived the deadline carried by its token
    #[error("pipeline deadline exceeded")]
    DeadlineExceeded,

    /// A stage thread could not be started
    #[error("failed to spawn stage thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A stage thread panicked
    #[error("{stage}: panicked: {message}")]
    Panicked { stage: StageId, message: String },
}

impl PipelineError {
    /// Wrap a user-function error with the stage it came from
    pub fn stage(stage: StageId, source: BoxError) -> Self {
        Self::Stage { stage, source }
    }

    /// Check if this error is a cancellation outcome rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// The stage this error originated from, if any
    pub fn stage_id(&self) -> Option<StageId> {
        match self {
            Self::RequiresSingleInput(id)
            | Self::RequiresSingleOutput(id)
            | Self::StageBusy(id)
            | Self::AlreadyRunning(id)
            | Self::NoInputCapability(id)
            | Self::NoOutputCapability(id)
            | Self::NoZipInput(id)
            | Self::ZipInputClosed(id) => Some(*id),
            Self::Stage { stage, .. } | Self::Panicked { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub(crate) fn from_panic(stage: StageId, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked { stage, message }
    }
}
