use serde::Deserialize;

/// Default capacity of every output conduit a stage creates
pub const DEFAULT_OUTPUT_BUFFER_SIZE: isize = 10;

/// Default number of workers in a worker pool
pub const DEFAULT_WORKER_COUNT: isize = 10;

/// Default capacity of the merged input of a multi-input stage
pub const DEFAULT_INPUT_BUFFER_SIZE: isize = 0;

/// Per-stage sizing, fixed when the stage is constructed
///
/// Sizes are signed so configuration loaded from outside can be validated;
/// negative buffer sizes are rejected with
/// [`PipelineError::InvalidBufferSize`](crate::PipelineError::InvalidBufferSize)
/// when the conduit is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Capacity of the conduit that merges a stage's inputs
    pub input_buffer_size: isize,
    /// Capacity of each output conduit
    pub output_buffer_size: isize,
    /// Number of concurrent workers (worker pools only)
    pub worker_count: isize,
}

impl StageConfig {
    /// Create a config with the default sizes
    pub fn new() -> Self {
        Self {
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }

    /// Set the merged input capacity
    pub fn with_input_buffer_size(mut self, size: isize) -> Self {
        self.input_buffer_size = size;
        self
    }

    /// Set the capacity of each output conduit
    pub fn with_output_buffer_size(mut self, size: isize) -> Self {
        self.output_buffer_size = size;
        self
    }

    /// Set the worker count
    pub fn with_worker_count(mut self, count: isize) -> Self {
        self.worker_count = count;
        self
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StageConfig::default();
        assert_eq!(config.input_buffer_size, 0);
        assert_eq!(config.output_buffer_size, 10);
        assert_eq!(config.worker_count, 10);
    }

    #[test]
    fn test_builder() {
        let config = StageConfig::new()
            .with_input_buffer_size(4)
            .with_output_buffer_size(1)
            .with_worker_count(2);
        assert_eq!(config.input_buffer_size, 4);
        assert_eq!(config.output_buffer_size, 1);
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StageConfig = serde_json::from_str(r#"{"worker_count": 3}"#).unwrap();
        assert_eq!(config, StageConfig::new().with_worker_count(3));
    }
}
