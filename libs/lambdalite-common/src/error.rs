use thiserror::Error;

/// Error taxonomy shared by the engine, the API and the CLI.
///
/// Timeouts and non-zero exits of user code are normally carried inside an
/// `InvocationResult`; the `ExecutionTimeout` / `ExecutionFailed` variants only
/// appear when a caller converts such a result into an error.
#[derive(Error, Debug)]
pub enum FaasError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Unsupported runtime: {0}")]
    UnsupportedRuntime(String),

    #[error("No code provided")]
    NoCodeProvided,

    #[error("Source code exceeds maximum size of {limit} bytes (got {size})")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("Invalid timeout: {0} seconds (must be greater than zero)")]
    InvalidTimeout(u64),

    #[error("Image build failed: {0}")]
    ImageBuild(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("{0}")]
    ExecutionTimeout(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Metrics persistence error: {0}")]
    MetricsPersistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FaasError {
    /// Errors raised before any container resource is touched.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            FaasError::UnsupportedLanguage(_)
                | FaasError::UnsupportedRuntime(_)
                | FaasError::NoCodeProvided
                | FaasError::SourceTooLarge { .. }
                | FaasError::InvalidTimeout(_)
        )
    }
}

impl From<::redis::RedisError> for FaasError {
    fn from(e: ::redis::RedisError) -> Self {
        FaasError::MetricsPersistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FaasError>;
