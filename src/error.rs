/// Convenience result type used across visemix.
pub type VisemixResult<T> = Result<T, VisemixError>;

/// Top-level error taxonomy used by pipeline APIs.
#[derive(thiserror::Error, Debug)]
pub enum VisemixError {
    /// Invalid caller-provided data: phoneme ordering, sprite resolutions,
    /// audio format, configuration values.
    #[error("validation error: {0}")]
    Validation(String),

    /// Infeasible smoothing request on the viseme timeline.
    #[error("timeline error: {0}")]
    Timeline(String),

    /// Contract breaks while compositing a frame.
    #[error("render error: {0}")]
    Render(String),

    /// Encoder subprocess failures: launch, pipe writes, non-zero exit.
    #[error("encode error: {0}")]
    Encode(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VisemixError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn timeline(msg: impl Into<String>) -> Self {
        Self::Timeline(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}
