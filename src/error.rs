use thiserror::Error;

/// Errors surfaced by a single detection call.
///
/// Every variant is fatal to the call that produced it; the engine never
/// returns partial results.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("inference contract violated: {0}")]
    InferenceContract(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

impl DetectionError {
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        DetectionError::InvalidImage(msg.into())
    }

    pub fn contract(msg: impl Into<String>) -> Self {
        DetectionError::InferenceContract(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        DetectionError::InvalidConfiguration(msg.into())
    }
}

impl From<image::ImageError> for DetectionError {
    fn from(err: image::ImageError) -> Self {
        DetectionError::InvalidImage(err.to_string())
    }
}

pub type Result<T, E = DetectionError> = std::result::Result<T, E>;
