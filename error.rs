use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Model Load Error: {0}")]
    ModelLoad(String),

    #[error("Invalid Argument: {0}")]
    InvalidArgument(String),

    #[error("Inference Error: {0}")]
    Inference(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("Pipeline Unavailable: {0}")]
    Unavailable(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
}
