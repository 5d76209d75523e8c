pub mod classifier;
pub mod config;
pub mod error;
pub mod format;
pub mod models;
pub mod onnx;
pub mod pipeline;
pub mod preprocess;
pub mod provider;
pub mod source;

#[cfg(test)]
mod test_support;

pub use crate::classifier::{Classifier, ClassifierLoader, Labels};
pub use crate::config::{ClassifierConfig, ModelBundle, PipelineConfig, Settings};
pub use crate::error::{Error, Result};
pub use crate::models::{ImageBuffer, PipelineEvent, PixelFormat, Recognition};
pub use crate::pipeline::{CancelToken, InferencePipeline, Invocation};
pub use crate::provider::ClassifierProvider;
