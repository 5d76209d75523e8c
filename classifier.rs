use crate::error::{Error, Result};
use crate::models::{ImageBuffer, Recognition};
use std::path::Path;
use std::sync::Arc;

const UNKNOWN_LABEL: &str = "unknown";

/// A loaded model that turns a fixed-size image into ranked recognitions.
///
/// Implementations must tolerate concurrent calls to [`Classifier::recognize`].
pub trait Classifier: Send + Sync {
    /// Results are ordered by descending confidence and truncated to the model's top-K.
    fn recognize(&self, image: &ImageBuffer) -> Result<Vec<Recognition>>;

    /// Edge length of the square input the model expects.
    fn input_size(&self) -> u32;

    fn name(&self) -> &str;
}

/// Builds a [`Classifier`] from its bundled resources. Called at most once at a time.
pub trait ClassifierLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn Classifier>>;

    fn input_size(&self) -> u32;
}

/// Output labels of a model, indexed by line number of the labels file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::ModelLoad(format!("Failed to read labels from {}: {e}", path.display()))
        })?;
        let labels = Self::parse(&contents);
        if labels.is_empty() {
            return Err(Error::ModelLoad(format!(
                "Labels file is empty: {}",
                path.display()
            )));
        }
        log::debug!("Loaded {} labels from {}", labels.len(), path.display());
        Ok(labels)
    }

    /// Blank lines keep their slot so indices stay aligned with the model output.
    pub fn parse(contents: &str) -> Self {
        let mut names: Vec<String> = contents.lines().map(|l| l.trim().to_string()).collect();
        while names.last().is_some_and(|l| l.is_empty()) {
            names.pop();
        }
        Self { names }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Pairs raw model scores with labels and keeps the best `max_results` above `threshold`.
pub fn rank_scores(
    scores: &[f32],
    labels: &Labels,
    max_results: usize,
    threshold: f32,
) -> Vec<Recognition> {
    if scores.len() > labels.len() {
        log::warn!(
            "Model produced {} scores for {} labels; extra classes are reported as {UNKNOWN_LABEL}",
            scores.len(),
            labels.len()
        );
    }
    let mut scored: Vec<(usize, f32)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan() && *score > threshold)
        .collect();
    // Stable sort keeps the lower class index first on ties.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(max_results);
    scored
        .into_iter()
        .map(|(index, score)| Recognition::new(labels.get(index).unwrap_or(UNKNOWN_LABEL), score))
        .collect()
}
