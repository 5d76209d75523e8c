use crate::error::Result;
use crate::onnx::ProviderChoice;
use crate::preprocess::TensorLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MODELS_DIR_ENV: &str = "PHOTO_RECOGNIZER_MODELS_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub input_size: u32,
    pub image_mean: f32,
    pub image_std: f32,
    pub input_name: String,
    pub output_name: String,
    pub layout: TensorLayout,
    pub max_results: usize,
    pub threshold: f32,
    pub provider: ProviderChoice,
    pub device_id: Option<u32>,
    pub intra_threads: Option<usize>,
    pub ort_dylib_path: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("inception.onnx"),
            labels_path: PathBuf::from("imagenet_comp_graph_label_strings.txt"),
            input_size: 224,
            image_mean: 117.0,
            image_std: 1.0,
            input_name: "input".into(),
            output_name: "output".into(),
            layout: TensorLayout::Nhwc,
            max_results: 3,
            threshold: 0.1,
            provider: ProviderChoice::Auto,
            device_id: None,
            intra_threads: None,
            ort_dylib_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub inference_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            inference_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&data)?;
        Ok(settings)
    }
}

/// Location of the bundled model resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBundle {
    pub root: PathBuf,
}

impl ModelBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn discover() -> Self {
        match std::env::var_os(MODELS_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::new("models"),
        }
    }

    pub fn resolve(&self, name: &Path) -> PathBuf {
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            self.root.join(name)
        }
    }

    /// Returns a copy of `config` with the model and label paths anchored in this bundle.
    pub fn apply(&self, config: &ClassifierConfig) -> ClassifierConfig {
        let mut resolved = config.clone();
        resolved.model_path = self.resolve(&config.model_path);
        resolved.labels_path = self.resolve(&config.labels_path);
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_inception_geometry() {
        let cfg = ClassifierConfig::default();
        assert_eq!(cfg.input_size, 224);
        assert_eq!(cfg.image_mean, 117.0);
        assert_eq!(cfg.image_std, 1.0);
        assert_eq!(cfg.input_name, "input");
        assert_eq!(cfg.output_name, "output");
        assert_eq!(cfg.layout, TensorLayout::Nhwc);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "classifier": { "input_size": 299, "threshold": 0.3 }, "pipeline": { "inference_timeout_ms": 500 } }"#,
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.classifier.input_size, 299);
        assert_eq!(settings.classifier.threshold, 0.3);
        assert_eq!(settings.classifier.max_results, 3);
        assert_eq!(settings.pipeline.workers, 2);
        assert_eq!(
            settings.pipeline.inference_timeout(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn malformed_settings_are_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(crate::error::Error::Json(_))
        ));
    }

    #[test]
    fn bundle_resolves_relative_paths_only() {
        let bundle = ModelBundle::new("/opt/models");
        let cfg = ClassifierConfig {
            labels_path: PathBuf::from("/abs/labels.txt"),
            ..ClassifierConfig::default()
        };
        let resolved = bundle.apply(&cfg);
        assert_eq!(resolved.model_path, PathBuf::from("/opt/models/inception.onnx"));
        assert_eq!(resolved.labels_path, PathBuf::from("/abs/labels.txt"));
    }
}
