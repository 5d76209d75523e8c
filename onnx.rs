use crate::classifier::{rank_scores, Classifier, Labels};
use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use crate::models::{ImageBuffer, Recognition};
use crate::preprocess::{to_input_tensor, TensorLayout};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Mutex;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputs};
use ort::value::TensorRef;

#[cfg(target_os = "windows")]
use ort::execution_providers::{DirectMLExecutionProvider, ExecutionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceProvider {
    Cpu,
    DirectML { device_id: u32 },
}

impl InferenceProvider {
    pub fn label(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::DirectML { .. } => "GPU (DirectML)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderChoice {
    Auto,
    CpuOnly,
    DirectMlOnly,
}

/// ONNX Runtime backed classifier.
pub struct OrtClassifier {
    session: Mutex<Session>,
    labels: Labels,
    input_size: u32,
    image_mean: f32,
    image_std: f32,
    layout: TensorLayout,
    input_name: String,
    output_name: String,
    max_results: usize,
    threshold: f32,
    name: String,
}

impl OrtClassifier {
    pub fn load(config: &ClassifierConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(Error::ModelLoad(format!(
                "Model not found: {}",
                config.model_path.display()
            )));
        }
        if config.input_size == 0 {
            return Err(Error::ModelLoad("input_size must be positive".into()));
        }
        let labels = Labels::load(&config.labels_path)?;
        let (session, provider) = build_session(&config.model_path, config)?;
        let name = config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx")
            .to_string();
        log::info!(
            "Loaded {} ({} labels) on {}",
            config.model_path.display(),
            labels.len(),
            provider.label()
        );
        Ok(Self {
            session: Mutex::new(session),
            labels,
            input_size: config.input_size,
            image_mean: config.image_mean,
            image_std: config.image_std,
            layout: config.layout,
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            max_results: config.max_results,
            threshold: config.threshold,
            name,
        })
    }

    fn run_scores(&self, image: &ImageBuffer) -> Result<Vec<f32>> {
        let tensor = to_input_tensor(image, self.image_mean, self.image_std, self.layout)?;
        let dims: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
        let data = tensor
            .as_slice()
            .ok_or_else(|| Error::Inference("input tensor is not contiguous".into()))?;
        let input = TensorRef::from_array_view((dims, data))
            .map_err(|e| Error::Inference(format!("Invalid input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let inputs: SessionInputs<'_, '_, 0> =
            SessionInputs::ValueMap(vec![(Cow::Borrowed(self.input_name.as_str()), input.into())]);
        let outputs = session
            .run(inputs)
            .map_err(|e| Error::Inference(format!("Failed to run {}: {e}", self.name)))?;
        let value = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            Error::Inference(format!("Model has no output named '{}'", self.output_name))
        })?;
        let (_, scores) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Inference(format!("Unexpected output tensor: {e}")))?;
        Ok(scores.to_vec())
    }
}

impl Classifier for OrtClassifier {
    fn recognize(&self, image: &ImageBuffer) -> Result<Vec<Recognition>> {
        if image.width() != self.input_size || image.height() != self.input_size {
            return Err(Error::InvalidArgument(format!(
                "{} expects {size}x{size} input, got {}x{}",
                self.name,
                image.width(),
                image.height(),
                size = self.input_size
            )));
        }
        let scores = self.run_scores(image)?;
        if scores.is_empty() {
            log::warn!("{} returned no scores", self.name);
        }
        Ok(rank_scores(
            &scores,
            &self.labels,
            self.max_results,
            self.threshold,
        ))
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Runs an `ort` call that may panic, e.g. when the runtime library cannot be loaded.
fn guarded<T>(what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(_) => Err(Error::ModelLoad(format!("ONNX Runtime panicked while {what}"))),
    }
}

fn ensure_environment(config: &ClassifierConfig) -> Result<()> {
    if let Some(dylib) = &config.ort_dylib_path {
        if std::env::var_os("ORT_DYLIB_PATH").is_none() {
            std::env::set_var("ORT_DYLIB_PATH", dylib);
        }
    }
    guarded("loading the runtime library", || {
        ort::init()
            .with_name("photo-recognizer")
            .commit()
            .map_err(|e| Error::ModelLoad(format!("Failed to init ORT environment: {e}")))?;
        Ok(())
    })
}

fn build_session(model_path: &Path, config: &ClassifierConfig) -> Result<(Session, InferenceProvider)> {
    ensure_environment(config)?;
    #[cfg_attr(not(target_os = "windows"), allow(unused_variables))]
    let device_id = config.device_id.unwrap_or(0);

    let try_build = |use_dml: bool| -> Result<Session> {
        let build = || -> Result<Session> {
            let mut builder = Session::builder()
                .map_err(|e| Error::ModelLoad(format!("{e}")))?
                .with_optimization_level(GraphOptimizationLevel::Level1)
                .map_err(|e| Error::ModelLoad(format!("{e}")))?;
            if let Some(threads) = config.intra_threads {
                builder = builder
                    .with_intra_threads(threads)
                    .map_err(|e| Error::ModelLoad(format!("{e}")))?;
            }
            if use_dml {
                #[cfg(target_os = "windows")]
                {
                    builder = builder
                        .with_memory_pattern(false)
                        .map_err(|e| Error::ModelLoad(format!("{e}")))?;
                    let ep = DirectMLExecutionProvider::default()
                        .with_device_id(device_id as i32)
                        .build();
                    builder = builder
                        .with_execution_providers([ep])
                        .map_err(|e| Error::ModelLoad(format!("{e}")))?;
                }
            }
            builder
                .commit_from_file(model_path)
                .map_err(|e| Error::ModelLoad(format!("{}: {e}", model_path.display())))
        };
        guarded("building the session", build)
    };

    let wants_dml = matches!(
        config.provider,
        ProviderChoice::Auto | ProviderChoice::DirectMlOnly
    );
    #[cfg(target_os = "windows")]
    {
        let dml_available = guarded("probing DirectML", || {
            Ok(DirectMLExecutionProvider::default().is_available().unwrap_or(false))
        })
        .unwrap_or(false);
        if wants_dml && dml_available {
            match try_build(true) {
                Ok(session) => return Ok((session, InferenceProvider::DirectML { device_id })),
                Err(err) => log::warn!("DirectML session failed: {err}"),
            }
        }
    }

    if config.provider == ProviderChoice::DirectMlOnly {
        return Err(Error::ModelLoad(format!(
            "DirectML execution provider unavailable for {}",
            model_path.display()
        )));
    }
    if wants_dml && cfg!(target_os = "windows") {
        log::warn!(
            "DirectML execution provider unavailable; falling back to CPU for {}",
            model_path.display()
        );
    }

    let session = try_build(false)?;
    Ok((session, InferenceProvider::Cpu))
}
