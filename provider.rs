use crate::classifier::{Classifier, ClassifierLoader};
use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use crate::onnx::OrtClassifier;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

/// Loads the bundled ONNX model and its labels.
pub struct OnnxBundleLoader {
    config: ClassifierConfig,
}

impl OnnxBundleLoader {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }
}

impl ClassifierLoader for OnnxBundleLoader {
    fn load(&self) -> Result<Arc<dyn Classifier>> {
        Ok(Arc::new(OrtClassifier::load(&self.config)?))
    }

    fn input_size(&self) -> u32 {
        self.config.input_size
    }
}

/// Owns the process-wide classifier and builds it on first use.
///
/// Construction runs under a mutex, so concurrent callers wait for the attempt
/// in flight and then share its instance. A failed attempt leaves the slot
/// empty and the next caller tries again.
pub struct ClassifierProvider {
    loader: Box<dyn ClassifierLoader>,
    building: Mutex<()>,
    instance: OnceLock<Arc<dyn Classifier>>,
    constructions: AtomicUsize,
}

impl ClassifierProvider {
    pub fn new(loader: Box<dyn ClassifierLoader>) -> Self {
        Self {
            loader,
            building: Mutex::new(()),
            instance: OnceLock::new(),
            constructions: AtomicUsize::new(0),
        }
    }

    pub fn onnx(config: ClassifierConfig) -> Self {
        Self::new(Box::new(OnnxBundleLoader::new(config)))
    }

    /// Blocks while another caller is constructing. Never call this from an interactive thread.
    pub fn get_or_create(&self) -> Result<Arc<dyn Classifier>> {
        if let Some(classifier) = self.get() {
            return Ok(classifier);
        }
        let _building = self
            .building
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(classifier) = self.get() {
            return Ok(classifier);
        }

        let attempt = self.constructions.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("Constructing classifier (attempt {attempt})");
        let started = Instant::now();
        match self.construct() {
            Ok(classifier) => {
                log::info!(
                    "Classifier {} ready in {:?}",
                    classifier.name(),
                    started.elapsed()
                );
                let _ = self.instance.set(Arc::clone(&classifier));
                Ok(classifier)
            }
            Err(err) => {
                log::warn!("Classifier construction failed: {err}");
                Err(err)
            }
        }
    }

    fn construct(&self) -> Result<Arc<dyn Classifier>> {
        let classifier = catch_unwind(AssertUnwindSafe(|| self.loader.load())).unwrap_or_else(|_| {
            Err(Error::ModelLoad("classifier loader panicked".into()))
        })?;
        let expected = self.loader.input_size();
        if classifier.input_size() != expected {
            return Err(Error::ModelLoad(format!(
                "{} expects {}px input but the pipeline scales to {expected}px",
                classifier.name(),
                classifier.input_size()
            )));
        }
        Ok(classifier)
    }

    /// Returns the classifier without waiting if it has already been built.
    pub fn get(&self) -> Option<Arc<dyn Classifier>> {
        self.instance.get().map(Arc::clone)
    }

    pub fn is_ready(&self) -> bool {
        self.instance.get().is_some()
    }

    pub fn input_size(&self) -> u32 {
        self.loader.input_size()
    }

    /// Number of construction attempts started so far, failed ones included.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}
