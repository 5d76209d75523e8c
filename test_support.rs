use crate::classifier::{rank_scores, Classifier, ClassifierLoader, Labels};
use crate::error::{Error, Result};
use crate::models::{ImageBuffer, Recognition};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const TEST_INPUT_SIZE: u32 = 8;

pub fn same_instance(a: &Arc<dyn Classifier>, b: &Arc<dyn Classifier>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Classifier that always sees the same raw scores.
pub struct FixedScores {
    labels: Labels,
    scores: Vec<f32>,
    input_size: u32,
    delay: Duration,
    panics: bool,
}

impl FixedScores {
    pub fn new(labels: &[&str], scores: &[f32]) -> Self {
        Self {
            labels: Labels::new(labels.iter().map(|s| s.to_string()).collect()),
            scores: scores.to_vec(),
            input_size: TEST_INPUT_SIZE,
            delay: Duration::ZERO,
            panics: false,
        }
    }

    pub fn pets() -> Self {
        Self::new(&["cat", "dog", "fish"], &[0.2, 0.9, 0.5])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

impl Classifier for FixedScores {
    fn recognize(&self, image: &ImageBuffer) -> Result<Vec<Recognition>> {
        if self.panics {
            panic!("model kernel crashed");
        }
        thread::sleep(self.delay);
        if image.width() != self.input_size || image.height() != self.input_size {
            return Err(Error::InvalidArgument("wrong input geometry".into()));
        }
        Ok(rank_scores(&self.scores, &self.labels, 3, 0.1))
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn name(&self) -> &str {
        "fixed-scores"
    }
}

type Factory = Box<dyn Fn() -> FixedScores + Send + Sync>;

/// Loader that can be slowed down, made to depend on a resource file, or made to panic.
pub struct CountingLoader {
    delay: Duration,
    required: Option<PathBuf>,
    panics_left: AtomicUsize,
    factory: Factory,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            required: None,
            panics_left: AtomicUsize::new(0),
            factory: Box::new(FixedScores::pets),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requiring(mut self, path: &Path) -> Self {
        self.required = Some(path.to_path_buf());
        self
    }

    /// Panics on the first `times` loads, then behaves normally.
    pub fn panicking(self, times: usize) -> Self {
        self.panics_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn producing(mut self, factory: impl Fn() -> FixedScores + Send + Sync + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }
}

impl ClassifierLoader for CountingLoader {
    fn load(&self) -> Result<Arc<dyn Classifier>> {
        thread::sleep(self.delay);
        let panicking = self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panicking {
            panic!("runtime library failed to load");
        }
        if let Some(path) = &self.required {
            if !path.exists() {
                return Err(Error::ModelLoad(format!("Model not found: {}", path.display())));
            }
        }
        Ok(Arc::new((self.factory)()))
    }

    fn input_size(&self) -> u32 {
        TEST_INPUT_SIZE
    }
}
