use crate::classifier::Classifier;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::models::{
    ImageBuffer, PipelineEvent, Recognition, STATUS_FINISH, STATUS_INFERENCE,
    STATUS_PREPROCESSING, STATUS_PROCESSING, STATUS_START,
};
use crate::preprocess::scale_to_square;
use crate::provider::ClassifierProvider;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named threads draining a bounded job queue.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Job>(capacity.max(1));
        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("recognizer-worker-{index}"))
                .spawn(move || {
                    for job in rx.iter() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            log::warn!("Worker job panicked; continuing");
                        }
                    }
                })?;
            handles.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            handles,
        })
    }

    /// Queues `job` without blocking the caller.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Unavailable("worker pool is shut down".into()))?;
        match tx.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Unavailable("worker queue is full".into())),
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::Unavailable("worker pool is shut down".into()))
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(Error::Canceled("invocation canceled before inference".into()));
        }
        Ok(())
    }
}

/// Producer side of one invocation. Emits exactly one terminal event, even when dropped early.
struct EventSink<T> {
    id: Uuid,
    tx: Sender<PipelineEvent<T>>,
    finished: bool,
}

impl<T> EventSink<T> {
    fn status(&self, message: &str) {
        let _ = self.tx.send(PipelineEvent::Status(message.to_string()));
    }

    fn finish(mut self, outcome: Result<T>) {
        self.finished = true;
        let event = match outcome {
            Ok(value) => {
                log::debug!("Invocation {} completed", self.id);
                PipelineEvent::Result(value)
            }
            Err(err) => {
                log::warn!("Invocation {} failed: {err}", self.id);
                PipelineEvent::Failure(err)
            }
        };
        let _ = self.tx.send(event);
    }
}

impl<T> Drop for EventSink<T> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!("Invocation {} abandoned before completion", self.id);
            let _ = self.tx.send(PipelineEvent::Failure(Error::Unavailable(
                "invocation abandoned before completion".into(),
            )));
        }
    }
}

/// Consumer side of one invocation: a lazy, ordered stream of events ending with a terminal one.
pub struct Invocation<T = Vec<Recognition>> {
    id: Uuid,
    events: Receiver<PipelineEvent<T>>,
    cancel: CancelToken,
    done: bool,
}

fn open<T>(cancel: CancelToken) -> (Invocation<T>, EventSink<T>) {
    let id = Uuid::new_v4();
    let (tx, rx) = unbounded();
    let invocation = Invocation {
        id,
        events: rx,
        cancel,
        done: false,
    };
    let sink = EventSink {
        id,
        tx,
        finished: false,
    };
    (invocation, sink)
}

impl<T> Invocation<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Requests cancellation; honored before inference starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Raw channel, for multiplexing several invocations with `crossbeam_channel::Select`.
    pub fn receiver(&self) -> &Receiver<PipelineEvent<T>> {
        &self.events
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn try_next(&mut self) -> Option<PipelineEvent<T>> {
        if self.done {
            return None;
        }
        match self.events.try_recv() {
            Ok(event) => Some(self.observe(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.done = true;
                None
            }
        }
    }

    /// Drains status events and returns the terminal outcome.
    pub fn wait(self) -> Result<T> {
        for event in self {
            match event {
                PipelineEvent::Status(_) => continue,
                PipelineEvent::Result(value) => return Ok(value),
                PipelineEvent::Failure(err) => return Err(err),
            }
        }
        Err(Error::Unavailable(
            "event stream closed without a terminal event".into(),
        ))
    }

    fn observe(&mut self, event: PipelineEvent<T>) -> PipelineEvent<T> {
        if event.is_terminal() {
            self.done = true;
        }
        event
    }
}

impl<T> Iterator for Invocation<T> {
    type Item = PipelineEvent<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.events.recv() {
            Ok(event) => Some(self.observe(event)),
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

/// Counts live inference threads spawned for time-limited runs.
///
/// A run that outlives its limit keeps its slot until it returns, so a hung
/// model exhausts the slots and later runs are rejected instead of piling up
/// more threads behind it.
#[derive(Debug, Clone)]
struct InferenceSlots {
    live: Arc<AtomicUsize>,
    limit: usize,
}

struct SlotGuard(Arc<AtomicUsize>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InferenceSlots {
    fn new(limit: usize) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            limit: limit.max(1),
        }
    }

    fn try_acquire(&self) -> Option<SlotGuard> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()
            .map(|_| SlotGuard(Arc::clone(&self.live)))
    }
}

/// Runs preprocessing and inference on a worker pool and reports each invocation as staged events.
pub struct InferencePipeline {
    provider: Arc<ClassifierProvider>,
    pool: WorkerPool,
    timeout: Option<Duration>,
    slots: InferenceSlots,
}

impl InferencePipeline {
    pub fn new(provider: Arc<ClassifierProvider>, config: &PipelineConfig) -> Result<Self> {
        let pool = WorkerPool::new(config.workers, config.queue_capacity)?;
        log::debug!(
            "Pipeline started with {} workers, queue capacity {}",
            config.workers.max(1),
            config.queue_capacity.max(1)
        );
        Ok(Self {
            provider,
            pool,
            timeout: config.inference_timeout(),
            slots: InferenceSlots::new(config.workers),
        })
    }

    pub fn provider(&self) -> &Arc<ClassifierProvider> {
        &self.provider
    }

    /// Builds the classifier ahead of any request, reporting `processing` then `finish`.
    pub fn initialize(&self) -> Invocation<()> {
        let (invocation, sink) = open::<()>(CancelToken::new());
        let provider = self.provider.clone();
        self.dispatch(invocation.id(), move || {
            sink.status(STATUS_PROCESSING);
            match provider.get_or_create() {
                Ok(_) => {
                    sink.status(STATUS_FINISH);
                    sink.finish(Ok(()));
                }
                Err(err) => sink.finish(Err(err)),
            }
        });
        invocation
    }

    pub fn classify(&self, image: ImageBuffer) -> Invocation {
        self.classify_with(image, CancelToken::new())
    }

    pub fn classify_with(&self, image: ImageBuffer, cancel: CancelToken) -> Invocation {
        let (invocation, sink) = open(cancel.clone());
        sink.status(STATUS_START);
        let provider = self.provider.clone();
        let timeout = self.timeout;
        let slots = self.slots.clone();
        log::debug!(
            "Invocation {} queued for a {}x{} image",
            invocation.id(),
            image.width(),
            image.height()
        );
        self.dispatch(invocation.id(), move || {
            let outcome = run_classification(&provider, image, &sink, &cancel, timeout, &slots);
            sink.finish(outcome);
        });
        invocation
    }

    fn dispatch(&self, id: Uuid, job: impl FnOnce() + Send + 'static) {
        // A rejected job is dropped together with its sink, which reports the failure.
        if let Err(err) = self.pool.execute(job) {
            log::warn!("Invocation {id} rejected: {err}");
        }
    }
}

fn run_classification(
    provider: &ClassifierProvider,
    image: ImageBuffer,
    sink: &EventSink<Vec<Recognition>>,
    cancel: &CancelToken,
    timeout: Option<Duration>,
    slots: &InferenceSlots,
) -> Result<Vec<Recognition>> {
    sink.status(STATUS_PREPROCESSING);
    let input = scale_to_square(&image, i64::from(provider.input_size()))?;
    drop(image);

    cancel.check()?;
    let classifier = provider.get_or_create()?;
    cancel.check()?;

    sink.status(STATUS_INFERENCE);
    match timeout {
        Some(limit) => recognize_with_timeout(classifier, input, limit, slots),
        None => recognize(classifier.as_ref(), &input),
    }
}

fn recognize(classifier: &dyn Classifier, input: &ImageBuffer) -> Result<Vec<Recognition>> {
    catch_unwind(AssertUnwindSafe(|| classifier.recognize(input)))
        .unwrap_or_else(|_| Err(Error::Inference("classifier panicked".into())))
}

/// Runs inference on its own thread and stops waiting after `limit`.
///
/// The thread is left to finish on its own when the limit expires. At most
/// one thread per worker is alive at a time; while they are all busy, for
/// example behind a hung model, new runs fail with `Unavailable`.
fn recognize_with_timeout(
    classifier: Arc<dyn Classifier>,
    input: ImageBuffer,
    limit: Duration,
    slots: &InferenceSlots,
) -> Result<Vec<Recognition>> {
    let slot = slots.try_acquire().ok_or_else(|| {
        Error::Unavailable("earlier inference runs are still in progress".into())
    })?;
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("recognizer-inference".into())
        .spawn(move || {
            let _slot = slot;
            let _ = tx.send(recognize(classifier.as_ref(), &input));
        })?;
    match rx.recv_timeout(limit) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(limit)),
        Err(RecvTimeoutError::Disconnected) => Err(Error::Inference(
            "inference thread exited without a result".into(),
        )),
    }
}
