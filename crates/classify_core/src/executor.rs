use crate::config::ExecutorConfig;
use crate::dispatch::ResultDispatcher;
use crate::error::{ClassifyError, ConfigError};
use crate::label::{ClassificationLabel, Observation, Outcome};
use crate::model::{Image, ModelHandle};
use crate::request::{ClassificationRequest, RequestHandle};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs scoring on a background pool and completes each request exactly once.
#[derive(Clone)]
pub struct InferenceExecutor {
    pool: Arc<ThreadPool>,
    dispatcher: ResultDispatcher,
}

impl InferenceExecutor {
    pub fn new(cfg: &ExecutorConfig, dispatcher: ResultDispatcher) -> Result<Self, ConfigError> {
        let prefix = cfg.thread_name.clone();
        let mut builder = ThreadPoolBuilder::new()
            .thread_name(move |i| format!("{prefix}-{i}"))
            .panic_handler(|payload| {
                error!("worker task panicked: {}", panic_message(&*payload));
            });
        if cfg.worker_threads > 0 {
            builder = builder.num_threads(cfg.worker_threads);
        }
        let pool = builder.build()?;
        info!(
            "inference pool started with {} threads",
            pool.current_num_threads()
        );
        Ok(Self {
            pool: Arc::new(pool),
            dispatcher,
        })
    }

    pub fn dispatcher(&self) -> &ResultDispatcher {
        &self.dispatcher
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Starts `request` and returns without waiting for the result.
    ///
    /// An owner's start notice is queued on the calling thread before scoring is scheduled.
    /// Once scored, the request goes back through the dispatcher and completes on the
    /// consumer context, never on a pool thread.
    pub fn submit(&self, mut request: ClassificationRequest) -> RequestHandle {
        let handle = request.handle();
        request.start();
        if let Some(owner) = request.owner() {
            self.dispatcher.notify_started(owner, request.id());
        }
        debug!(
            "{} queued on {} ({:?})",
            request.id(),
            request.model().name(),
            request.image()
        );
        let dispatcher = self.dispatcher.clone();
        self.pool.spawn(move || {
            let started = Instant::now();
            let outcome = classify(request.model(), request.image());
            debug!(
                "{} finished in {:.1?}, success={}",
                request.id(),
                started.elapsed(),
                outcome.is_success()
            );
            dispatcher.finish(request, outcome);
        });
        handle
    }
}

/// Scores `image` and folds every failure mode into an [`Outcome`]. Blocking.
pub fn classify(model: &ModelHandle, image: &Image) -> Outcome {
    let scored = panic::catch_unwind(AssertUnwindSafe(|| model.score(image)));
    let result = match scored {
        Ok(Ok(observations)) => into_labels(observations),
        Ok(Err(ClassifyError::ModelLoad(msg))) => Err(ClassifyError::Inference(msg)),
        Ok(Err(e)) => Err(e),
        Err(payload) => Err(ClassifyError::inference(format!(
            "model panicked: {}",
            panic_message(&*payload)
        ))),
    };
    match result {
        Ok(labels) => Outcome::success(labels),
        Err(e) => {
            warn!("classification with {} failed: {e}", model.name());
            Outcome::failure(e.kind(), e.message())
        }
    }
}

/// Accepts only a non-empty list of well-formed classifications. Order is kept as given.
fn into_labels(observations: Vec<Observation>) -> Result<Vec<ClassificationLabel>, ClassifyError> {
    if observations.is_empty() {
        return Err(ClassifyError::unexpected_shape("model returned no results"));
    }
    let mut labels = Vec::with_capacity(observations.len());
    for (idx, obs) in observations.into_iter().enumerate() {
        match obs {
            Observation::Classification(label) if label.is_well_formed() => labels.push(label),
            Observation::Classification(label) => {
                return Err(ClassifyError::unexpected_shape(format!(
                    "result {idx} ({}) has confidence {} outside [0,1]",
                    label.identifier, label.confidence
                )));
            }
            Observation::FeatureVector(values) => {
                return Err(ClassifyError::unexpected_shape(format!(
                    "result {idx} is a feature vector of length {}, not a classification",
                    values.len()
                )));
            }
        }
    }
    Ok(labels)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
