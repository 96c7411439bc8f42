use crate::config::ModelConfig;
use crate::error::{ClassifyError, ErrorKind};
use crate::executor::InferenceExecutor;
use crate::label::Outcome;
use crate::model::{Image, ModelHandle};
use crate::owner::OwnerId;
use crate::request::{ClassificationRequest, RequestHandle};
use tracing::{debug, error};

/// A loaded model bound to an executor. Only exists if the model loaded.
///
/// Submitting again before earlier requests finish is allowed: requests run concurrently and
/// complete independently.
pub struct ClassificationService {
    model: ModelHandle,
    executor: InferenceExecutor,
}

impl ClassificationService {
    /// Runs `load` once. On failure `owner` receives a single `ModelLoadFailed` outcome and
    /// the error is returned.
    pub fn start<F>(
        load: F,
        executor: InferenceExecutor,
        owner: OwnerId,
    ) -> Result<Self, ClassifyError>
    where
        F: FnOnce() -> Result<ModelHandle, ClassifyError>,
    {
        match load() {
            Ok(model) => Ok(Self { model, executor }),
            Err(err) => {
                let err = match err {
                    ClassifyError::ModelLoad(_) => err,
                    other => ClassifyError::ModelLoad(other.message().to_string()),
                };
                error!("model unavailable: {err}");
                executor.dispatcher().deliver(
                    owner,
                    None,
                    Outcome::failure(ErrorKind::ModelLoadFailed, err.message()),
                );
                Err(err)
            }
        }
    }

    pub fn from_config(
        cfg: &ModelConfig,
        executor: InferenceExecutor,
        owner: OwnerId,
    ) -> Result<Self, ClassifyError> {
        Self::start(|| ModelHandle::load(cfg), executor, owner)
    }

    /// Fire-and-forget: the start notice and the outcome reach `owner` on the consumer context.
    pub fn submit(&self, owner: OwnerId, image: Image) -> RequestHandle {
        debug!("submitting {image:?} to {}", self.model.name());
        self.executor
            .submit(ClassificationRequest::for_owner(&self.model, image, owner))
    }
}
