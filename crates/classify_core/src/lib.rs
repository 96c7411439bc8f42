//! Asynchronous single-image classification.
//!
//! A [`ModelHandle`] is loaded once, each image becomes a [`ClassificationRequest`], the
//! [`InferenceExecutor`] scores it on a worker pool, and the [`ResultDispatcher`] hands the
//! [`Outcome`] to the [`ConsumerContext`], which calls the registered [`Owner`] if it is still
//! alive.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod label;
pub mod linear;
pub mod model;
#[cfg(feature = "ort")]
pub mod onnx;
pub mod owner;
mod prep;
pub mod request;
pub mod service;
#[cfg(test)]
mod testing;

pub use config::{ExecutorConfig, ModelConfig, PipelineConfig};
pub use dispatch::{ConsumerContext, ConsumerEvent, Delivery, ResultDispatcher};
pub use error::{ClassifyError, ConfigError, ErrorKind};
pub use executor::{InferenceExecutor, classify};
pub use label::{ClassificationLabel, Observation, Outcome};
pub use model::{Image, ModelHandle, Scorer};
pub use owner::{Owner, OwnerId, OwnerRegistry};
pub use request::{ClassificationRequest, RequestHandle, RequestId, RequestState};
pub use service::ClassificationService;
