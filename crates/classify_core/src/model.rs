use crate::config::ModelConfig;
use crate::error::ClassifyError;
use crate::label::Observation;
use crate::linear::LinearProbe;
use image::DynamicImage;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The boundary to a concrete classification model.
pub trait Scorer: Send + Sync {
    /// Runs one forward pass. Ranking of the returned observations is the model's job.
    fn score(&self, image: &DynamicImage) -> Result<Vec<Observation>, ClassifyError>;

    /// Whether `score` may run on several threads at once.
    fn is_reentrant(&self) -> bool {
        true
    }
}

/// Read-only input image shared between the caller and in-flight requests.
#[derive(Clone)]
pub struct Image(Arc<DynamicImage>);

impl Image {
    pub fn open(path: impl AsRef<Path>) -> image::ImageResult<Self> {
        Ok(Self::from(image::open(path)?))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.0
    }
}

impl From<DynamicImage> for Image {
    fn from(img: DynamicImage) -> Self {
        Self(Arc::new(img))
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "Image({w}x{h})")
    }
}

struct Loaded {
    name: String,
    scorer: Box<dyn Scorer>,
    /// Present only for non-reentrant scorers; serializes every `score` call.
    gate: Option<Mutex<()>>,
}

/// A loaded model. Clones share the same scorer; nothing about it changes after load.
#[derive(Clone)]
pub struct ModelHandle {
    inner: Arc<Loaded>,
}

impl ModelHandle {
    /// Loads the backend described by `cfg`: the linear probe, or an ONNX model when built
    /// with the `ort` feature and pointed at an `.onnx` file.
    pub fn load(cfg: &ModelConfig) -> Result<Self, ClassifyError> {
        #[cfg(feature = "ort")]
        if cfg
            .weights_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        {
            let classifier = crate::onnx::OnnxClassifier::new(cfg)?;
            tracing::info!(
                "loaded ONNX model {} from {}",
                cfg.name,
                cfg.weights_path.display()
            );
            return Ok(Self::from_scorer(cfg.name.clone(), classifier));
        }

        let probe = LinearProbe::new(cfg)?;
        tracing::info!(
            "loaded model {}: {} labels, input {}x{}",
            cfg.name,
            probe.labels().len(),
            cfg.input_size,
            cfg.input_size
        );
        Ok(Self::from_scorer(cfg.name.clone(), probe))
    }

    pub fn from_scorer(name: impl Into<String>, scorer: impl Scorer + 'static) -> Self {
        let gate = if scorer.is_reentrant() {
            None
        } else {
            Some(Mutex::new(()))
        };
        Self {
            inner: Arc::new(Loaded {
                name: name.into(),
                scorer: Box::new(scorer),
                gate,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether calls on this handle are serialized.
    pub fn is_serialized(&self) -> bool {
        self.inner.gate.is_some()
    }

    /// Blocking forward pass; must not be called from the consumer context.
    pub fn score(&self, image: &Image) -> Result<Vec<Observation>, ClassifyError> {
        match &self.inner.gate {
            Some(gate) => {
                // The gate guards no data, so poisoning is harmless.
                let _guard = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                self.inner.scorer.score(image.as_dynamic())
            }
            None => self.inner.scorer.score(image.as_dynamic()),
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.inner.name)
            .field("serialized", &self.is_serialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Tracking {
        reentrant: bool,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Tracking {
        fn new(reentrant: bool) -> Self {
            Self {
                reentrant,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl Scorer for Arc<Tracking> {
        fn score(&self, _image: &DynamicImage) -> Result<Vec<Observation>, ClassifyError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![Observation::classification("cat", 1.0)])
        }

        fn is_reentrant(&self) -> bool {
            self.reentrant
        }
    }

    fn hammer(handle: &ModelHandle) {
        let image = Image::from(DynamicImage::new_rgb8(2, 2));
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| handle.score(&image).unwrap());
            }
        });
    }

    #[test]
    fn non_reentrant_scorer_is_serialized() {
        let tracking = Arc::new(Tracking::new(false));
        let handle = ModelHandle::from_scorer("serial", tracking.clone());
        assert!(handle.is_serialized());
        hammer(&handle);
        assert_eq!(tracking.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_scorer_is_not_gated() {
        let tracking = Arc::new(Tracking::new(true));
        let handle = ModelHandle::from_scorer("parallel", tracking.clone());
        assert!(!handle.is_serialized());
        hammer(&handle);
        assert!(tracking.peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn missing_model_files_fail_to_load() {
        let cfg = ModelConfig {
            weights_path: "/nope/weights.safetensors".into(),
            ..ModelConfig::default()
        };
        let err = ModelHandle::load(&cfg).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ModelLoadFailed);
    }

    #[test]
    fn image_debug_shows_dimensions() {
        let image = Image::from(DynamicImage::new_rgb8(3, 5));
        assert_eq!(format!("{image:?}"), "Image(3x5)");
    }
}
