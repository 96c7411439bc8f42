//! ONNX Runtime backend for exported image classifiers (`ort` feature).

use crate::config::ModelConfig;
use crate::error::ClassifyError;
use crate::label::Observation;
use crate::model::Scorer;
use crate::prep::{ChannelNorm, checked_labels, rank, resize_to_square};
use image::DynamicImage;
use ndarray::{Array4, CowArray};
use once_cell::sync::OnceCell;
use ort::{
    GraphOptimizationLevel, SessionBuilder, environment::Environment, session::Session,
    tensor::OrtOwnedTensor, value::Value,
};
use std::sync::Arc;

static ORT_ENV: OnceCell<Arc<Environment>> = OnceCell::new();

fn environment() -> Result<Arc<Environment>, ClassifyError> {
    ORT_ENV
        .get_or_try_init(|| {
            Environment::builder()
                .with_name("classify")
                .build()
                .map(|env| env.into_arc())
        })
        .cloned()
        .map_err(|e| ClassifyError::model_load(format!("ONNX Runtime unavailable: {e}")))
}

/// Softmax classifier exported to ONNX, input `[1, 3, size, size]`, output `[1, classes]`.
pub struct OnnxClassifier {
    session: Session,
    labels: Vec<String>,
    input_size: u32,
    norm: ChannelNorm,
    top_k: usize,
}

impl OnnxClassifier {
    pub fn new(cfg: &ModelConfig) -> Result<Self, ClassifyError> {
        let labels = checked_labels(cfg)?;
        let env = environment()?;
        let session = SessionBuilder::new(&env)
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level1))
            .and_then(|b| b.with_model_from_file(&cfg.weights_path))
            .map_err(|e| ClassifyError::model_load(format!("could not open session: {e}")))?;

        Ok(Self {
            session,
            labels,
            input_size: cfg.input_size,
            norm: ChannelNorm::new(cfg.mean, cfg.std),
            top_k: cfg.top_k,
        })
    }

    fn prepare_input(&self, img: &DynamicImage) -> Array4<f32> {
        let size = self.input_size;
        let resized = resize_to_square(img, size);
        let mut array = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, &sample) in pixel.0.iter().enumerate() {
                array[[0, c, y as usize, x as usize]] = self.norm.get(c, sample);
            }
        }
        array
    }

    fn run(&self, image: &DynamicImage) -> Result<Vec<f32>, ort::OrtError> {
        let tensor = self.prepare_input(image).into_dyn();
        let cow = CowArray::from(tensor.view());
        let input = Value::from_array(self.session.allocator(), &cow)?;
        let outputs: Vec<Value> = self.session.run(vec![input])?;
        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };
        let logits: OrtOwnedTensor<f32, _> = first.try_extract()?;
        let scores = logits.view().iter().cloned().collect();
        Ok(scores)
    }
}

impl Scorer for OnnxClassifier {
    fn score(&self, image: &DynamicImage) -> Result<Vec<Observation>, ClassifyError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifyError::inference("image has no pixels"));
        }
        let scores = self
            .run(image)
            .map_err(|e| ClassifyError::inference(format!("onnx session failed: {e}")))?;
        if scores.len() != self.labels.len() {
            return Err(ClassifyError::unexpected_shape(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.labels.len()
            )));
        }
        Ok(rank(&self.labels, scores, self.top_k))
    }

    fn is_reentrant(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_model_file_fails_to_load() {
        let cfg = ModelConfig {
            weights_path: "/nope/classifier.onnx".into(),
            ..ModelConfig::default()
        };
        let err = OnnxClassifier::new(&cfg).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::ModelLoadFailed);
        assert!(err.message().starts_with("weights file missing"));
    }

    #[rstest]
    #[case::zero_input_size(0, 5)]
    #[case::zero_top_k(224, 0)]
    fn bad_sizes_are_rejected_before_opening_a_session(
        #[case] input_size: u32,
        #[case] top_k: usize,
    ) {
        let dir = tempdir().unwrap();
        let weights_path = dir.path().join("classifier.onnx");
        let labels_path = dir.path().join("labels.txt");
        fs::write(&weights_path, b"not onnx").unwrap();
        fs::write(&labels_path, "cat\ndog\n").unwrap();
        let cfg = ModelConfig {
            weights_path,
            labels_path,
            input_size,
            top_k,
            ..ModelConfig::default()
        };
        let err = OnnxClassifier::new(&cfg).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::ModelLoadFailed);
    }
}
