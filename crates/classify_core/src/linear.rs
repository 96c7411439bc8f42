//! Dense linear classifier over normalized pixels, evaluated with candle on CPU.

use crate::config::ModelConfig;
use crate::error::ClassifyError;
use crate::label::Observation;
use crate::model::Scorer;
use crate::prep::{ChannelNorm, checked_labels, rank, resize_to_square};
use candle_core::{DType, Device, Tensor};
use image::DynamicImage;

pub struct LinearProbe {
    /// `[features, classes]`, stored transposed so scoring is one matmul.
    weight_t: Tensor,
    bias: Tensor,
    labels: Vec<String>,
    input_size: u32,
    norm: ChannelNorm,
    top_k: usize,
    device: Device,
}

impl LinearProbe {
    pub fn new(cfg: &ModelConfig) -> Result<Self, ClassifyError> {
        let labels = checked_labels(cfg)?;
        let device = Device::Cpu;
        let mut tensors = candle_core::safetensors::load(&cfg.weights_path, &device)
            .map_err(|e| {
                ClassifyError::model_load(format!(
                    "could not read {}: {e}",
                    cfg.weights_path.display()
                ))
            })?;
        let weight = take_f32(&mut tensors, "weight")?;
        let bias = take_f32(&mut tensors, "bias")?;

        let side = cfg.input_size as usize;
        let features = 3 * side * side;
        let classes = labels.len();
        if weight.dims() != [classes, features].as_slice() {
            return Err(ClassifyError::model_load(format!(
                "weight has shape {:?}, expected [{classes}, {features}]",
                weight.dims()
            )));
        }
        if bias.dims() != [classes].as_slice() {
            return Err(ClassifyError::model_load(format!(
                "bias has shape {:?}, expected [{classes}]",
                bias.dims()
            )));
        }
        let weight_t = weight
            .t()
            .and_then(|t| t.contiguous())
            .map_err(|e| ClassifyError::model_load(e.to_string()))?;

        Ok(Self {
            weight_t,
            bias,
            labels,
            input_size: cfg.input_size,
            norm: ChannelNorm::new(cfg.mean, cfg.std),
            top_k: cfg.top_k,
            device,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn prepare_input(&self, img: &DynamicImage) -> Vec<f32> {
        let resized = resize_to_square(img, self.input_size);
        let plane = (self.input_size * self.input_size) as usize;
        let mut input = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = (y * self.input_size + x) as usize;
            for (c, &sample) in pixel.0.iter().enumerate() {
                input[c * plane + offset] = self.norm.get(c, sample);
            }
        }
        input
    }

    fn logits(&self, input: Vec<f32>) -> candle_core::Result<Vec<f32>> {
        let len = input.len();
        Tensor::from_vec(input, (1, len), &self.device)?
            .matmul(&self.weight_t)?
            .broadcast_add(&self.bias)?
            .flatten_all()?
            .to_vec1::<f32>()
    }
}

impl Scorer for LinearProbe {
    fn score(&self, image: &DynamicImage) -> Result<Vec<Observation>, ClassifyError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifyError::inference("image has no pixels"));
        }
        let input = self.prepare_input(image);
        let logits = self
            .logits(input)
            .map_err(|e| ClassifyError::inference(format!("forward pass failed: {e}")))?;
        Ok(rank(&self.labels, logits, self.top_k))
    }
}

fn take_f32(
    tensors: &mut std::collections::HashMap<String, Tensor>,
    name: &str,
) -> Result<Tensor, ClassifyError> {
    tensors
        .remove(name)
        .ok_or_else(|| ClassifyError::model_load(format!("tensor `{name}` not found")))?
        .to_dtype(DType::F32)
        .map_err(|e| ClassifyError::model_load(format!("tensor `{name}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::collections::HashMap;
    use tempfile::{TempDir, tempdir};

    const SIDE: usize = 2;
    const FEATURES: usize = 3 * SIDE * SIDE;

    fn write_model(dir: &TempDir, labels: &str, weight: Tensor, bias: Tensor) -> ModelConfig {
        let weights_path = dir.path().join("probe.safetensors");
        let labels_path = dir.path().join("labels.txt");
        let mut tensors = HashMap::new();
        tensors.insert("weight", weight);
        tensors.insert("bias", bias);
        candle_core::safetensors::save(&tensors, &weights_path).unwrap();
        fs::write(&labels_path, labels).unwrap();
        ModelConfig {
            name: "probe".into(),
            weights_path,
            labels_path,
            input_size: SIDE as u32,
            ..ModelConfig::default()
        }
    }

    fn bias(values: Vec<f32>) -> Tensor {
        let len = values.len();
        Tensor::from_vec(values, len, &Device::Cpu).unwrap()
    }

    fn labels_of(obs: &[Observation]) -> Vec<&str> {
        obs.iter()
            .map(|o| match o {
                Observation::Classification(l) => l.identifier.as_str(),
                Observation::FeatureVector(_) => panic!("feature vector from linear probe"),
            })
            .collect()
    }

    #[test]
    fn ranks_by_probability_descending() {
        let dir = tempdir().unwrap();
        let weight = Tensor::zeros((3, FEATURES), DType::F32, &Device::Cpu).unwrap();
        let cfg = write_model(&dir, "bird\ncat\ndog\n", weight, bias(vec![0.0, 2.0, 1.0]));
        let probe = LinearProbe::new(&cfg).unwrap();

        let obs = probe.score(&DynamicImage::new_rgb8(5, 7)).unwrap();
        assert_eq!(labels_of(&obs), vec!["cat", "dog", "bird"]);
        let Observation::Classification(top) = &obs[0] else {
            unreachable!()
        };
        assert_relative_eq!(top.confidence, 0.665_241, epsilon = 1e-4);
    }

    #[test]
    fn pixel_content_drives_the_ranking() {
        let dir = tempdir().unwrap();
        let plane = SIDE * SIDE;
        let mut w = vec![0.0f32; 3 * FEATURES];
        // row 0 looks at the red plane, row 2 at the green plane
        for i in 0..plane {
            w[i] = 1.0;
            w[2 * FEATURES + plane + i] = 1.0;
        }
        let weight = Tensor::from_vec(w, (3, FEATURES), &Device::Cpu).unwrap();
        let cfg = write_model(&dir, "red\nblank\ngreen", weight, bias(vec![0.0; 3]));
        let probe = LinearProbe::new(&cfg).unwrap();

        let red = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
        let obs = probe.score(&DynamicImage::ImageRgb8(red)).unwrap();
        assert_eq!(labels_of(&obs), vec!["red", "blank", "green"]);
    }

    #[test]
    fn top_k_truncates() {
        let dir = tempdir().unwrap();
        let weight = Tensor::zeros((3, FEATURES), DType::F32, &Device::Cpu).unwrap();
        let mut cfg = write_model(&dir, "a\nb\nc", weight, bias(vec![3.0, 2.0, 1.0]));
        cfg.top_k = 2;
        let probe = LinearProbe::new(&cfg).unwrap();
        let obs = probe.score(&DynamicImage::new_rgb8(2, 2)).unwrap();
        assert_eq!(labels_of(&obs), vec!["a", "b"]);
    }

    #[test]
    fn zero_sized_image_is_inference_failure() {
        let dir = tempdir().unwrap();
        let weight = Tensor::zeros((1, FEATURES), DType::F32, &Device::Cpu).unwrap();
        let cfg = write_model(&dir, "only", weight, bias(vec![0.0]));
        let probe = LinearProbe::new(&cfg).unwrap();
        let err = probe.score(&DynamicImage::new_rgb8(0, 0)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InferenceFailed);
    }

    #[test]
    fn shape_mismatch_fails_to_load() {
        let dir = tempdir().unwrap();
        let weight = Tensor::zeros((2, FEATURES), DType::F32, &Device::Cpu).unwrap();
        let cfg = write_model(&dir, "a\nb\nc", weight, bias(vec![0.0; 3]));
        let err = LinearProbe::new(&cfg).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::ModelLoadFailed);
        assert!(err.message().contains("weight has shape"));
    }

    #[test]
    fn blank_labels_file_fails_to_load() {
        let dir = tempdir().unwrap();
        let weight = Tensor::zeros((1, FEATURES), DType::F32, &Device::Cpu).unwrap();
        let cfg = write_model(&dir, "\n  \n", weight, bias(vec![0.0]));
        let err = LinearProbe::new(&cfg).err().unwrap();
        assert_eq!(err.message(), "labels file contains no labels");
    }

    #[test]
    fn corrupt_weights_fail_to_load() {
        let dir = tempdir().unwrap();
        let weights_path = dir.path().join("broken.safetensors");
        let labels_path = dir.path().join("labels.txt");
        fs::write(&weights_path, b"not a tensor file").unwrap();
        fs::write(&labels_path, "a\n").unwrap();
        let cfg = ModelConfig {
            weights_path,
            labels_path,
            ..ModelConfig::default()
        };
        let err = LinearProbe::new(&cfg).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::ModelLoadFailed);
    }
}
