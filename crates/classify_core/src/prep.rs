//! Loading checks and pixel/score processing shared by every model backend.

use crate::config::ModelConfig;
use crate::error::ClassifyError;
use crate::label::Observation;
use image::{DynamicImage, RgbImage, imageops::FilterType};
use std::fs;
use std::path::Path;

/// Validates the parts of `cfg` every backend depends on and returns the label list.
///
/// Fails with `ModelLoadFailed` for a missing weights or labels file, a zero `input_size`,
/// a zero `top_k` or a labels file without labels.
pub(crate) fn checked_labels(cfg: &ModelConfig) -> Result<Vec<String>, ClassifyError> {
    if !cfg.weights_path.exists() {
        return Err(ClassifyError::model_load(format!(
            "weights file missing: {}",
            cfg.weights_path.display()
        )));
    }
    if !cfg.labels_path.exists() {
        return Err(ClassifyError::model_load(format!(
            "labels file missing: {}",
            cfg.labels_path.display()
        )));
    }
    if cfg.input_size == 0 {
        return Err(ClassifyError::model_load("input_size must be positive"));
    }
    if cfg.top_k == 0 {
        return Err(ClassifyError::model_load("top_k must be at least 1"));
    }
    read_labels(&cfg.labels_path)
}

/// One label per line; blank lines are skipped and repeated lines collapse.
fn read_labels(path: &Path) -> Result<Vec<String>, ClassifyError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        ClassifyError::model_load(format!("could not read labels {}: {e}", path.display()))
    })?;
    let mut labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        return Err(ClassifyError::model_load("labels file contains no labels"));
    }
    labels.dedup();
    Ok(labels)
}

pub(crate) fn resize_to_square(img: &DynamicImage, size: u32) -> RgbImage {
    img.resize_exact(size, size, FilterType::Triangle).to_rgb8()
}

/// Per-channel lookup from an 8-bit sample to its normalized value.
pub(crate) struct ChannelNorm {
    table: Box<[[f32; 256]; 3]>,
}

impl ChannelNorm {
    pub(crate) fn new(mean: [f32; 3], std: [f32; 3]) -> Self {
        let mut table = Box::new([[0.0f32; 256]; 3]);
        for (c, row) in table.iter_mut().enumerate() {
            let scale = 1.0 / std[c];
            for (sample, slot) in row.iter_mut().enumerate() {
                *slot = (sample as f32 / 255.0 - mean[c]) * scale;
            }
        }
        Self { table }
    }

    pub(crate) fn get(&self, channel: usize, sample: u8) -> f32 {
        self.table[channel][sample as usize]
    }
}

/// Turns raw scores into probabilities. A degenerate input leaves every entry at zero.
pub(crate) fn softmax_in_place(scores: &mut [f32]) {
    let Some(peak) = scores.iter().copied().max_by(f32::total_cmp) else {
        return;
    };
    let mut total = 0.0f32;
    for s in scores.iter_mut() {
        *s = (*s - peak).exp();
        total += *s;
    }
    if total.is_finite() && total > 0.0 {
        scores.iter_mut().for_each(|s| *s /= total);
    } else {
        scores.fill(0.0);
    }
}

/// Softmax over `logits`, then the `top_k` best labels, most confident first.
pub(crate) fn rank(labels: &[String], mut logits: Vec<f32>, top_k: usize) -> Vec<Observation> {
    softmax_in_place(&mut logits);
    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| logits[b].total_cmp(&logits[a]));
    order
        .into_iter()
        .take(top_k)
        .map(|idx| Observation::classification(labels[idx].clone(), logits[idx]))
        .collect()
}
