use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};

/// One ranked class produced by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationLabel {
    pub identifier: String,
    /// Model confidence in [0,1].
    pub confidence: f32,
}

impl ClassificationLabel {
    pub fn new(identifier: impl Into<String>, confidence: f32) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
        }
    }

    /// Confidence as a whole percentage, rounded half-up.
    pub fn percent(&self) -> u32 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    }

    /// Display line, e.g. `"87% cat"`.
    pub fn render(&self) -> String {
        format!("{}% {}", self.percent(), self.identifier)
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// A single raw item returned across the model boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Classification(ClassificationLabel),
    /// Embedding-style output; never valid as a classification result.
    FeatureVector(Vec<f32>),
}

impl Observation {
    pub fn classification(identifier: impl Into<String>, confidence: f32) -> Self {
        Observation::Classification(ClassificationLabel::new(identifier, confidence))
    }
}

/// Terminal result of one classification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { labels: Vec<ClassificationLabel> },
    Failure { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn success(labels: Vec<ClassificationLabel>) -> Self {
        Outcome::Success { labels }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Labels of a successful outcome, in model order.
    pub fn labels(&self) -> &[ClassificationLabel] {
        match self {
            Outcome::Success { labels } => labels,
            Outcome::Failure { .. } => &[],
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Lines a consumer shows for this outcome, in the order received.
    pub fn render_lines(&self) -> Vec<String> {
        match self {
            Outcome::Success { labels } => labels.iter().map(ClassificationLabel::render).collect(),
            Outcome::Failure { kind, message } => vec![format!("{kind}: {message}")],
        }
    }
}
