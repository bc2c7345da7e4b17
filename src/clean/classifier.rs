//! Subject classification seam for the cleaning pipeline.
//!
//! The pipeline only needs a yes/no-with-confidence verdict per image, so
//! the classifier is a trait object and the actual model lives behind it.
//! [`FixedClassifier`] is the built-in implementation: it returns a
//! configured verdict for every image, which is what the default pipeline
//! runs with (classification disabled, everything passes) and what tests
//! use to exercise the threshold logic.

use thiserror::Error;

/// Classifier failure for a single image.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The classifier could not reach a verdict for these bytes.
    #[error("classifier inconclusive: {0}")]
    Inconclusive(String),

    /// The classifier backend itself failed.
    #[error("classifier backend error: {0}")]
    Backend(String),
}

/// Verdict for one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Whether the image depicts the harvested subject at all.
    pub is_target_subject: bool,
    /// Model confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// Decides whether an image depicts the target subject.
pub trait SubjectClassifier {
    /// Classifies the raw image bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError`] when no verdict is possible; whether
    /// that rejects or keeps the image is the pipeline's strictness call.
    fn classify(&self, bytes: &[u8]) -> Result<Classification, ClassifierError>;
}

/// Classifier that returns the same verdict for every image.
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier {
    verdict: Classification,
}

impl FixedClassifier {
    /// A classifier with the given fixed verdict.
    #[must_use]
    pub fn new(is_target_subject: bool, confidence: f32) -> Self {
        Self {
            verdict: Classification {
                is_target_subject,
                confidence,
            },
        }
    }

    /// Passes every image with full confidence.
    #[must_use]
    pub fn accept_all() -> Self {
        Self::new(true, 1.0)
    }
}

impl SubjectClassifier for FixedClassifier {
    fn classify(&self, _bytes: &[u8]) -> Result<Classification, ClassifierError> {
        Ok(self.verdict)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_classifier_returns_configured_verdict() {
        let classifier = FixedClassifier::new(true, 0.42);
        let verdict = classifier.classify(b"anything").unwrap();
        assert!(verdict.is_target_subject);
        assert!((verdict.confidence - 0.42).abs() < f32::EPSILON);
    }

    #[test]
    fn test_accept_all_is_confident() {
        let verdict = FixedClassifier::accept_all().classify(&[]).unwrap();
        assert!(verdict.is_target_subject);
        assert!(verdict.confidence >= 1.0);
    }
}
