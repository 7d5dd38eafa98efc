//! Server-side submission gate.
//!
//! Every string field of a submission is run through the detector.  All
//! fields are checked, so a single response lists every offending field.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detector::UrlDetector;

/// Message attached to each invalidated field unless configured otherwise.
pub const DEFAULT_FIELD_MESSAGE: &str = "URLs are not allowed in this field.";

/// One posted field.  Values are kept as JSON because hosts post arrays for
/// multi-choice inputs; only string values are inspected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub name: String,
    pub value: Value,
}

impl FieldValue {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::String(value.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Narrow interface a form host calls before accepting a submission.
/// An empty result means the submission is allowed.
pub trait SubmissionGate: Send + Sync {
    fn validate(&self, fields: &[FieldValue]) -> Vec<FieldError>;
}

#[derive(Clone, Debug)]
pub struct SubmissionValidator {
    detector: Arc<UrlDetector>,
    message: String,
}

impl SubmissionValidator {
    pub fn new(detector: Arc<UrlDetector>, message: impl Into<String>) -> Self {
        Self {
            detector,
            message: message.into(),
        }
    }

    pub fn detector(&self) -> &UrlDetector {
        &self.detector
    }

    /// Validate a JSON object of `name -> value`, the shape hosts post.
    pub fn validate_map(&self, fields: &serde_json::Map<String, Value>) -> Vec<FieldError> {
        let fields: Vec<FieldValue> = fields
            .iter()
            .map(|(name, value)| FieldValue {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        self.validate(&fields)
    }
}

impl Default for SubmissionValidator {
    fn default() -> Self {
        Self::new(Arc::new(UrlDetector::default()), DEFAULT_FIELD_MESSAGE)
    }
}

impl SubmissionGate for SubmissionValidator {
    fn validate(&self, fields: &[FieldValue]) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for field in fields {
            let Some(text) = field.value.as_str() else {
                continue;
            };
            if self.detector.contains_url(text) {
                tracing::debug!(field = %field.name, "field contains url");
                errors.push(FieldError {
                    field: field.name.clone(),
                    message: self.message.clone(),
                });
            }
        }
        errors
    }
}
