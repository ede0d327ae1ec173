//! Normalization of raw quality-scorer reports.
//!
//! Missing or non-numeric metrics count as `0.0` so that a broken scorer
//! pushes the loop toward more refinement, never toward a silent pass.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metrics every report is expected to carry.
pub const REQUIRED_METRICS: [&str; 5] = [
    "completeness",
    "technical_accuracy",
    "clarity",
    "code_quality",
    "engagement",
];

pub const OVERALL_SCORE: &str = "overall_score";

/// Normalized scores of one validation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub completeness: f64,
    pub technical_accuracy: f64,
    pub clarity: f64,
    pub code_quality: f64,
    pub engagement: f64,
    pub overall_score: f64,
}

impl QualityScores {
    /// The five required metrics with their names.
    pub fn metrics(&self) -> [(&'static str, f64); 5] {
        let values = [
            self.completeness,
            self.technical_accuracy,
            self.clarity,
            self.code_quality,
            self.engagement,
        ];
        std::array::from_fn(|i| (REQUIRED_METRICS[i], values[i]))
    }

    pub fn mean(&self) -> f64 {
        let metrics = self.metrics();
        metrics.iter().map(|(_, v)| v).sum::<f64>() / metrics.len() as f64
    }
}

/// The scorer returned something that is not a JSON object.
#[derive(Debug, Error)]
#[error("unparsable quality report: {0}")]
pub struct ValidationParseError(pub String);

/// Parse a raw report, applying the defaulting rules.
pub fn parse_report(raw: &serde_json::Value) -> Result<QualityScores, ValidationParseError> {
    let obj = raw.as_object().ok_or_else(|| {
        ValidationParseError(format!("expected an object, got {}", kind_of(raw)))
    })?;
    let metric = |name: &str| obj.get(name).and_then(serde_json::Value::as_f64).unwrap_or(0.0);

    let [completeness, technical_accuracy, clarity, code_quality, engagement] =
        REQUIRED_METRICS.map(metric);
    let mut scores = QualityScores {
        completeness,
        technical_accuracy,
        clarity,
        code_quality,
        engagement,
        overall_score: metric(OVERALL_SCORE),
    };

    let any_nonzero = scores.metrics().iter().any(|(_, v)| *v != 0.0);
    if scores.overall_score == 0.0 && any_nonzero {
        scores.overall_score = scores.mean();
    }
    Ok(scores)
}

fn kind_of(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
