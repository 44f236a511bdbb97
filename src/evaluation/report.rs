//! Evaluation report model and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{ClientError, ClientResult};

/// Payload name used in validation errors.
const REPORT_PAYLOAD: &str = "evaluation report";

/// Aggregated metrics over every evaluated question.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Mean answer latency in seconds.
    pub avg_latency: f64,
    /// Mean relevance score in `[0, 1]`.
    pub avg_relevance: f64,
    /// Mean keyword coverage in `[0, 1]`.
    pub avg_coverage: f64,
    /// Share of successful answers in `[0, 1]`.
    pub success_rate: f64,
}

/// Per-question evaluation outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    /// Question asked.
    pub question: String,
    /// Answer produced.
    pub answer: String,
    /// Latency in seconds.
    pub latency: f64,
    /// Relevance score in `[0, 1]`.
    pub relevance: f64,
    /// Keyword coverage in `[0, 1]`.
    pub coverage: f64,
    /// Whether the answer met the success criteria.
    pub success: bool,
}

/// Complete evaluation report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// When the evaluation ran (ISO 8601).
    pub timestamp: String,
    /// Aggregated metrics.
    pub metrics: EvaluationMetrics,
    /// Per-question results.
    pub questions: Vec<QuestionResult>,
}

impl EvaluationReport {
    /// Parse and validate a report from raw JSON.
    ///
    /// # Errors
    /// Returns `InvalidPayload` if the shape is wrong, `InvalidValue` if a number is out of range.
    pub fn from_json(body: &[u8]) -> ClientResult<Self> {
        let report: Self = crate::api::types::decode_payload(REPORT_PAYLOAD, body)?;
        report.validate()?;
        Ok(report)
    }

    /// Check value constraints that the JSON shape alone cannot express.
    ///
    /// # Errors
    /// Returns `InvalidValue` naming the first violated constraint.
    pub fn validate(&self) -> ClientResult<()> {
        check_non_negative("metrics.avg_latency", self.metrics.avg_latency)?;
        check_fraction("metrics.avg_relevance", self.metrics.avg_relevance)?;
        check_fraction("metrics.avg_coverage", self.metrics.avg_coverage)?;
        check_fraction("metrics.success_rate", self.metrics.success_rate)?;

        for (index, question) in self.questions.iter().enumerate() {
            check_non_negative(&format!("questions[{index}].latency"), question.latency)?;
            check_fraction(&format!("questions[{index}].relevance"), question.relevance)?;
            check_fraction(&format!("questions[{index}].coverage"), question.coverage)?;
        }

        Ok(())
    }

    /// Number of questions answered successfully.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.questions.iter().filter(|q| q.success).count()
    }

    /// Assess the aggregated metrics against targets.
    #[must_use]
    pub fn assess(&self, targets: &MetricTargets) -> MetricsAssessment {
        MetricsAssessment {
            latency_ok: self.metrics.avg_latency <= targets.max_latency_seconds,
            relevance_ok: self.metrics.avg_relevance >= targets.min_relevance,
            coverage_ok: self.metrics.avg_coverage >= targets.min_coverage,
        }
    }
}

fn check_non_negative(field: &str, value: f64) -> ClientResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ClientError::InvalidValue {
            payload: REPORT_PAYLOAD,
            reason: format!("{field} must be a finite non-negative number, got {value}"),
        })
    }
}

fn check_fraction(field: &str, value: f64) -> ClientResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ClientError::InvalidValue {
            payload: REPORT_PAYLOAD,
            reason: format!("{field} must be within [0, 1], got {value}"),
        })
    }
}

/// Load a report previously exported as a `.json` file.
///
/// # Errors
/// Returns an error if the file is not JSON, unreadable, or fails validation.
pub async fn load_report(path: impl AsRef<Path>) -> ClientResult<EvaluationReport> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return Err(ClientError::InvalidValue {
            payload: REPORT_PAYLOAD,
            reason: format!("{} is not a .json file", path.display()),
        });
    }

    let body = tokio::fs::read(path).await?;
    EvaluationReport::from_json(&body)
}

/// Quality targets for aggregated metrics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricTargets {
    /// Maximum acceptable mean latency (seconds).
    pub max_latency_seconds: f64,
    /// Minimum acceptable mean relevance.
    pub min_relevance: f64,
    /// Minimum acceptable mean coverage.
    pub min_coverage: f64,
}

impl Default for MetricTargets {
    fn default() -> Self {
        Self {
            max_latency_seconds: 3.0,
            min_relevance: 0.8,
            min_coverage: 0.7,
        }
    }
}

/// Pass/fail of each metric against its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricsAssessment {
    /// Mean latency within target.
    pub latency_ok: bool,
    /// Mean relevance within target.
    pub relevance_ok: bool,
    /// Mean coverage within target.
    pub coverage_ok: bool,
}

impl MetricsAssessment {
    /// Whether every metric meets its target.
    #[must_use]
    pub const fn all_ok(&self) -> bool {
        self.latency_ok && self.relevance_ok && self.coverage_ok
    }
}
