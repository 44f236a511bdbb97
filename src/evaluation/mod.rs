//! Evaluation reports produced by the backend's evaluation task.

pub mod report;

pub use report::{
    EvaluationMetrics, EvaluationReport, MetricTargets, MetricsAssessment, QuestionResult,
    load_report,
};
