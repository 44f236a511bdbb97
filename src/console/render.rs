//! Plain-text rendering for the console.

use std::fmt::Write as _;

use crate::api::types::{DocumentResult, HealthStatus, MessageRole, SearchResponse};
use crate::core::ids::SessionId;
use crate::evaluation::{EvaluationReport, MetricTargets};
use crate::monitoring::HealthSnapshot;
use crate::session::registry::SessionSummary;
use crate::session::state::ChatMessage;
use crate::tasks::poller::TaskEvent;
use crate::tasks::task::{TaskKind, TaskMetrics, TaskStatus};

/// Command summary printed by `/help`.
pub const HELP: &str = "\
Type a question to chat. Commands:
  /search <query>        semantic search without conversation
  /health                backend health
  /sessions              list conversations
  /select <id|#n>        switch conversation
  /new                   start a new conversation
  /clear                 delete the current conversation on the server
  /remove <id|#n>        forget a conversation locally
  /topk [n]              show or set the number of sources (1-20)
  /rebuild [api-key]     rebuild the vector index
  /evaluate [test-file]  run an evaluation
  /report [file.json]    show a saved report, or the last evaluation
  /help                  this help
  /quit                  exit";

/// `0.912` -> `91.2%`.
#[must_use]
pub fn similarity(score: f64) -> String {
    format!("{:.1}%", score * 100.0)
}

/// Seconds, shown in milliseconds under one second.
#[must_use]
pub fn latency(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.0}ms", seconds * 1000.0)
    } else {
        format!("{seconds:.2}s")
    }
}

fn sources(out: &mut String, documents: &[DocumentResult]) {
    for (i, doc) in documents.iter().enumerate() {
        let _ = write!(out, "\n    [{}] {} ({})", i + 1, doc.title, similarity(doc.similarity));
    }
}

/// One conversation line, prefixed by its speaker.
#[must_use]
pub fn message(message: &ChatMessage) -> String {
    let speaker = match (message.role, message.is_notice()) {
        (_, true) => "!",
        (MessageRole::User, false) => "you>",
        (MessageRole::Assistant, false) => "rag>",
    };
    let mut out = format!("{speaker} {}", message.content);
    sources(&mut out, &message.sources);
    out
}

/// Numbered session list; the active one is starred.
#[must_use]
pub fn sessions(entries: &[SessionSummary], active: Option<&SessionId>) -> String {
    if entries.is_empty() {
        return "No saved conversations.".to_string();
    }
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        let marker = if Some(&entry.id) == active { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{marker} #{:<2} {}  {}  ({})",
            i + 1,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.title,
            entry.id
        );
    }
    out.truncate(out.trim_end().len());
    out
}

/// Health summary with the last failure, if any.
#[must_use]
pub fn health(snapshot: &HealthSnapshot) -> String {
    if snapshot.is_loading {
        return "Health: connecting...".to_string();
    }
    let mut out = match &snapshot.data {
        Some(data) => {
            let status = match data.status {
                HealthStatus::Healthy => "healthy",
                HealthStatus::Unhealthy => "unhealthy",
            };
            format!(
                "Health: {status}, {} documents, dimension {}, {} active sessions",
                data.document_count, data.embedding_dimension, data.active_sessions
            )
        }
        None => "Health: unknown".to_string(),
    };
    if let Some(database) = snapshot.data.as_ref().and_then(|d| d.database.as_deref()) {
        let _ = write!(out, ", database {database}");
    }
    if let Some(error) = &snapshot.error {
        let _ = write!(out, "\n  last check failed: {error}");
    }
    if let Some(at) = snapshot.last_updated {
        let _ = write!(
            out,
            "\n  updated {} ({} successful checks in a row)",
            at.format("%H:%M:%S"),
            snapshot.consecutive_successes
        );
    }
    out
}

/// Search results with similarity scores.
#[must_use]
pub fn search(response: &SearchResponse) -> String {
    if response.results.is_empty() {
        return format!("No results for \"{}\".", response.query);
    }
    let mut out = format!("{} results for \"{}\":", response.results.len(), response.query);
    for (i, doc) in response.results.iter().enumerate() {
        let excerpt: String = doc.content.chars().take(120).collect();
        let _ = write!(
            out,
            "\n  [{}] {} ({})\n      {excerpt}",
            i + 1,
            doc.title,
            similarity(doc.similarity)
        );
    }
    out
}

/// One progress line for a task event.
#[must_use]
pub fn task_event(kind: TaskKind, event: &TaskEvent) -> String {
    let task = match event {
        TaskEvent::Error(err) => return format!("[{kind}] status unavailable: {err}"),
        TaskEvent::Status(task) => task,
    };
    let mut out = match task.status {
        TaskStatus::Pending => format!("[{kind}] {}%", task.percent()),
        TaskStatus::Succeeded => format!("[{kind}] completed"),
        TaskStatus::Failed => format!(
            "[{kind}] failed: {}",
            task.error.as_deref().unwrap_or("no detail reported")
        ),
    };
    if let Some(message) = &task.message {
        let _ = write!(out, " - {message}");
    }
    if let Some(TaskMetrics::Rebuild(metrics)) = &task.metrics
        && task.status == TaskStatus::Succeeded
    {
        if let Some(documents) = metrics.documents_processed {
            let _ = write!(out, "\n  documents: {documents}");
        }
        if let Some(vectors) = metrics.index_vectors {
            let _ = write!(out, "\n  vectors: {vectors}");
        }
        if let Some(elapsed) = metrics.elapsed_seconds {
            let _ = write!(out, "\n  elapsed: {}", latency(elapsed));
        }
    }
    out
}

/// Evaluation metrics against their targets.
#[must_use]
pub fn report(report: &EvaluationReport, targets: &MetricTargets) -> String {
    let assessment = report.assess(targets);
    let mark = |ok: bool| if ok { "ok" } else { "below target" };
    let m = &report.metrics;
    let mut out = format!(
        "Evaluation of {} ({} questions, {} successful)\n  latency   {} ({})\n  relevance {} ({})\n  coverage  {} ({})\n  success   {}",
        report.timestamp,
        report.questions.len(),
        report.success_count(),
        latency(m.avg_latency),
        mark(assessment.latency_ok),
        similarity(m.avg_relevance),
        mark(assessment.relevance_ok),
        similarity(m.avg_coverage),
        mark(assessment.coverage_ok),
        similarity(m.success_rate),
    );
    for q in &report.questions {
        let question: String = q.question.chars().take(50).collect();
        let _ = write!(
            out,
            "\n  {} {question} ({}, relevance {})",
            if q.success { "+" } else { "-" },
            latency(q.latency),
            similarity(q.relevance)
        );
    }
    out
}
