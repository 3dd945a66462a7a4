//! Job envelope pushed by producers.
//!
//! The fetch side treats payloads as opaque strings; the only field it
//! ever looks at is `subqueue`, extracted at acknowledge time to settle
//! the fairness counter. Producers build a [`Job`], optionally attach a
//! literal priority or a subqueue label, and hand it to
//! [`Client::push`](crate::client::Client::push).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A serializable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job id.
    pub jid: String,
    /// Handler class/type name the worker dispatches on.
    #[serde(rename = "class")]
    pub kind: String,
    /// Handler arguments, opaque to the queue.
    pub args: Value,
    /// Explicit priority score; takes precedence over `subqueue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    /// Subqueue label for fairness-counter scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subqueue: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new job with a fresh jid and no prioritization.
    pub fn new(kind: impl Into<String>, args: Value) -> Self {
        Self {
            jid: Uuid::new_v4().simple().to_string(),
            kind: kind.into(),
            args,
            priority: None,
            subqueue: None,
            created_at: Utc::now(),
        }
    }

    /// Sets an explicit priority score.
    ///
    /// Scores are claimed highest-first; see DESIGN.md for the ordering
    /// contract producers must negotiate against.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets a fixed subqueue label.
    pub fn with_subqueue(mut self, label: impl Into<String>) -> Self {
        self.subqueue = Some(label.into());
        self
    }

    /// Derives the subqueue label from the job's arguments.
    ///
    /// The function is applied once, here, and the resulting label is
    /// stored as a plain string on the envelope. Nothing re-invokes it
    /// later.
    pub fn with_subqueue_by<F>(mut self, label_fn: F) -> Self
    where
        F: FnOnce(&Value) -> String,
    {
        self.subqueue = Some(label_fn(&self.args));
        self
    }
}

/// Pulls the subqueue label out of an opaque serialized payload.
///
/// Returns `None` when the payload does not parse or carries no label.
/// Non-string labels (the original system allowed numeric ones) are
/// stringified the way Redis coerces sorted-set members.
pub fn extract_subqueue(job: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(job).ok()?;
    subqueue_label(&parsed)
}

/// The subqueue label of an already-parsed payload.
pub(crate) fn subqueue_label(payload: &Value) -> Option<String> {
    match payload.get("subqueue")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
