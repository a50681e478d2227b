use chrono::NaiveDate;
use serde::Serialize;

/// One denormalized row from the members → tasks → email_logs → replies
/// left-join. A task with no emails or replies still appears once, with the
/// trailing columns null; a task with several emails/replies appears once
/// per combination. Timestamps stay as raw text here so malformed values
/// degrade downstream instead of failing at decode time.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub member_id: i32,
    pub member_name: String,
    pub member_email: String,
    pub task_id: i32,
    pub task_description: String,
    pub task_status: String,
    pub task_deadline: Option<NaiveDate>,
    pub task_created_at: Option<String>,
    pub email_sent_at: Option<String>,
    pub reply_text: Option<String>,
    pub reply_classification: Option<String>,
    pub reply_received_at: Option<String>,
}

/// A RawRecord with the per-row signals derived from it. Same row count as
/// the input set, nothing dropped.
#[derive(Debug, Clone)]
pub struct DerivedRecord {
    pub raw: RawRecord,
    /// Hours between email sent and reply received; None when either
    /// timestamp is missing or unparsable.
    pub response_time_hours: Option<f64>,
    pub reply_score: f64,
    pub task_completed: bool,
}

/// Exactly one per distinct task_id; the unit the predictor operates on.
/// Missing numerics stay None here and are imputed to 0.0 only when the
/// classifier matrix is built.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFeatureVector {
    pub task_id: i32,
    pub member_id: i32,
    pub response_time_mean: Option<f64>,
    /// Row occurrences for this task in the join output, not distinct
    /// emails. Fan-out from multiple replies inflates this on purpose.
    pub num_followups: usize,
    pub reply_score_mean: f64,
    /// Mean of task_completed over all of this member's rows, including
    /// the task being scored. Known label leakage, kept deliberately.
    pub past_success_rate: f64,
    pub task_completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPrediction {
    pub task_id: i32,
    pub completion_prob: f64,
    pub task_completed: u8,
}

#[derive(Debug, Clone)]
pub struct MemberSummary {
    pub member_name: String,
    pub member_email: String,
    pub task_count: usize,
    pub open_task_count: usize,
    pub mean_completion_prob: f64,
}

#[derive(Debug, Clone)]
pub struct TaskRisk {
    pub task_id: i32,
    pub description: String,
    pub member_name: String,
    pub opened: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub completion_prob: f64,
    pub overdue: bool,
}
