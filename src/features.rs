use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::models::{DerivedRecord, RawRecord, TaskFeatureVector};

/// Lenient timestamp parse. Accepts RFC 3339, Postgres text output
/// (offset-bearing or naive), and a few common naive forms; naive values
/// are taken as UTC so a mixed aware/naive pair still subtracts cleanly.
/// Anything unparsable is None, never an error.
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(ts, Utc));
        }
    }
    None
}

/// Fixed reply-classification score table; anything outside it (including
/// a missing reply) scores 0.0.
pub fn reply_score(classification: Option<&str>) -> f64 {
    match classification {
        Some("Done") => 1.0,
        Some("Will do") => 0.75,
        Some("Can't do") => 0.0,
        Some("Unclear") => 0.5,
        _ => 0.0,
    }
}

/// Row-wise signal derivation. Output has the same row count as the input;
/// malformed fields degrade to None/0.0 and never abort the run.
pub fn derive_records(records: &[RawRecord]) -> Vec<DerivedRecord> {
    records
        .iter()
        .map(|record| {
            let sent = parse_timestamp(record.email_sent_at.as_deref());
            let received = parse_timestamp(record.reply_received_at.as_deref());
            let response_time_hours = match (sent, received) {
                (Some(sent), Some(received)) => {
                    Some((received - sent).num_milliseconds() as f64 / 3_600_000.0)
                }
                _ => None,
            };

            DerivedRecord {
                raw: record.clone(),
                response_time_hours,
                reply_score: reply_score(record.reply_classification.as_deref()),
                task_completed: record.task_status == "completed",
            }
        })
        .collect()
}

struct TaskAccum {
    member_id: i32,
    rows: usize,
    response_sum: f64,
    response_count: usize,
    reply_score_sum: f64,
    task_completed: bool,
}

/// Collapse the derived row set to exactly one feature vector per distinct
/// task_id. Output is sorted by task_id for stable downstream output; the
/// order carries no meaning.
pub fn aggregate_features(derived: &[DerivedRecord]) -> Vec<TaskFeatureVector> {
    // Member success rate is the row-level mean over everything the member
    // has, including the task being scored. The label leaks into the
    // feature; that inflation is deliberate and covered by tests.
    let mut member_totals: HashMap<i32, (usize, usize)> = HashMap::new();
    for record in derived {
        let entry = member_totals.entry(record.raw.member_id).or_insert((0, 0));
        entry.0 += 1;
        if record.task_completed {
            entry.1 += 1;
        }
    }

    let mut tasks: HashMap<i32, TaskAccum> = HashMap::new();
    for record in derived {
        let entry = tasks.entry(record.raw.task_id).or_insert(TaskAccum {
            member_id: record.raw.member_id,
            rows: 0,
            response_sum: 0.0,
            response_count: 0,
            reply_score_sum: 0.0,
            task_completed: record.task_completed,
        });
        entry.rows += 1;
        entry.reply_score_sum += record.reply_score;
        if let Some(hours) = record.response_time_hours {
            entry.response_sum += hours;
            entry.response_count += 1;
        }
    }

    let mut vectors: Vec<TaskFeatureVector> = tasks
        .into_iter()
        .map(|(task_id, accum)| {
            let (member_rows, member_completed) = member_totals[&accum.member_id];
            TaskFeatureVector {
                task_id,
                member_id: accum.member_id,
                response_time_mean: if accum.response_count > 0 {
                    Some(accum.response_sum / accum.response_count as f64)
                } else {
                    None
                },
                num_followups: accum.rows,
                reply_score_mean: accum.reply_score_sum / accum.rows as f64,
                past_success_rate: member_completed as f64 / member_rows as f64,
                task_completed: accum.task_completed,
            }
        })
        .collect();

    vectors.sort_by_key(|vector| vector.task_id);
    vectors
}
