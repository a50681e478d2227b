use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::features;
use crate::models::{MemberSummary, RawRecord, TaskPrediction, TaskRisk};

/// Per-member rollup of the prediction set, most at-risk member first
/// (lowest mean completion probability).
pub fn summarize_members(
    records: &[RawRecord],
    predictions: &[TaskPrediction],
) -> Vec<MemberSummary> {
    let mut task_info: HashMap<i32, &RawRecord> = HashMap::new();
    for record in records {
        task_info.entry(record.task_id).or_insert(record);
    }

    let mut members: HashMap<i32, MemberSummary> = HashMap::new();
    for prediction in predictions {
        let Some(record) = task_info.get(&prediction.task_id) else {
            continue;
        };
        let entry = members.entry(record.member_id).or_insert(MemberSummary {
            member_name: record.member_name.clone(),
            member_email: record.member_email.clone(),
            task_count: 0,
            open_task_count: 0,
            mean_completion_prob: 0.0,
        });
        entry.task_count += 1;
        if prediction.task_completed == 0 {
            entry.open_task_count += 1;
        }
        entry.mean_completion_prob += prediction.completion_prob;
    }

    let mut summaries: Vec<MemberSummary> = members
        .into_values()
        .map(|mut summary| {
            summary.mean_completion_prob /= summary.task_count as f64;
            summary
        })
        .collect();

    summaries.sort_by(|a, b| {
        a.mean_completion_prob
            .partial_cmp(&b.mean_completion_prob)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    summaries
}

/// Open tasks ordered by completion probability ascending, with an overdue
/// flag against the given date.
pub fn at_risk_tasks(
    records: &[RawRecord],
    predictions: &[TaskPrediction],
    today: NaiveDate,
) -> Vec<TaskRisk> {
    let mut task_info: HashMap<i32, &RawRecord> = HashMap::new();
    for record in records {
        task_info.entry(record.task_id).or_insert(record);
    }

    let mut risks: Vec<TaskRisk> = predictions
        .iter()
        .filter(|prediction| prediction.task_completed == 0)
        .filter_map(|prediction| {
            task_info.get(&prediction.task_id).map(|record| TaskRisk {
                task_id: prediction.task_id,
                description: record.task_description.clone(),
                member_name: record.member_name.clone(),
                opened: features::parse_timestamp(record.task_created_at.as_deref())
                    .map(|ts| ts.date_naive()),
                deadline: record.task_deadline,
                completion_prob: prediction.completion_prob,
                overdue: record.task_deadline.is_some_and(|deadline| deadline < today),
            })
        })
        .collect();

    risks.sort_by(|a, b| {
        a.completion_prob
            .partial_cmp(&b.completion_prob)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    risks
}

pub fn build_report(
    today: NaiveDate,
    records: &[RawRecord],
    predictions: &[TaskPrediction],
) -> String {
    let summaries = summarize_members(records, predictions);
    let risks = at_risk_tasks(records, predictions, today);
    let completed = predictions.iter().filter(|p| p.task_completed == 1).count();

    let mut output = String::new();
    let _ = writeln!(output, "# Task Completion Risk Report");
    let _ = writeln!(
        output,
        "Generated {} over {} tasks ({} completed, {} open)",
        today,
        predictions.len(),
        completed,
        predictions.len() - completed
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Members by Risk");

    if summaries.is_empty() {
        let _ = writeln!(output, "No tasks to report on.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) mean completion prob {:.2} across {} tasks ({} open)",
                summary.member_name,
                summary.member_email,
                summary.mean_completion_prob,
                summary.task_count,
                summary.open_task_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## At-Risk Open Tasks");

    if risks.is_empty() {
        let _ = writeln!(output, "No open tasks.");
    } else {
        for risk in risks.iter().take(10) {
            let deadline = risk
                .deadline
                .map(|d| d.to_string())
                .unwrap_or_else(|| "no deadline".to_string());
            let _ = write!(
                output,
                "- #{} {} ({}) completion prob {:.2}, due {}",
                risk.task_id, risk.description, risk.member_name, risk.completion_prob, deadline
            );
            if let Some(opened) = risk.opened {
                let _ = write!(output, ", opened {opened}");
            }
            let _ = writeln!(
                output,
                "{}",
                if risk.overdue { " [OVERDUE]" } else { "" }
            );
        }
    }

    let mut replies: Vec<&RawRecord> = records
        .iter()
        .filter(|record| record.reply_text.is_some())
        .collect();
    replies.sort_by(|a, b| {
        let a_ts = features::parse_timestamp(a.reply_received_at.as_deref());
        let b_ts = features::parse_timestamp(b.reply_received_at.as_deref());
        b_ts.cmp(&a_ts)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Replies");

    if replies.is_empty() {
        let _ = writeln!(output, "No replies recorded.");
    } else {
        for record in replies.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} on #{} [{}]: {}",
                record.member_name,
                record.task_id,
                record.reply_classification.as_deref().unwrap_or("Unclassified"),
                record.reply_text.as_deref().unwrap_or("")
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(member_id: i32, name: &str, task_id: i32, deadline: Option<NaiveDate>) -> RawRecord {
        RawRecord {
            member_id,
            member_name: name.to_string(),
            member_email: format!("{}@autopilot.dev", name.to_lowercase()),
            task_id,
            task_description: format!("Task {task_id}"),
            task_status: "pending".to_string(),
            task_deadline: deadline,
            task_created_at: None,
            email_sent_at: None,
            reply_text: None,
            reply_classification: None,
            reply_received_at: None,
        }
    }

    fn prediction(task_id: i32, prob: f64, completed: u8) -> TaskPrediction {
        TaskPrediction {
            task_id,
            completion_prob: prob,
            task_completed: completed,
        }
    }

    #[test]
    fn member_summaries_average_and_rank_by_risk() {
        let records = vec![
            record(1, "Priya", 1, None),
            record(1, "Priya", 2, None),
            record(2, "Marcus", 3, None),
        ];
        let predictions = vec![
            prediction(1, 0.9, 1),
            prediction(2, 0.5, 0),
            prediction(3, 0.2, 0),
        ];

        let summaries = summarize_members(&records, &predictions);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].member_name, "Marcus");
        assert!((summaries[1].mean_completion_prob - 0.7).abs() < 1e-9);
        assert_eq!(summaries[1].task_count, 2);
        assert_eq!(summaries[1].open_task_count, 1);
    }

    #[test]
    fn at_risk_tasks_are_open_only_ascending_with_overdue_flag() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
        let records = vec![
            record(1, "Priya", 1, Some(NaiveDate::from_ymd_opt(2026, 2, 10).unwrap())),
            record(1, "Priya", 2, Some(NaiveDate::from_ymd_opt(2026, 2, 20).unwrap())),
            record(2, "Marcus", 3, None),
        ];
        let predictions = vec![
            prediction(1, 0.4, 0),
            prediction(2, 0.1, 0),
            prediction(3, 0.8, 1),
        ];

        let risks = at_risk_tasks(&records, &predictions, today);
        assert_eq!(risks.len(), 2);
        assert_eq!(risks[0].task_id, 2);
        assert!(!risks[0].overdue);
        assert!(risks[1].overdue);
    }

    #[test]
    fn report_handles_empty_dataset() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
        let report = build_report(today, &[], &[]);
        assert!(report.contains("No tasks to report on."));
        assert!(report.contains("No open tasks."));
        assert!(report.contains("No replies recorded."));
    }

    #[test]
    fn report_lists_recent_replies_newest_first() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
        let mut first = record(1, "Priya", 1, None);
        first.reply_text = Some("Shipped it".to_string());
        first.reply_classification = Some("Done".to_string());
        first.reply_received_at = Some("2026-02-10 09:00:00+00".to_string());
        let mut second = record(2, "Marcus", 2, None);
        second.reply_text = Some("Swamped this week".to_string());
        second.reply_classification = Some("Can't do".to_string());
        second.reply_received_at = Some("2026-02-12 09:00:00+00".to_string());

        let records = vec![first, second];
        let predictions = vec![prediction(1, 0.8, 1), prediction(2, 0.2, 0)];
        let report = build_report(today, &records, &predictions);

        let marcus = report.find("Marcus on #2 [Can't do]: Swamped this week").unwrap();
        let priya = report.find("Priya on #1 [Done]: Shipped it").unwrap();
        assert!(marcus < priya);
    }

    #[test]
    fn report_lists_overdue_marker() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
        let records = vec![record(
            1,
            "Priya",
            1,
            Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()),
        )];
        let predictions = vec![prediction(1, 0.3, 0)];
        let report = build_report(today, &records, &predictions);
        assert!(report.contains("[OVERDUE]"));
        assert!(report.contains("completion prob 0.30"));
    }
}
