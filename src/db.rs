use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::features;
use crate::models::RawRecord;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let members = vec![
        ("Priya Shah", "priya.shah@autopilot.dev"),
        ("Marcus Webb", "marcus.webb@autopilot.dev"),
        ("Elena Costa", "elena.costa@autopilot.dev"),
    ];

    for (name, email) in members {
        sqlx::query(
            r#"
            INSERT INTO task_autopilot.members (name, email)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let tasks = vec![
        (
            "seed-task-001",
            "priya.shah@autopilot.dev",
            "Draft Q1 onboarding deck",
            "completed",
            NaiveDate::from_ymd_opt(2026, 2, 6).context("invalid date")?,
        ),
        (
            "seed-task-002",
            "priya.shah@autopilot.dev",
            "Migrate billing webhook",
            "pending",
            NaiveDate::from_ymd_opt(2026, 2, 20).context("invalid date")?,
        ),
        (
            "seed-task-003",
            "marcus.webb@autopilot.dev",
            "Review vendor contract",
            "completed",
            NaiveDate::from_ymd_opt(2026, 1, 30).context("invalid date")?,
        ),
        (
            "seed-task-004",
            "marcus.webb@autopilot.dev",
            "Close out audit findings",
            "in_progress",
            NaiveDate::from_ymd_opt(2026, 2, 13).context("invalid date")?,
        ),
        (
            "seed-task-005",
            "elena.costa@autopilot.dev",
            "Publish release notes",
            "pending",
            NaiveDate::from_ymd_opt(2026, 2, 10).context("invalid date")?,
        ),
    ];

    for (source_key, email, description, status, deadline) in tasks {
        let member_id: i32 =
            sqlx::query("SELECT id FROM task_autopilot.members WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?
                .get("id");

        sqlx::query(
            r#"
            INSERT INTO task_autopilot.tasks
            (member_id, description, status, deadline, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO UPDATE
            SET description = EXCLUDED.description, status = EXCLUDED.status
            "#,
        )
        .bind(member_id)
        .bind(description)
        .bind(status)
        .bind(deadline)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let emails = vec![
        ("seed-email-001", "seed-task-001", "2026-02-02T09:00:00Z"),
        ("seed-email-002", "seed-task-002", "2026-02-09T10:30:00Z"),
        ("seed-email-003", "seed-task-003", "2026-01-26T08:15:00Z"),
        ("seed-email-004", "seed-task-004", "2026-02-05T14:00:00Z"),
    ];

    for (source_key, task_key, sent_at) in emails {
        let task_id = task_id_by_key(pool, task_key).await?;
        sqlx::query(
            r#"
            INSERT INTO task_autopilot.email_logs (task_id, sent_at, source_key)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(sent_at.parse::<DateTime<Utc>>().context("invalid seed timestamp")?)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let replies = vec![
        (
            "seed-reply-001",
            "seed-task-001",
            "Deck is done, link in the channel.",
            "Done",
            "2026-02-02T11:00:00Z",
        ),
        (
            "seed-reply-002",
            "seed-task-002",
            "Will pick this up after the sprint.",
            "Will do",
            "2026-02-09T18:45:00Z",
        ),
        (
            "seed-reply-003",
            "seed-task-004",
            "Not sure I'm the right owner for this?",
            "Unclear",
            "2026-02-06T09:20:00Z",
        ),
    ];

    for (source_key, task_key, text, classification, received_at) in replies {
        let task_id = task_id_by_key(pool, task_key).await?;
        sqlx::query(
            r#"
            INSERT INTO task_autopilot.replies
            (task_id, reply_text, reply_classification, received_at, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(text)
        .bind(classification)
        .bind(received_at.parse::<DateTime<Utc>>().context("invalid seed timestamp")?)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn task_id_by_key(pool: &PgPool, source_key: &str) -> anyhow::Result<i32> {
    let id = sqlx::query("SELECT id FROM task_autopilot.tasks WHERE source_key = $1")
        .bind(source_key)
        .fetch_one(pool)
        .await?
        .get("id");
    Ok(id)
}

/// The single Record Source query: one denormalized row per
/// member × task × email × reply combination, timestamps cast to text so
/// the feature deriver owns the lenient parse. Members with no tasks join
/// to an all-null task and are skipped here; they cannot produce a
/// feature vector.
pub async fn fetch_records(pool: &PgPool) -> anyhow::Result<Vec<RawRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT
            m.id AS member_id,
            m.name AS member_name,
            m.email AS member_email,
            t.id AS task_id,
            t.description,
            t.status,
            t.deadline,
            t.created_at::text AS task_created_at,
            el.sent_at::text AS sent_at,
            r.reply_text,
            r.reply_classification,
            r.received_at::text AS received_at
        FROM task_autopilot.members m
        LEFT JOIN task_autopilot.tasks t ON m.id = t.member_id
        LEFT JOIN task_autopilot.email_logs el ON t.id = el.task_id
        LEFT JOIN task_autopilot.replies r ON t.id = r.task_id
        ORDER BY m.id, t.id, el.sent_at
        "#,
    )
    .fetch_all(pool)
    .await
    .context("record source query failed")?;

    let mut records = Vec::new();
    for row in rows {
        let task_id: Option<i32> = row.get("task_id");
        let Some(task_id) = task_id else {
            continue;
        };

        records.push(RawRecord {
            member_id: row.get("member_id"),
            member_name: row.get("member_name"),
            member_email: row.get("member_email"),
            task_id,
            task_description: row.get("description"),
            task_status: row.get("status"),
            task_deadline: row.get("deadline"),
            task_created_at: row.get("task_created_at"),
            email_sent_at: row.get("sent_at"),
            reply_text: row.get("reply_text"),
            reply_classification: row.get("reply_classification"),
            reply_received_at: row.get("received_at"),
        });
    }

    Ok(records)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        member_name: String,
        member_email: String,
        task_description: String,
        status: String,
        deadline: Option<NaiveDate>,
        sent_at: Option<String>,
        reply_text: Option<String>,
        reply_classification: Option<String>,
        received_at: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let member_id: i32 = sqlx::query(
            r#"
            INSERT INTO task_autopilot.members (name, email)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(&row.member_name)
        .bind(&row.member_email)
        .fetch_one(pool)
        .await?
        .get("id");

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let task_id: i32 = sqlx::query(
            r#"
            INSERT INTO task_autopilot.tasks
            (member_id, description, status, deadline, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO UPDATE
            SET description = EXCLUDED.description, status = EXCLUDED.status
            RETURNING id
            "#,
        )
        .bind(member_id)
        .bind(&row.task_description)
        .bind(&row.status)
        .bind(row.deadline)
        .bind(&source_key)
        .fetch_one(pool)
        .await?
        .get("id");

        if let Some(sent_at) = features::parse_timestamp(row.sent_at.as_deref()) {
            sqlx::query(
                r#"
                INSERT INTO task_autopilot.email_logs (task_id, sent_at, source_key)
                VALUES ($1, $2, $3)
                ON CONFLICT (source_key) DO NOTHING
                "#,
            )
            .bind(task_id)
            .bind(sent_at)
            .bind(format!("{source_key}-email"))
            .execute(pool)
            .await?;
        }

        if row.reply_text.is_some() || row.reply_classification.is_some() {
            sqlx::query(
                r#"
                INSERT INTO task_autopilot.replies
                (task_id, reply_text, reply_classification, received_at, source_key)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (source_key) DO NOTHING
                "#,
            )
            .bind(task_id)
            .bind(&row.reply_text)
            .bind(&row.reply_classification)
            .bind(features::parse_timestamp(row.received_at.as_deref()))
            .bind(format!("{source_key}-reply"))
            .execute(pool)
            .await?;
        }

        imported += 1;
    }

    Ok(imported)
}
