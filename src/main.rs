use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod db;
mod features;
mod models;
mod predict;
mod report;

#[derive(Parser)]
#[command(name = "task-autopilot")]
#[command(about = "Task completion prediction for the Autopilot tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import member/task/email/reply rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Retrain on the full dataset and emit predictions as JSON
    Predict {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown risk report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let imported = db::import_csv(&pool, &csv).await?;
            println!("Imported {imported} rows from {}.", csv.display());
        }
        Commands::Predict { out } => {
            let records = db::fetch_records(&pool).await?;
            let predictions = predict::run_pipeline(&records);
            let json = serde_json::to_string_pretty(&predictions)?;

            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!(
                        "Wrote {} predictions to {}.",
                        predictions.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }
        Commands::Report { out } => {
            let records = db::fetch_records(&pool).await?;
            let predictions = predict::run_pipeline(&records);
            let report = report::build_report(Utc::now().date_naive(), &records, &predictions);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
