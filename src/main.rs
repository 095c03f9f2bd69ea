mod ai;
mod config;
mod db;
mod gatekeeper;
mod ingest;
mod mailbox;
mod models;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ai::GeminiClient;
use config::Config;
use db::Database;
use mailbox::GmailClient;
use models::CandidateStatus;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Recruiting automation - ingest applications and screen questionnaire replies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Record unread application emails as candidates
    Ingest,

    /// Process questionnaire replies and send invite/rejection emails
    Gatekeeper,

    /// Manage job postings
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// List candidates
    Candidates {
        /// Filter by status (NEW_APPLICATION, QUESTIONNAIRE_SENT, INVITE_SENT, REJECTED_VISA)
        #[arg(short, long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Add a job posting
    Add {
        /// Title exactly as it appears in application email subjects
        title: String,

        /// Posting description, copied onto each matched candidate
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// List job postings
    List,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let db = Database::open(&config::database_path()?)?;
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Ingest => {
            let config = Config::from_env()?;
            let db = Database::open(&config.db_path)?;
            db.ensure_initialized()?;

            let gmail = GmailClient::new(config.gmail_access_token.clone());
            let gemini = GeminiClient::new(config.gemini_api_key.clone());

            let stats = ingest::run(&gmail, &gemini, &db, &config.downloads_dir)?;

            println!("\nResults:");
            println!("  Messages found: {}", stats.messages_found);
            println!("  Saved:          {}", stats.saved);
            println!("  Skipped:        {}", stats.skipped);
            if stats.errors > 0 {
                println!("  Errors:         {}", stats.errors);
            }
            println!(
                "\nComplete: {} succeeded, {} failed",
                stats.saved, stats.errors
            );
        }

        Commands::Gatekeeper => {
            let config = Config::from_env()?;
            let db = Database::open(&config.db_path)?;
            db.ensure_initialized()?;

            let gmail = GmailClient::new(config.gmail_access_token.clone());
            let gemini = GeminiClient::new(config.gemini_api_key.clone());

            let stats = gatekeeper::run(&gmail, &gemini, &db)?;

            println!("\nResults:");
            println!("  Candidates:     {}", stats.candidates);
            println!("  Processed:      {}", stats.processed);
            println!("  Awaiting reply: {}", stats.awaiting);
            if stats.errors > 0 {
                println!("  Errors:         {}", stats.errors);
            }
            println!(
                "\nGatekeeper complete: {} processed, {} awaiting reply",
                stats.processed, stats.awaiting
            );
        }

        Commands::Jobs { command } => {
            let db = Database::open(&config::database_path()?)?;
            db.ensure_initialized()?;
            match command {
                JobCommands::Add { title, description } => {
                    let job_id = db.add_job(&title, &description)?;
                    println!("Added job #{} '{}'", job_id, title.trim());
                }
                JobCommands::List => {
                    let jobs = db.list_jobs()?;
                    if jobs.is_empty() {
                        println!("No job postings found.");
                    } else {
                        println!("{:<6} {:<30} {:<40}", "ID", "TITLE", "DESCRIPTION");
                        println!("{}", "-".repeat(78));
                        for job in jobs {
                            println!(
                                "{:<6} {:<30} {:<40}",
                                job.id,
                                truncate(job.title.trim(), 28),
                                truncate(&job.description, 38)
                            );
                        }
                    }
                }
            }
        }

        Commands::Candidates { status } => {
            let db = Database::open(&config::database_path()?)?;
            db.ensure_initialized()?;

            let status = status
                .map(|s| {
                    CandidateStatus::parse(&s)
                        .ok_or_else(|| anyhow!("Unknown status '{}'", s))
                })
                .transpose()?;

            let candidates = db.list_candidates(status)?;
            if candidates.is_empty() {
                println!("No candidates found.");
            } else {
                println!(
                    "{:<6} {:<20} {:<28} {:<20} {:<20}",
                    "ID", "STATUS", "EMAIL", "NAME", "CREATED"
                );
                println!("{}", "-".repeat(96));
                for candidate in candidates {
                    println!(
                        "{:<6} {:<20} {:<28} {:<20} {:<20}",
                        candidate.id,
                        candidate.status,
                        truncate(&candidate.email, 26),
                        truncate(&candidate.full_name, 18),
                        truncate(&candidate.created_at, 19)
                    );
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
