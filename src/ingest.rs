use anyhow::{Context, Result};
use regex::Regex;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use crate::ai::DocumentReader;
use crate::db::{Database, NewCandidate};
use crate::mailbox::{first_pdf_attachment, Mailbox};

pub const APPLICATION_QUERY: &str = "label:Applications is:unread";

#[derive(Debug, Default)]
pub struct IngestStats {
    pub messages_found: usize,
    pub saved: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// How a single message ended. Abandoned messages stay unread so the next
/// scheduled run retries them; only a saved or already-known application
/// marks its message read.
#[derive(Debug)]
enum IngestOutcome {
    Saved,
    AlreadyKnown,
    Abandoned(&'static str),
}

pub fn run(
    mailbox: &dyn Mailbox,
    reader: &dyn DocumentReader,
    db: &Database,
    downloads_dir: &Path,
) -> Result<IngestStats> {
    fs::create_dir_all(downloads_dir)
        .with_context(|| format!("Failed to create {}", downloads_dir.display()))?;

    let ids = mailbox.search(APPLICATION_QUERY)?;
    info!("found {} unread application(s)", ids.len());

    let mut stats = IngestStats {
        messages_found: ids.len(),
        ..Default::default()
    };

    for id in &ids {
        match process_message(mailbox, reader, db, downloads_dir, id) {
            Ok(IngestOutcome::Saved) => stats.saved += 1,
            Ok(IngestOutcome::AlreadyKnown) => stats.skipped += 1,
            Ok(IngestOutcome::Abandoned(reason)) => {
                info!("message {id} left unread: {reason}");
                stats.skipped += 1;
            }
            Err(e) => {
                error!("failed to process message {id}: {e:#}");
                stats.errors += 1;
            }
        }
    }

    info!(
        "ingest complete: {} succeeded, {} failed",
        stats.saved, stats.errors
    );
    Ok(stats)
}

fn process_message(
    mailbox: &dyn Mailbox,
    reader: &dyn DocumentReader,
    db: &Database,
    downloads_dir: &Path,
    msg_id: &str,
) -> Result<IngestOutcome> {
    let meta = mailbox.metadata(msg_id)?;

    if meta.sender_email.is_empty() {
        warn!("message {msg_id} has no sender address");
        return Ok(IngestOutcome::Abandoned("no sender address"));
    }
    info!("processing application from {}", meta.sender_email);

    let Some(job_title) = parse_job_title(&meta.subject) else {
        error!(
            "could not parse job title from subject '{}'",
            meta.subject
        );
        return Ok(IngestOutcome::Abandoned("unrecognized subject line"));
    };

    // The subject carries a cleaner name than the From header; fall back to
    // the display name when the subject tail is malformed.
    let full_name = match parse_candidate_name(&meta.subject) {
        Some(name) => name,
        None => {
            warn!(
                "could not parse name from subject, using sender name '{}'",
                meta.sender_name
            );
            meta.sender_name.clone()
        }
    };

    let Some(job) = db.find_job_by_title(&job_title)? else {
        error!("no job posting matches '{job_title}', skipping candidate");
        return Ok(IngestOutcome::Abandoned("no matching job posting"));
    };
    info!(
        "matched job '{}' (id {}) for candidate {}",
        job_title, job.id, full_name
    );

    if db.candidate_exists(&meta.sender_email)? {
        info!("{} already exists, marking read", meta.sender_email);
        mailbox.mark_read(msg_id)?;
        return Ok(IngestOutcome::AlreadyKnown);
    }

    let message = mailbox.fetch(msg_id)?;
    let Some((filename, attachment_id)) = first_pdf_attachment(&message) else {
        warn!("no PDF attachment from {}", meta.sender_email);
        return Ok(IngestOutcome::Abandoned("no PDF attachment"));
    };
    info!("downloading attachment '{filename}'");

    let bytes = mailbox.attachment(msg_id, attachment_id)?;
    let local_path = downloads_dir.join(format!(
        "{}_resume.pdf",
        sanitize_filename(&meta.sender_email)
    ));
    fs::write(&local_path, &bytes)
        .with_context(|| format!("Failed to write {}", local_path.display()))?;

    let extracted = reader.read_pdf(&local_path);
    // The local copy is scratch data; remove it whether extraction worked
    // or not.
    let _ = fs::remove_file(&local_path);
    let resume_text = extracted?;

    db.insert_candidate(&NewCandidate {
        email: &meta.sender_email,
        full_name: &full_name,
        resume_text: &resume_text,
        job_id: job.id,
        job_description: &job.description,
        metadata: &json!({ "gmail_message_id": message.id }).to_string(),
    })?;
    mailbox.mark_read(msg_id)?;

    info!("saved {} for job '{}'", meta.sender_email, job_title);
    Ok(IngestOutcome::Saved)
}

/// Job title out of the fixed application-board subject format:
/// `<job title> candidate - <name> applied via Betterteam`.
pub fn parse_job_title(subject: &str) -> Option<String> {
    let re = Regex::new(r"(?i)^(.+?)\s+candidate\s+-\s+").ok()?;
    let caps = re.captures(subject)?;
    Some(caps.get(1)?.as_str().trim().to_string())
}

/// Candidate name out of the same subject format.
pub fn parse_candidate_name(subject: &str) -> Option<String> {
    let re = Regex::new(r"(?i)candidate\s+-\s+(.+?)\s+applied\s+via\s+betterteam").ok()?;
    let caps = re.captures(subject)?;
    Some(caps.get(1)?.as_str().trim().to_string())
}

fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
