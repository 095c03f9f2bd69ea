use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::ai::LanguageModel;
use crate::db::Database;
use crate::mailbox::{plain_text_body, Mailbox};
use crate::models::{Candidate, CandidateStatus};

const COMPANY_NAME: &str = "Printerpix";
const INTERVIEW_BASE_URL: &str = "https://intervieww-fw4n.vercel.app/interview";

#[derive(Debug, Default)]
pub struct GatekeeperStats {
    pub candidates: usize,
    pub processed: usize,
    pub awaiting: usize,
    pub errors: usize,
}

#[derive(Debug)]
enum ReplyOutcome {
    Invited,
    Rejected,
    Awaiting(&'static str),
}

pub fn run(mailbox: &dyn Mailbox, model: &dyn LanguageModel, db: &Database) -> Result<GatekeeperStats> {
    let candidates = db.candidates_with_status(CandidateStatus::QuestionnaireSent)?;
    info!("found {} candidate(s) awaiting reply", candidates.len());

    let mut stats = GatekeeperStats {
        candidates: candidates.len(),
        ..Default::default()
    };

    for candidate in &candidates {
        match process_candidate(mailbox, model, db, candidate) {
            Ok(ReplyOutcome::Invited) | Ok(ReplyOutcome::Rejected) => stats.processed += 1,
            Ok(ReplyOutcome::Awaiting(reason)) => {
                info!("{} still awaiting: {reason}", candidate.email);
                stats.awaiting += 1;
            }
            Err(e) => {
                error!("failed to process {}: {e:#}", candidate.email);
                stats.errors += 1;
            }
        }
    }

    info!(
        "gatekeeper complete: {} processed, {} awaiting reply",
        stats.processed, stats.awaiting
    );
    Ok(stats)
}

fn process_candidate(
    mailbox: &dyn Mailbox,
    model: &dyn LanguageModel,
    db: &Database,
    candidate: &Candidate,
) -> Result<ReplyOutcome> {
    let Some(token) = candidate.interview_token.as_deref() else {
        warn!("no interview token for {}, skipping", candidate.email);
        return Ok(ReplyOutcome::Awaiting("missing interview token"));
    };

    let ids = mailbox.search(&format!("from:{} is:unread", candidate.email))?;
    let Some(msg_id) = ids.first() else {
        // No reply yet; silently wait for the next run.
        return Ok(ReplyOutcome::Awaiting("no reply yet"));
    };

    let message = mailbox.fetch(msg_id)?;
    let reply_text = plain_text_body(&message);
    if reply_text.is_empty() {
        warn!("empty reply from {}, skipping", candidate.email);
        return Ok(ReplyOutcome::Awaiting("empty reply body"));
    }

    info!("processing reply from {}", candidate.email);
    let response = model.generate(&visa_prompt(&reply_text))?;
    let has_valid_visa = parse_visa_verdict(&response)?;

    let outcome = if has_valid_visa {
        let interview_link = format!("{INTERVIEW_BASE_URL}/{token}");
        mailbox.send(
            &candidate.email,
            &approval_subject(),
            &approval_body(&candidate.full_name, &interview_link),
        )?;
        db.update_candidate_status(candidate.id, CandidateStatus::InviteSent)?;
        info!("{}: visa valid, invite sent", candidate.email);
        ReplyOutcome::Invited
    } else {
        mailbox.send(
            &candidate.email,
            &rejection_subject(),
            &rejection_body(&candidate.full_name),
        )?;
        db.update_candidate_status(candidate.id, CandidateStatus::RejectedVisa)?;
        info!("{}: visa not valid, rejected", candidate.email);
        ReplyOutcome::Rejected
    };

    // The email is already out and the status committed; if this fails the
    // next run sees the reply as unread and sends again.
    mailbox.mark_read(msg_id)?;

    Ok(outcome)
}

fn visa_prompt(reply_text: &str) -> String {
    format!(
        "The candidate was asked 'Are you on an Employer Visa or a Personal Visa?'.\n\n\
         Their reply: '{reply_text}'\n\n\
         Analyze their response and determine if they have valid work authorization.\n\
         - Personal Visa, Green Card, Golden Visa, Permanent Resident = TRUE (valid)\n\
         - Employer Visa, Needs Sponsorship, Work Permit Required = FALSE (not valid)\n\n\
         Return ONLY a valid JSON object: {{\"has_valid_visa\": true}} or {{\"has_valid_visa\": false}}"
    )
}

#[derive(Debug, Deserialize)]
struct VisaVerdict {
    #[serde(default)]
    has_valid_visa: bool,
}

/// Parse the classifier verdict, tolerating a surrounding markdown code
/// fence. A missing field reads as false; anything that is not JSON is an
/// error for this candidate.
pub fn parse_visa_verdict(response: &str) -> Result<bool> {
    let cleaned = strip_code_fence(response);
    let verdict: VisaVerdict = serde_json::from_str(cleaned)
        .with_context(|| format!("Unparsable classifier verdict: {}", response.trim()))?;
    Ok(verdict.has_valid_visa)
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let inner = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    inner.strip_prefix("json").unwrap_or(inner).trim()
}

fn approval_subject() -> String {
    format!("You're Invited - AI Interview with {COMPANY_NAME}")
}

fn approval_body(full_name: &str, interview_link: &str) -> String {
    format!(
        "Hi {full_name},\n\n\
         Thanks for confirming! You are invited to an AI Interview.\n\n\
         Please use this link to complete your interview: {interview_link}\n\n\
         Best,\n\
         {COMPANY_NAME} Recruiting\n"
    )
}

fn rejection_subject() -> String {
    format!("Update on your application to {COMPANY_NAME}")
}

fn rejection_body(full_name: &str) -> String {
    format!(
        "Hi {full_name},\n\n\
         Thank you for your transparency. Unfortunately, we require a personal visa/work authorization at this time.\n\n\
         We will keep your resume on file for future opportunities.\n\n\
         Best of luck in your job search!\n\n\
         {COMPANY_NAME} Recruiting\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::FakeModel;
    use crate::db::{Database, NewCandidate};
    use crate::mailbox::testing::{snippet_message, FakeMailbox};
    use crate::mailbox::{Message, MessagePart, PartBody};
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine;
    use std::collections::HashMap;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(
            strip_code_fence("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(strip_code_fence("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_visa_verdict_fenced_and_bare_agree() {
        let fenced = "```json\n{\"has_valid_visa\": true}\n```";
        let bare = "{\"has_valid_visa\": true}";
        assert!(parse_visa_verdict(fenced).unwrap());
        assert!(parse_visa_verdict(bare).unwrap());
        assert!(!parse_visa_verdict("{\"has_valid_visa\": false}").unwrap());
    }

    #[test]
    fn test_parse_visa_verdict_defaults_missing_field_to_false() {
        assert!(!parse_visa_verdict("{}").unwrap());
    }

    #[test]
    fn test_parse_visa_verdict_rejects_non_json() {
        assert!(parse_visa_verdict("the candidate seems fine").is_err());
        assert!(parse_visa_verdict("").is_err());
    }

    #[test]
    fn test_visa_prompt_embeds_reply() {
        let prompt = visa_prompt("I have a green card");
        assert!(prompt.contains("'I have a green card'"));
        assert!(prompt.contains("{\"has_valid_visa\": true}"));
        assert!(prompt.contains("{\"has_valid_visa\": false}"));
    }

    fn questionnaire_candidate(db: &Database, email: &str, token: Option<&str>) -> i64 {
        let job_id = db.add_job("Backend Engineer", "Build services.").unwrap();
        let id = db
            .insert_candidate(&NewCandidate {
                email,
                full_name: "Jane Doe",
                resume_text: "resume",
                job_id,
                job_description: "Build services.",
                metadata: "{}",
            })
            .unwrap();
        db.update_candidate_status(id, CandidateStatus::QuestionnaireSent)
            .unwrap();
        if let Some(token) = token {
            db.set_interview_token(id, token).unwrap();
        }
        id
    }

    fn reply_mailbox(email: &str, body: &str) -> FakeMailbox {
        let mailbox = FakeMailbox::new();
        mailbox.push(
            "r1",
            &format!("Jane Doe <{email}>"),
            "Re: Quick question about your visa status",
            snippet_message("r1", body),
            HashMap::new(),
        );
        mailbox
    }

    #[test]
    fn test_valid_visa_sends_invite_with_token_link() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let id = questionnaire_candidate(&db, "a@x.com", Some("tok123"));

        let mailbox = reply_mailbox("a@x.com", "I have a green card");
        let model = FakeModel::returning("```json\n{\"has_valid_visa\": true}\n```");

        let stats = run(&mailbox, &model, &db).unwrap();
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.awaiting, 0);
        assert_eq!(stats.errors, 0);

        let sent = mailbox.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert!(sent[0].body.contains("/interview/tok123"));
        assert!(sent[0].subject.contains("Invited"));

        let candidate = db.get_candidate_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(candidate.status, CandidateStatus::InviteSent);
        assert_eq!(candidate.id, id);
        assert!(!mailbox.is_unread("r1"));

        // The classifier saw the reply text, not the raw message.
        assert!(model.prompts.borrow()[0].contains("I have a green card"));
    }

    #[test]
    fn test_invalid_visa_sends_rejection() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        questionnaire_candidate(&db, "a@x.com", Some("tok123"));

        let mailbox = reply_mailbox("a@x.com", "I need sponsorship");
        let model = FakeModel::returning("{\"has_valid_visa\": false}");

        let stats = run(&mailbox, &model, &db).unwrap();
        assert_eq!(stats.processed, 1);

        let sent = mailbox.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("Update on your application"));
        assert!(!sent[0].body.contains("/interview/"));

        let candidate = db.get_candidate_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(candidate.status, CandidateStatus::RejectedVisa);
        assert!(!mailbox.is_unread("r1"));
    }

    #[test]
    fn test_no_reply_counts_as_awaiting() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        questionnaire_candidate(&db, "a@x.com", Some("tok123"));

        let mailbox = FakeMailbox::new();
        let model = FakeModel::returning("{\"has_valid_visa\": true}");

        let stats = run(&mailbox, &model, &db).unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.awaiting, 1);
        assert_eq!(stats.errors, 0);
        assert!(mailbox.sent.borrow().is_empty());

        let candidate = db.get_candidate_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(candidate.status, CandidateStatus::QuestionnaireSent);
    }

    #[test]
    fn test_missing_token_counts_as_awaiting() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        questionnaire_candidate(&db, "a@x.com", None);

        let mailbox = reply_mailbox("a@x.com", "I have a green card");
        let model = FakeModel::returning("{\"has_valid_visa\": true}");

        let stats = run(&mailbox, &model, &db).unwrap();
        assert_eq!(stats.awaiting, 1);
        assert!(mailbox.sent.borrow().is_empty());
        assert!(mailbox.is_unread("r1"));
    }

    #[test]
    fn test_empty_reply_body_counts_as_awaiting() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        questionnaire_candidate(&db, "a@x.com", Some("tok123"));

        let mailbox = FakeMailbox::new();
        // HTML-only reply with no snippet has no usable text.
        mailbox.push(
            "r1",
            "Jane Doe <a@x.com>",
            "Re: visa",
            Message {
                id: "r1".to_string(),
                snippet: String::new(),
                payload: MessagePart {
                    mime_type: "text/html".to_string(),
                    body: PartBody {
                        data: Some(URL_SAFE.encode("<p>hi</p>")),
                        attachment_id: None,
                    },
                    ..Default::default()
                },
            },
            HashMap::new(),
        );
        let model = FakeModel::returning("{\"has_valid_visa\": true}");

        let stats = run(&mailbox, &model, &db).unwrap();
        assert_eq!(stats.awaiting, 1);
        assert!(mailbox.sent.borrow().is_empty());
        assert!(mailbox.is_unread("r1"));
    }

    #[test]
    fn test_unparsable_verdict_fails_candidate_only() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        questionnaire_candidate(&db, "a@x.com", Some("tok123"));
        questionnaire_candidate(&db, "b@x.com", Some("tok456"));

        let mailbox = FakeMailbox::new();
        mailbox.push(
            "r1",
            "A <a@x.com>",
            "Re: visa",
            snippet_message("r1", "green card"),
            HashMap::new(),
        );
        let model = FakeModel::returning("I cannot answer that.");

        let stats = run(&mailbox, &model, &db).unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.awaiting, 1); // b@x.com had no reply
        assert!(mailbox.sent.borrow().is_empty());

        // Failed candidate untouched; reply stays unread for the next run.
        let candidate = db.get_candidate_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(candidate.status, CandidateStatus::QuestionnaireSent);
        assert!(mailbox.is_unread("r1"));
    }

    #[test]
    fn test_read_mark_failure_after_send_leaves_duplicate_window() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        questionnaire_candidate(&db, "a@x.com", Some("tok123"));

        let mailbox = reply_mailbox("a@x.com", "I have a green card");
        mailbox.fail_mark_read.set(true);
        let model = FakeModel::returning("{\"has_valid_visa\": true}");

        let stats = run(&mailbox, &model, &db).unwrap();
        assert_eq!(stats.errors, 1);

        // Send and status update committed before the failure; the unread
        // reply means the next run would send again.
        assert_eq!(mailbox.sent.borrow().len(), 1);
        let candidate = db.get_candidate_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(candidate.status, CandidateStatus::InviteSent);
        assert!(mailbox.is_unread("r1"));
    }
}
