use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a candidate. `NEW_APPLICATION -> QUESTIONNAIRE_SENT` is
/// driven by an external process; the gatekeeper only ever moves candidates
/// out of `QUESTIONNAIRE_SENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    NewApplication,
    QuestionnaireSent,
    InviteSent,
    RejectedVisa,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::NewApplication => "NEW_APPLICATION",
            CandidateStatus::QuestionnaireSent => "QUESTIONNAIRE_SENT",
            CandidateStatus::InviteSent => "INVITE_SENT",
            CandidateStatus::RejectedVisa => "REJECTED_VISA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW_APPLICATION" => Some(CandidateStatus::NewApplication),
            "QUESTIONNAIRE_SENT" => Some(CandidateStatus::QuestionnaireSent),
            "INVITE_SENT" => Some(CandidateStatus::InviteSent),
            "REJECTED_VISA" => Some(CandidateStatus::RejectedVisa),
            _ => None,
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub resume_text: Option<String>,
    pub status: CandidateStatus,
    pub job_id: Option<i64>,
    pub job_description: Option<String>, // denormalized from jobs
    pub interview_token: Option<String>, // assigned by an external process
    pub metadata: Option<String>,        // JSON, holds the source message id
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: String,
}
