use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::{Candidate, CandidateStatus, JobPosting};

/// Fields for a fresh candidate row. Status is always `NEW_APPLICATION` on
/// insert; later transitions go through `update_candidate_status`.
#[derive(Debug)]
pub struct NewCandidate<'a> {
    pub email: &'a str,
    pub full_name: &'a str,
    pub resume_text: &'a str,
    pub job_id: i64,
    pub job_description: &'a str,
    pub metadata: &'a str,
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS candidates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                full_name TEXT NOT NULL,
                resume_text TEXT,
                status TEXT NOT NULL DEFAULT 'NEW_APPLICATION'
                    CHECK (status IN ('NEW_APPLICATION', 'QUESTIONNAIRE_SENT', 'INVITE_SENT', 'REJECTED_VISA')),
                job_id INTEGER REFERENCES jobs(id),
                job_description TEXT,
                interview_token TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_candidates_status ON candidates(status);
            CREATE INDEX IF NOT EXISTS idx_candidates_job ON candidates(job_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='candidates'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'gatehouse init' first."
            ));
        }
        Ok(())
    }

    // --- Job posting operations ---

    pub fn add_job(&self, title: &str, description: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO jobs (title, description) VALUES (?1, ?2)",
            params![title, description],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_jobs(&self) -> Result<Vec<JobPosting>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, description, created_at FROM jobs ORDER BY title")?;
        let rows = stmt.query_map([], Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list jobs")
    }

    /// Exact match after trimming and lowercasing both sides. Posting titles
    /// pasted from job boards often carry stray whitespace and newlines, so
    /// the comparison happens here rather than in SQL.
    pub fn find_job_by_title(&self, title: &str) -> Result<Option<JobPosting>> {
        let wanted = title.trim().to_lowercase();

        let mut stmt = self
            .conn
            .prepare("SELECT id, title, description, created_at FROM jobs")?;
        let rows = stmt.query_map([], Self::row_to_job)?;

        for job in rows {
            let job = job?;
            if job.title.trim().to_lowercase() == wanted {
                debug!("matched job posting '{}'", job.title.trim());
                return Ok(Some(job));
            }
        }

        debug!("no job posting matches '{}'", title);
        Ok(None)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobPosting> {
        Ok(JobPosting {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    // --- Candidate operations ---

    pub fn candidate_exists(&self, email: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM candidates WHERE email = ?1",
            [email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_candidate(&self, candidate: &NewCandidate) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO candidates (email, full_name, resume_text, status, job_id, job_description, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    candidate.email,
                    candidate.full_name,
                    candidate.resume_text,
                    CandidateStatus::NewApplication.as_str(),
                    candidate.job_id,
                    candidate.job_description,
                    candidate.metadata,
                ],
            )
            .with_context(|| format!("Failed to insert candidate {}", candidate.email))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn candidates_with_status(&self, status: CandidateStatus) -> Result<Vec<Candidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, full_name, resume_text, status, job_id, job_description,
                    interview_token, metadata, created_at, updated_at
             FROM candidates WHERE status = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([status.as_str()], Self::row_to_candidate)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list candidates")
    }

    pub fn list_candidates(&self, status: Option<CandidateStatus>) -> Result<Vec<Candidate>> {
        match status {
            Some(status) => self.candidates_with_status(status),
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, email, full_name, resume_text, status, job_id, job_description,
                            interview_token, metadata, created_at, updated_at
                     FROM candidates ORDER BY id",
                )?;
                let rows = stmt.query_map([], Self::row_to_candidate)?;
                rows.collect::<Result<Vec<_>, _>>()
                    .context("Failed to list candidates")
            }
        }
    }

    #[allow(dead_code)]
    pub fn get_candidate_by_email(&self, email: &str) -> Result<Option<Candidate>> {
        let result = self.conn.query_row(
            "SELECT id, email, full_name, resume_text, status, job_id, job_description,
                    interview_token, metadata, created_at, updated_at
             FROM candidates WHERE email = ?1",
            [email],
            Self::row_to_candidate,
        );
        match result {
            Ok(candidate) => Ok(Some(candidate)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_candidate_status(&self, id: i64, status: CandidateStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE candidates SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if updated == 0 {
            return Err(anyhow!("No candidate with id {}", id));
        }
        Ok(())
    }

    #[allow(dead_code)]
    pub fn set_interview_token(&self, id: i64, token: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE candidates SET interview_token = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![token, id],
        )?;
        if updated == 0 {
            return Err(anyhow!("No candidate with id {}", id));
        }
        Ok(())
    }

    fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<Candidate> {
        let status: String = row.get(4)?;
        let status = CandidateStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown candidate status '{status}'").into(),
            )
        })?;
        Ok(Candidate {
            id: row.get(0)?,
            email: row.get(1)?,
            full_name: row.get(2)?,
            resume_text: row.get(3)?,
            status,
            job_id: row.get(5)?,
            job_description: row.get(6)?,
            interview_token: row.get(7)?,
            metadata: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn sample_candidate<'a>(email: &'a str, job_id: i64) -> NewCandidate<'a> {
        NewCandidate {
            email,
            full_name: "Jane Doe",
            resume_text: "Ten years of backend work.",
            job_id,
            job_description: "Build services.",
            metadata: r#"{"gmail_message_id":"m1"}"#,
        }
    }

    #[test]
    fn test_find_job_by_title_normalizes_case_and_whitespace() {
        let db = test_db();
        let id = db.add_job(" Backend Engineer \n", "Build services.").unwrap();

        let found = db.find_job_by_title("backend engineer").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.description, "Build services.");

        let found = db.find_job_by_title("  BACKEND ENGINEER  ").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_find_job_by_title_is_exact_not_fuzzy() {
        let db = test_db();
        db.add_job("Backend Engineer", "").unwrap();

        assert!(db.find_job_by_title("Backend Enginee").unwrap().is_none());
        assert!(db.find_job_by_title("Senior Backend Engineer").unwrap().is_none());
        assert!(db.find_job_by_title("").unwrap().is_none());
    }

    #[test]
    fn test_candidate_insert_and_exists() {
        let db = test_db();
        let job_id = db.add_job("Backend Engineer", "Build services.").unwrap();

        assert!(!db.candidate_exists("a@x.com").unwrap());
        db.insert_candidate(&sample_candidate("a@x.com", job_id)).unwrap();
        assert!(db.candidate_exists("a@x.com").unwrap());

        let candidate = db.get_candidate_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(candidate.status, CandidateStatus::NewApplication);
        assert_eq!(candidate.job_id, Some(job_id));
        assert_eq!(candidate.full_name, "Jane Doe");
        assert!(candidate.interview_token.is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let db = test_db();
        let job_id = db.add_job("Backend Engineer", "").unwrap();

        db.insert_candidate(&sample_candidate("a@x.com", job_id)).unwrap();
        let err = db.insert_candidate(&sample_candidate("a@x.com", job_id));
        assert!(err.is_err());
    }

    #[test]
    fn test_status_transitions_and_filtering() {
        let db = test_db();
        let job_id = db.add_job("Backend Engineer", "").unwrap();
        let id = db.insert_candidate(&sample_candidate("a@x.com", job_id)).unwrap();
        db.insert_candidate(&sample_candidate("b@x.com", job_id)).unwrap();

        db.update_candidate_status(id, CandidateStatus::QuestionnaireSent).unwrap();
        db.set_interview_token(id, "tok123").unwrap();

        let waiting = db
            .candidates_with_status(CandidateStatus::QuestionnaireSent)
            .unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].email, "a@x.com");
        assert_eq!(waiting[0].interview_token.as_deref(), Some("tok123"));

        db.update_candidate_status(id, CandidateStatus::InviteSent).unwrap();
        assert!(db
            .candidates_with_status(CandidateStatus::QuestionnaireSent)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_update_missing_candidate_errors() {
        let db = test_db();
        assert!(db
            .update_candidate_status(999, CandidateStatus::InviteSent)
            .is_err());
    }

    #[test]
    fn test_ensure_initialized() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.ensure_initialized().is_err());
        db.init().unwrap();
        assert!(db.ensure_initialized().is_ok());
    }
}
