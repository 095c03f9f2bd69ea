use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Converts an uploaded PDF into plain text.
pub trait DocumentReader {
    fn read_pdf(&self, path: &Path) -> Result<String>;
}

/// Plain prompt-in, text-out completion.
pub trait LanguageModel {
    fn generate(&self, prompt: &str) -> Result<String>;
}

// --- Gemini client ---

pub const GEMINI_MODEL: &str = "gemini-2.0-flash";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

const EXTRACT_INSTRUCTION: &str =
    "Extract all text content from this resume PDF. Return the full text in a clean, readable format.";

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: ResponseContent,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadedFile {
    name: String,
    uri: String,
}

pub struct GeminiClient {
    api_key: String,
    client: reqwest::blocking::Client,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn upload_pdf(&self, path: &Path) -> Result<UploadedFile> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let url = format!(
            "{GEMINI_API_BASE}/upload/v1beta/files?key={}",
            self.api_key
        );
        let response = self
            .client
            .post(&url)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("Content-Type", "application/pdf")
            .body(bytes)
            .send()
            .context("Failed to upload file to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Gemini upload failed with status {}: {}",
                status,
                error_text
            ));
        }

        let uploaded: UploadResponse = response
            .json()
            .context("Failed to parse Gemini upload response")?;
        Ok(uploaded.file)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let url = format!("{GEMINI_API_BASE}/v1beta/{name}?key={}", self.api_key);
        let response = self
            .client
            .delete(&url)
            .send()
            .context("Failed to delete Gemini upload")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Gemini file delete failed with status {}",
                response.status()
            ));
        }
        Ok(())
    }

    fn post_generate(&self, parts: Vec<RequestPart>) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![RequestContent { parts }],
        };

        let url = format!(
            "{GEMINI_API_BASE}/v1beta/models/{GEMINI_MODEL}:generateContent?key={}",
            self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .context("Failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Gemini API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: GenerateResponse = response
            .json()
            .context("Failed to parse Gemini API response")?;

        let text: String = api_response
            .candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(anyhow!("No content in Gemini API response"));
        }
        Ok(text)
    }
}

impl DocumentReader for GeminiClient {
    fn read_pdf(&self, path: &Path) -> Result<String> {
        info!("extracting resume text from {}", path.display());
        let uploaded = self.upload_pdf(path)?;

        let result = self.post_generate(vec![
            RequestPart {
                text: None,
                file_data: Some(FileData {
                    mime_type: "application/pdf".to_string(),
                    file_uri: uploaded.uri.clone(),
                }),
            },
            RequestPart {
                text: Some(EXTRACT_INSTRUCTION.to_string()),
                file_data: None,
            },
        ]);

        // The remote upload is scratch data; drop it on both outcome paths.
        if let Err(e) = self.delete_file(&uploaded.name) {
            warn!("could not delete Gemini upload {}: {e:#}", uploaded.name);
        }

        result
    }
}

impl LanguageModel for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.post_generate(vec![RequestPart {
            text: Some(prompt.to_string()),
            file_data: None,
        }])
    }
}
