use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Message-store operations the jobs need. Implemented by `GmailClient` for
/// real runs and by `testing::FakeMailbox` in tests.
pub trait Mailbox {
    fn search(&self, query: &str) -> Result<Vec<String>>;
    fn metadata(&self, id: &str) -> Result<MessageMeta>;
    fn fetch(&self, id: &str) -> Result<Message>;
    fn attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
    fn mark_read(&self, id: &str) -> Result<()>;
}

/// Sender and subject pulled from a metadata-format fetch.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
}

// --- Gmail payload shapes ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub payload: MessagePart,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    #[serde(default)]
    data: String,
}

// --- Gmail REST client ---

pub struct GmailClient {
    access_token: String,
    client: reqwest::blocking::Client,
}

impl GmailClient {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(&self.access_token)
            .send()
            .context("Failed to send request to Gmail API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Gmail API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        response.json().context("Failed to parse Gmail API response")
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .context("Failed to send request to Gmail API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Gmail API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        Ok(())
    }
}

impl Mailbox for GmailClient {
    fn search(&self, query: &str) -> Result<Vec<String>> {
        let list: MessageList =
            self.get_json(&format!("{GMAIL_API_BASE}/messages"), &[("q", query)])?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    fn metadata(&self, id: &str) -> Result<MessageMeta> {
        let message: Message = self.get_json(
            &format!("{GMAIL_API_BASE}/messages/{id}"),
            &[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Subject"),
            ],
        )?;

        let from = header_value(&message.payload.headers, "From").unwrap_or_default();
        let (sender_email, sender_name) = parse_from_header(&from);
        let subject = header_value(&message.payload.headers, "Subject").unwrap_or_default();

        Ok(MessageMeta {
            sender_email,
            sender_name,
            subject,
        })
    }

    fn fetch(&self, id: &str) -> Result<Message> {
        self.get_json(
            &format!("{GMAIL_API_BASE}/messages/{id}"),
            &[("format", "full")],
        )
    }

    fn attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let body: AttachmentBody = self.get_json(
            &format!("{GMAIL_API_BASE}/messages/{message_id}/attachments/{attachment_id}"),
            &[],
        )?;
        b64url_decode(&body.data)
    }

    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let raw = encode_raw_message(to, subject, body);
        self.post_json(
            &format!("{GMAIL_API_BASE}/messages/send"),
            &json!({ "raw": raw }),
        )
    }

    fn mark_read(&self, id: &str) -> Result<()> {
        self.post_json(
            &format!("{GMAIL_API_BASE}/messages/{id}/modify"),
            &json!({ "removeLabelIds": ["UNREAD"] }),
        )
    }
}

// --- Payload helpers ---

pub fn header_value(headers: &[Header], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

/// Split a `From:` header into (address, display name). Falls back to
/// "Unknown" when the header carries no display name.
pub fn parse_from_header(raw: &str) -> (String, String) {
    match mailparse::addrparse(raw) {
        Ok(list) => match list.extract_single_info() {
            Some(info) => {
                let name = info
                    .display_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "Unknown".to_string());
                (info.addr, name)
            }
            None => (String::new(), "Unknown".to_string()),
        },
        Err(_) => (String::new(), "Unknown".to_string()),
    }
}

/// Short plain-text body of a message: the snippet when present, else a
/// `text/plain` top-level payload, else the first `text/plain` sub-part.
/// Empty string when none of those exist.
pub fn plain_text_body(message: &Message) -> String {
    if !message.snippet.is_empty() {
        return message.snippet.clone();
    }

    if message.payload.mime_type == "text/plain" {
        if let Some(text) = decode_part_text(&message.payload) {
            return text;
        }
    }

    for part in &message.payload.parts {
        if part.mime_type == "text/plain" {
            if let Some(text) = decode_part_text(part) {
                return text;
            }
        }
    }

    String::new()
}

fn decode_part_text(part: &MessagePart) -> Option<String> {
    let data = part.body.data.as_deref()?;
    let bytes = b64url_decode(data).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// First attachment part that looks like a PDF and can actually be fetched.
/// Returns (filename, attachment id).
pub fn first_pdf_attachment(message: &Message) -> Option<(&str, &str)> {
    message.payload.parts.iter().find_map(|part| {
        if !part.filename.to_lowercase().ends_with(".pdf") {
            return None;
        }
        let attachment_id = part.body.attachment_id.as_deref()?;
        Some((part.filename.as_str(), attachment_id))
    })
}

/// Minimal RFC 822 text message, base64url-encoded the way the send
/// endpoint expects.
pub fn encode_raw_message(to: &str, subject: &str, body: &str) -> String {
    let mime = format!(
        "To: {to}\r\nSubject: {subject}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"utf-8\"\r\n\r\n{body}"
    );
    URL_SAFE.encode(mime.as_bytes())
}

/// Gmail emits base64url with or without padding depending on the field.
pub fn b64url_decode(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .context("Invalid base64url payload")
}
