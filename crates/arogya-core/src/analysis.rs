//! Port for the external analysis service (document store, RAG QA, vision).
//!
//! The service is an opaque HTTP collaborator. Payloads are forwarded as-is and
//! only the fields the bot relays to the user are modelled.

use async_trait::async_trait;
use serde::Deserialize;

use crate::{domain::PatientId, Result};

/// A file to forward to the analysis service as a multipart `file` field.
#[derive(Clone, Debug)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Acknowledgement returned by the document upload endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DocumentReceipt {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Citation {
    pub doc: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Answer from the QA or vision endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Answer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// `POST /patients/{patient}/documents` (multipart `file`).
    async fn upload_document(&self, patient: &PatientId, file: UploadFile)
        -> Result<DocumentReceipt>;

    /// `POST /api/chat/vision` (multipart `file` + `question`).
    async fn ask_vision(&self, file: UploadFile, question: &str) -> Result<Answer>;

    /// `POST /patients/{patient}/qa` with `{ "question": ... }`.
    async fn ask_patient(&self, patient: &PatientId, question: &str) -> Result<Answer>;

    /// `GET /health`.
    async fn health(&self) -> Result<()>;
}
