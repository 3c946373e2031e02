//! Analysis service adapter (document store, patient QA, vision).
//!
//! Talks to the external Python API over HTTP and implements the
//! `arogya-core` [`AnalysisService`] port.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Response, Url};
use serde::Serialize;
use tracing::debug;

use arogya_core::{
    analysis::{AnalysisService, Answer, DocumentReceipt, UploadFile},
    domain::PatientId,
    errors::Error,
    Result,
};

const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Clone, Debug)]
pub struct AnalysisClient {
    base: Url,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct QaRequest<'a> {
    question: &'a str,
}

impl AnalysisClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid analysis api url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "analysis api url {base_url:?} cannot be used as a base"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("analysis http client build error: {e}")))?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    ///
    /// `.` and `..` are refused; `url` would silently drop them from the path.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        if let Some(bad) = segments.iter().find(|s| **s == "." || **s == "..") {
            return Err(Error::External(format!(
                "refusing dot path segment {bad:?} in analysis url"
            )));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config("analysis api url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn file_part(file: UploadFile) -> Result<multipart::Part> {
        multipart::Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|e| Error::External(format!("analysis multipart error: {e}")))
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::External(format!("{what} request error: {e}")))?;
        check_status(resp).await
    }
}

/// Map a non-2xx response to [`Error::Backend`], pulling out the service's message.
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Backend {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// The service answers with `{"error":{"message"}}`, FastAPI's `{"detail"}`, or plain text.
fn error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(m) = v.pointer("/error/message").and_then(|m| m.as_str()) {
            return m.to_string();
        }
        if let Some(d) = v.get("detail") {
            return match d.as_str() {
                Some(s) => s.to_string(),
                None => d.to_string(),
            };
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(ERROR_BODY_PREVIEW).collect()
}

#[async_trait]
impl AnalysisService for AnalysisClient {
    async fn upload_document(
        &self,
        patient: &PatientId,
        file: UploadFile,
    ) -> Result<DocumentReceipt> {
        let url = self.endpoint(&["patients", patient.as_str(), "documents"])?;
        debug!(%url, file = %file.file_name, bytes = file.bytes.len(), "uploading document");

        let form = multipart::Form::new().part("file", Self::file_part(file)?);
        let resp = self
            .send(self.http.post(url).multipart(form), "document upload")
            .await?;

        // The receipt is informational; an unexpected body is not a failed upload.
        Ok(resp.json::<DocumentReceipt>().await.unwrap_or_default())
    }

    async fn ask_vision(&self, file: UploadFile, question: &str) -> Result<Answer> {
        let url = self.endpoint(&["api", "chat", "vision"])?;
        debug!(%url, file = %file.file_name, "vision query");

        let form = multipart::Form::new()
            .part("file", Self::file_part(file)?)
            .text("question", question.to_string());
        let resp = self
            .send(self.http.post(url).multipart(form), "vision")
            .await?;

        resp.json::<Answer>()
            .await
            .map_err(|e| Error::External(format!("vision json error: {e}")))
    }

    async fn ask_patient(&self, patient: &PatientId, question: &str) -> Result<Answer> {
        let url = self.endpoint(&["patients", patient.as_str(), "qa"])?;
        debug!(%url, "patient qa");

        let resp = self
            .send(self.http.post(url).json(&QaRequest { question }), "qa")
            .await?;

        resp.json::<Answer>()
            .await
            .map_err(|e| Error::External(format!("qa json error: {e}")))
    }

    async fn health(&self) -> Result<()> {
        let url = self.endpoint(&["health"])?;
        self.send(self.http.get(url), "health").await?;
        Ok(())
    }
}
