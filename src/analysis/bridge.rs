use std::path::{Path, PathBuf};
use std::time::Duration;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::files::{self, FileError};
use crate::model::{JobMessage, ResultCategory};

// ── Error ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error(transparent)]
    File(FileError),

    #[error("analysis backend timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("analysis backend returned HTTP {0}")]
    BackendStatus(u16),

    #[error("analysis backend communication failed: {0}")]
    Communication(#[source] reqwest::Error),

    #[error("malformed record from analysis backend: {0}")]
    MalformedRecord(String),
}

impl From<FileError> for BridgeError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::NotFound(path) => Self::FileNotFound(path),
            e => Self::File(e),
        }
    }
}

// ── Record ─────────────────────────────────────────────────────────────────────

/// One line of the backend's NDJSON stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    /// Taken from the record's `type` key.
    pub category: ResultCategory,
    /// The full JSON object, `type` included.
    pub fields: Map<String, Value>,
}

impl AnalysisRecord {
    fn decode(line: &[u8]) -> Result<Self, BridgeError> {
        let malformed = |reason: &str| {
            BridgeError::MalformedRecord(format!(
                "{reason}: {}",
                String::from_utf8_lossy(line).chars().take(200).collect::<String>()
            ))
        };

        let Value::Object(fields) =
            serde_json::from_slice::<Value>(line).map_err(|_| malformed("not JSON"))?
        else {
            return Err(malformed("not a JSON object"));
        };

        let category = match fields.get("type") {
            Some(Value::String(kind)) => ResultCategory::parse(kind),
            _ => return Err(malformed("missing string `type`")),
        };

        Ok(Self { category, fields })
    }
}

/// Splits a byte stream on `\n` regardless of how it was chunked.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `chunk`; return every line it completed, blank lines dropped.
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let line = std::mem::replace(&mut self.pending, rest);
            if let Some(line) = non_blank(&line[..pos]) {
                lines.push(line.to_vec());
            }
        }
        lines
    }

    /// Whatever followed the last newline.
    fn finish(self) -> Option<Vec<u8>> {
        non_blank(&self.pending).map(<[u8]>::to_vec)
    }
}

fn non_blank(line: &[u8]) -> Option<&[u8]> {
    let trimmed = line.trim_ascii();
    (!trimmed.is_empty()).then_some(trimmed)
}

// ── Bridge ─────────────────────────────────────────────────────────────────────

/// HTTP client for the analysis backend.
///
/// `POST {base}/analyze` takes the audio as multipart and answers with
/// `application/x-ndjson`, one record per line, written as soon as each part
/// of the analysis is done.
#[derive(Debug, Clone)]
pub struct AnalysisBridge {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl AnalysisBridge {
    /// `timeout` bounds each request as a whole, response body included.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BridgeError::Communication)?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Submit `job` and yield its records as they arrive.
    ///
    /// Nothing happens until the stream is polled. The first error ends the
    /// stream; nothing is retried.
    pub fn analyze(
        &self,
        job: &JobMessage,
    ) -> impl Stream<Item = Result<AnalysisRecord, BridgeError>> + Send + 'static {
        let client = self.client.clone();
        let url = format!("{}/analyze", self.base_url);
        let timeout = self.timeout;
        let task_id = job.task_id.clone();
        let path = PathBuf::from(&job.file_path);
        let request = Value::Object(job.analysis_request.clone());

        try_stream! {
            let audio = files::read_audio(&path).await.map_err(BridgeError::from)?;
            tracing::info!(task_id = %task_id, bytes = audio.len(), "🚀 sending audio to analysis backend");

            let form = multipart_form(&task_id, &path, audio, &request);
            let response = client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| classify(e, timeout))?;

            let status = response.status();
            if !status.is_success() {
                Err(BridgeError::BackendStatus(status.as_u16()))?;
            }

            let mut body = response.bytes_stream();
            let mut lines = LineBuffer::default();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| classify(e, timeout))?;
                for line in lines.push(&chunk) {
                    let record = AnalysisRecord::decode(&line)?;
                    tracing::debug!(task_id = %task_id, category = %record.category, "record received");
                    yield record;
                }
            }

            if let Some(line) = lines.finish() {
                let record = AnalysisRecord::decode(&line)?;
                yield record;
            }
        }
    }

    /// Backend liveness probe: `GET {base}/health`.
    pub async fn health(&self) -> Result<Value, BridgeError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::BackendStatus(status.as_u16()));
        }

        response.json().await.map_err(|e| classify(e, self.timeout))
    }
}

fn multipart_form(task_id: &str, path: &Path, audio: Vec<u8>, request: &Value) -> Form {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());

    Form::new()
        .part("file", Part::bytes(audio).file_name(file_name))
        .text("taskId", task_id.to_string())
        .text("analysisRequest", request.to_string())
}

fn classify(e: reqwest::Error, timeout: Duration) -> BridgeError {
    if e.is_timeout() {
        BridgeError::Timeout(timeout)
    } else {
        BridgeError::Communication(e)
    }
}
