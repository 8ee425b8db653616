use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Audio-analysis job received from RabbitMQ.
///
/// Queue: `RABBITMQ_QUEUE` (default `ai.jobs`), default exchange.
///
/// Producers are not uniform about field spelling, so every field carries an
/// explicit snake_case alias next to its camelCase name. New spellings are
/// added here as aliases and old ones are never removed. A payload carrying
/// both spellings of a field keeps the camelCase one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    /// Correlates the request with every result published for it.
    #[serde(alias = "task_id")]
    pub task_id: String,

    /// Path of the input audio on the shared volume.
    #[serde(alias = "file_path")]
    pub file_path: String,

    #[serde(default, alias = "job_type")]
    pub job_type: JobType,

    /// Structured metadata forwarded to the backend (`fullText`, word-level
    /// detail flags, ...). Absent means an empty object.
    #[serde(default, alias = "analysis_request")]
    pub analysis_request: Map<String, Value>,
}

/// Kind of analysis requested. Unknown kinds are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    #[default]
    Pronunciation,
    Conversation,
    Other(String),
}

impl From<String> for JobType {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pronunciation" | "pron" => Self::Pronunciation,
            "conversation" => Self::Conversation,
            _ => Self::Other(raw),
        }
    }
}

impl From<JobType> for String {
    fn from(kind: JobType) -> Self {
        match kind {
            JobType::Pronunciation => "pronunciation".to_string(),
            JobType::Conversation => "conversation".to_string(),
            JobType::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("job message does not match the contract: {source}")]
    Schema {
        task_id: Option<String>,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid job message: {reason}")]
    Invalid {
        task_id: Option<String>,
        reason: &'static str,
    },
}

impl DecodeError {
    /// Task id salvaged from a payload that failed to decode, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Schema { task_id, .. } | Self::Invalid { task_id, .. } => task_id.as_deref(),
        }
    }
}

impl JobMessage {
    /// Decode and validate a delivery body.
    ///
    /// The body is parsed into a generic JSON value first so that a task id can
    /// still be recovered when the payload is valid JSON but breaks the schema.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut value: Value = serde_json::from_slice(body).map_err(DecodeError::Json)?;
        let task_id = extract_task_id(&value);
        drop_shadowed_spellings(&mut value);

        let job: JobMessage = serde_json::from_value(value).map_err(|source| DecodeError::Schema {
            task_id: task_id.clone(),
            source,
        })?;

        if job.task_id.trim().is_empty() {
            return Err(DecodeError::Invalid {
                task_id: None,
                reason: "taskId must not be empty",
            });
        }
        if job.file_path.trim().is_empty() {
            return Err(DecodeError::Invalid {
                task_id,
                reason: "filePath must not be empty",
            });
        }

        Ok(job)
    }
}

/// camelCase / snake_case spellings of every [`JobMessage`] field.
const SPELLINGS: [(&str, &str); 4] = [
    ("taskId", "task_id"),
    ("filePath", "file_path"),
    ("jobType", "job_type"),
    ("analysisRequest", "analysis_request"),
];

/// Remove snake_case keys whose camelCase twin is present. serde treats an
/// alias and its field name as the same field and rejects the pair.
fn drop_shadowed_spellings(value: &mut Value) {
    let Value::Object(fields) = value else {
        return;
    };
    for (camel, snake) in SPELLINGS {
        if fields.contains_key(camel) {
            fields.remove(snake);
        }
    }
}

/// Best-effort `taskId` / `task_id` lookup on an arbitrary JSON value.
/// Numeric ids are accepted and rendered as strings.
fn extract_task_id(value: &Value) -> Option<String> {
    let raw = value.get("taskId").or_else(|| value.get("task_id"))?;
    let id = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}
