use serde::Serialize;
use serde_json::{Map, Value};

/// Analysis result published back to RabbitMQ.
///
/// Queue: selected per [`ResultCategory`](super::ResultCategory) by
/// `messaging::QueueRoutes`.
///
/// Exactly one of `error` / `analysis_result` is populated, matching `status`.
/// The constructors are the only way this type is built in the crate, which
/// keeps that pairing intact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub task_id: String,

    pub status: ResultStatus,

    /// Human-readable failure description. Only present when `status` is `FAIL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Opaque backend payload. Only present when `status` is `SUCCESS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<Value>,

    /// Source file reference, attached to failures synthesized by the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Fail,
}

impl ResultMessage {
    /// Builds a successful result.
    pub fn success(task_id: impl Into<String>, analysis_result: Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: ResultStatus::Success,
            error: None,
            analysis_result: Some(analysis_result),
            file_path: None,
        }
    }

    /// Builds a failed result.
    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: ResultStatus::Fail,
            error: Some(error.into()),
            analysis_result: None,
            file_path: None,
        }
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// Normalise one backend stream record into a result for `task_id`.
    ///
    /// Records either follow the full result shape (`status`, `error`,
    /// `analysisResult`) or are a bare payload such as `{"type":"pron","score":85}`.
    /// Bare payloads become a `SUCCESS` whose `analysisResult` is the record
    /// itself minus the envelope keys.
    pub fn from_record(task_id: &str, mut record: Map<String, Value>) -> Self {
        for key in ["type", "taskId", "task_id"] {
            record.remove(key);
        }

        let status = record.remove("status");
        let error = record.remove("error");

        let failed = matches!(&status, Some(Value::String(s)) if s.eq_ignore_ascii_case("fail"));
        if failed {
            let message = match error {
                Some(Value::String(s)) if !s.is_empty() => s,
                _ => "analysis failed".to_string(),
            };
            return Self::failure(task_id, message);
        }

        let nested = match record.remove("analysisResult") {
            Some(value) => Some(value),
            None => record.remove("analysis_result"),
        };
        let payload = nested.unwrap_or(Value::Object(record));

        Self::success(task_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn bare_record_becomes_success_payload() {
        let result = ResultMessage::from_record("t1", object(json!({"type": "pron", "score": 85})));
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.analysis_result, Some(json!({"score": 85})));
        assert_eq!(result.error, None);
    }

    #[test]
    fn enveloped_record_unwraps_analysis_result() {
        let record = object(json!({
            "type": "inton",
            "taskId": "t1",
            "status": "SUCCESS",
            "error": null,
            "analysisResult": {"score": 78}
        }));
        let result = ResultMessage::from_record("t1", record);
        assert_eq!(result, ResultMessage::success("t1", json!({"score": 78})));
    }

    #[test]
    fn failed_record_keeps_error_only() {
        let record = object(json!({"type": "llm", "status": "FAIL", "error": "model overloaded"}));
        let result = ResultMessage::from_record("t1", record);
        assert_eq!(result, ResultMessage::failure("t1", "model overloaded"));
        assert!(result.analysis_result.is_none());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let body = serde_json::to_value(
            ResultMessage::failure("t1", "backend timed out").with_file_path("/shared/a.wav"),
        )
        .unwrap();
        assert_eq!(
            body,
            json!({
                "taskId": "t1",
                "status": "FAIL",
                "error": "backend timed out",
                "filePath": "/shared/a.wav"
            })
        );
    }
}
