use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::files;
use crate::messaging::{publish_result, JobHandler, ResultSink};
use crate::metrics::Metrics;
use crate::model::{JobMessage, ResultCategory, ResultMessage};

use super::bridge::{AnalysisBridge, BridgeError};

/// Runs one job end-to-end: bridge stream → one result per record → cleanup.
///
/// # Outcome
/// - Stream completes: every record was offered to the publisher, then the
///   source file is deleted.
/// - Bridge fails: a single FAIL result (category `error`, with `filePath`)
///   is published and the file is kept for inspection. Records already
///   published stay published.
///
/// Nothing here is retried. A lost job is redelivered by the broker only if
/// it was never acknowledged.
pub struct AnalysisOrchestrator {
    bridge: AnalysisBridge,
    results: Arc<dyn ResultSink>,
    metrics: Arc<Metrics>,
}

impl AnalysisOrchestrator {
    pub fn new(bridge: AnalysisBridge, results: Arc<dyn ResultSink>, metrics: Arc<Metrics>) -> Self {
        Self {
            bridge,
            results,
            metrics,
        }
    }

    pub async fn process(&self, job: JobMessage) {
        let task_id = job.task_id.as_str();
        let path = Path::new(&job.file_path);
        let file = files::file_info(path).await;

        tracing::info!(
            task_id,
            job_type = ?job.job_type,
            ?file,
            "▶️  job started"
        );

        match self.relay(&job).await {
            Ok(published) => {
                self.metrics.inc_succeeded();
                tracing::info!(task_id, published, "✅ analysis stream completed");
                files::delete(path).await;
            }
            Err(e) => {
                self.metrics.inc_failed();
                tracing::error!(task_id, error = %e, "❌ analysis failed, keeping source file");

                let message = ResultMessage::failure(task_id, e.to_string()).with_file_path(&job.file_path);
                if let Err(e) = publish_result(self.results.as_ref(), ResultCategory::Error, &message).await {
                    tracing::error!(task_id, error = %e, "❌ could not publish FAIL result");
                }
            }
        }
    }

    /// Publish every record as it arrives. Returns how many were delivered.
    async fn relay(&self, job: &JobMessage) -> Result<usize, BridgeError> {
        let mut records = std::pin::pin!(self.bridge.analyze(job));
        let mut published = 0;

        while let Some(record) = records.next().await {
            let record = record?;
            let message = ResultMessage::from_record(&job.task_id, record.fields);

            match publish_result(self.results.as_ref(), record.category.clone(), &message).await {
                Ok(()) => published += 1,
                Err(e) => tracing::warn!(
                    task_id = %job.task_id,
                    category = %record.category,
                    error = %e,
                    "⚠️  result lost, continuing with the stream"
                ),
            }
        }

        Ok(published)
    }
}

#[async_trait]
impl JobHandler for AnalysisOrchestrator {
    async fn handle(&self, job: JobMessage) {
        self.process(job).await;
    }
}
