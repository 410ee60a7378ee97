//! The comparison pipeline run for every inbound request.
//!
//! A run walks a strictly linear sequence of stages:
//!
//! `Received → SourceFetched → SourceMetaUploaded → SourceParsed → CleanFetched
//! → CleanMetaUploaded → CleanParsed → DiffUploaded → Republished`
//!
//! Any failing step aborts the run, with one exception: storing a file's
//! metadata artifact is best effort. A failed metadata upload is logged and
//! the run moves on without the corresponding header.
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use compare_common::artifact::{ArtifactRole, FileRole};
use compare_common::diff::{compare, DiffError};
use compare_common::envelope::{
    EnvelopeError, WorkRequest, COMPARISON_URL, DIFFERENCE_PERCENTAGE, FILE_ID,
    META_PRESIGNED_URL,
};
use compare_common::extraction::{ExtractionError, Extractor, Operation};
use compare_common::storage::{ArtifactStore, StorageError, PRESIGNED_URL_TTL};

use crate::publisher::{OutcomePublisher, PublishError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    SourceFetched,
    SourceMetaUploaded,
    SourceParsed,
    CleanFetched,
    CleanMetaUploaded,
    CleanParsed,
    DiffUploaded,
    Republished,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::SourceFetched => "source_fetched",
            Stage::SourceMetaUploaded => "source_meta_uploaded",
            Stage::SourceParsed => "source_parsed",
            Stage::CleanFetched => "clean_fetched",
            Stage::CleanMetaUploaded => "clean_meta_uploaded",
            Stage::CleanParsed => "clean_parsed",
            Stage::DiffUploaded => "diff_uploaded",
            Stage::Republished => "republished",
        }
    }

    fn fetched(role: FileRole) -> Self {
        match role {
            FileRole::Source => Stage::SourceFetched,
            FileRole::Clean => Stage::CleanFetched,
        }
    }

    fn meta_uploaded(role: FileRole) -> Self {
        match role {
            FileRole::Source => Stage::SourceMetaUploaded,
            FileRole::Clean => Stage::CleanMetaUploaded,
        }
    }

    fn parsed(role: FileRole) -> Self {
        match role {
            FileRole::Source => Stage::SourceParsed,
            FileRole::Clean => Stage::CleanParsed,
        }
    }

    /// The stage a run is in before it starts working on `role`.
    fn before(role: FileRole) -> Self {
        match role {
            FileRole::Source => Stage::Received,
            FileRole::Clean => Stage::SourceParsed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enumeration of the reasons a pipeline run is aborted.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Malformed(#[from] EnvelopeError),
    #[error("failed to fetch {role} file: {error}")]
    Fetch { role: FileRole, error: StorageError },
    #[error("{operation} extraction of {role} file failed: {error}")]
    Extraction {
        role: FileRole,
        operation: Operation,
        error: ExtractionError,
    },
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error("failed to store diff artifact: {0}")]
    DiffUpload(StorageError),
    #[error("failed to republish envelope: {0}")]
    Publish(#[from] PublishError),
}

impl PipelineError {
    /// The last stage the run completed before failing.
    pub fn reached(&self) -> Stage {
        match self {
            PipelineError::Malformed(_) => Stage::Received,
            PipelineError::Fetch { role, .. } => Stage::before(*role),
            PipelineError::Extraction {
                role,
                operation: Operation::Meta,
                ..
            } => Stage::fetched(*role),
            PipelineError::Extraction { role, .. } => Stage::meta_uploaded(*role),
            PipelineError::Diff(_) | PipelineError::DiffUpload(_) => Stage::CleanParsed,
            PipelineError::Publish(_) => Stage::DiffUploaded,
        }
    }
}

/// What became of a message once the pipeline is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    /// Aborted, and parked on the dead-letter topic.
    DeadLettered,
    /// Aborted, and the dead-letter write failed too. The message must not be acknowledged.
    Retained,
}

impl Disposition {
    /// Whether the inbound message may be acknowledged.
    pub fn acknowledges(&self) -> bool {
        !matches!(self, Disposition::Retained)
    }
}

/// Runs comparisons using the process-wide client handles.
#[derive(Clone)]
pub struct ComparisonPipeline {
    store: Arc<dyn ArtifactStore>,
    extractor: Arc<dyn Extractor>,
    publisher: Arc<dyn OutcomePublisher>,
    bucket: String,
    clean_meta_header: String,
}

impl ComparisonPipeline {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        extractor: Arc<dyn Extractor>,
        publisher: Arc<dyn OutcomePublisher>,
        bucket: &str,
        clean_meta_header: &str,
    ) -> Self {
        Self {
            store,
            extractor,
            publisher,
            bucket: bucket.to_owned(),
            clean_meta_header: clean_meta_header.to_owned(),
        }
    }

    /// Process one request and settle it: completed, dead-lettered or retained.
    pub async fn handle(&self, request: &WorkRequest) -> Disposition {
        let file_id = request.get_str(FILE_ID).unwrap_or_default();
        metrics::counter!("comparison_jobs_total").increment(1);
        let start = Instant::now();

        let error = match self.run(request).await {
            Ok(_) => {
                let elapsed = start.elapsed().as_secs_f64();
                metrics::histogram!("comparison_jobs_processing_duration_seconds").record(elapsed);
                metrics::counter!("comparison_jobs_completed").increment(1);
                info!(file_id, elapsed, "comparison completed");
                return Disposition::Completed;
            }
            Err(error) => error,
        };

        let stage = error.reached();
        let labels = [("stage", stage.as_str())];
        metrics::counter!("comparison_jobs_failed", &labels).increment(1);
        error!(file_id, %stage, "comparison aborted: {}", error);

        match self.publisher.dead_letter(request, &error.to_string()).await {
            Ok(()) => {
                metrics::counter!("comparison_jobs_dead_lettered").increment(1);
                Disposition::DeadLettered
            }
            Err(publish_error) => {
                error!(
                    file_id,
                    "failed to dead-letter aborted message: {}", publish_error
                );
                Disposition::Retained
            }
        }
    }

    /// Walk the whole pipeline and return the envelope as republished.
    pub async fn run(&self, request: &WorkRequest) -> Result<WorkRequest, PipelineError> {
        // Validated up front: the clean URL is read before its header can be
        // overwritten with the clean metadata URL.
        let target = request.target()?;
        let file_id = target.file_id.as_str();
        let mut outcome = request.clone();

        let original = self
            .process_file(file_id, FileRole::Source, &target.source_url, &mut outcome)
            .await?;
        let altered = self
            .process_file(file_id, FileRole::Clean, &target.clean_url, &mut outcome)
            .await?;

        let (payload, percentage) = compare(original, altered).await?;
        let comparison_url = self
            .store_artifact(file_id, ArtifactRole::Diff, payload.render().into_bytes())
            .await
            .map_err(PipelineError::DiffUpload)?;
        outcome.insert(COMPARISON_URL, comparison_url);
        outcome.insert(DIFFERENCE_PERCENTAGE, format!("{percentage:.4}"));
        debug!(file_id, stage = %Stage::DiffUploaded, percentage, "diff stored");

        self.publisher.publish_outcome(&outcome).await?;
        debug!(file_id, stage = %Stage::Republished, "envelope republished");

        Ok(outcome)
    }

    /// Fetch one file, store its metadata, and return its parsed text.
    async fn process_file(
        &self,
        file_id: &str,
        role: FileRole,
        url: &str,
        outcome: &mut WorkRequest,
    ) -> Result<String, PipelineError> {
        let document = self
            .store
            .fetch(url)
            .await
            .map_err(|error| PipelineError::Fetch { role, error })?;
        debug!(
            file_id,
            %role,
            stage = %Stage::fetched(role),
            bytes = document.len(),
            "fetched file"
        );

        let metadata = self
            .extractor
            .extract(Operation::Meta, document.clone())
            .await
            .map_err(|error| PipelineError::Extraction {
                role,
                operation: Operation::Meta,
                error,
            })?;

        let artifact = role.meta_artifact();
        match self
            .store_artifact(file_id, artifact, metadata.into_text().into_bytes())
            .await
        {
            Ok(meta_url) => {
                outcome.insert(self.meta_header(role), meta_url);
                debug!(file_id, %role, stage = %Stage::meta_uploaded(role), "metadata stored");
            }
            Err(error) => {
                let labels = [("role", role.as_str())];
                metrics::counter!("comparison_meta_upload_failures", &labels).increment(1);
                warn!(
                    file_id,
                    %role,
                    "continuing without {} artifact: {}",
                    artifact.object_key(file_id),
                    error
                );
            }
        }

        let text = self
            .extractor
            .parse(document)
            .await
            .map_err(|error| PipelineError::Extraction {
                role,
                operation: Operation::Parse,
                error,
            })?;
        debug!(
            file_id,
            %role,
            stage = %Stage::parsed(role),
            chars = text.chars().count(),
            "parsed file"
        );

        Ok(text)
    }

    /// Upload an artifact under its deterministic key and presign it.
    async fn store_artifact(
        &self,
        file_id: &str,
        role: ArtifactRole,
        body: Vec<u8>,
    ) -> Result<String, StorageError> {
        let key = role.object_key(file_id);
        self.store.upload(&self.bucket, &key, body).await?;
        self.store
            .presign(&self.bucket, &key, PRESIGNED_URL_TTL)
            .await
    }

    fn meta_header(&self, role: FileRole) -> &str {
        match role {
            FileRole::Source => META_PRESIGNED_URL,
            FileRole::Clean => &self.clean_meta_header,
        }
    }
}
