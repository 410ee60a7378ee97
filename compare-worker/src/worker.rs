use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time;

use health::{ComponentStatus, HealthHandle};
use tokio::sync;
use tracing::{error, warn};

use compare_common::envelope::{WorkRequest, FILE_ID};

use crate::error::WorkerError;
use crate::pipeline::{ComparisonPipeline, Disposition};
use crate::source::{Offset, OffsetTracker, RequestSource};

/// A worker to consume comparison requests and spawn a pipeline run for each of them.
pub struct ComparisonWorker {
    /// The source we will be receiving requests from.
    source: Arc<dyn RequestSource>,
    /// The pipeline every request goes through.
    pipeline: ComparisonPipeline,
    /// How long to wait for a request before reporting liveness again.
    poll_interval: time::Duration,
    /// Maximum number of concurrent pipeline runs.
    max_concurrent_jobs: usize,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
    acknowledger: Acknowledger,
}

impl ComparisonWorker {
    pub fn new(
        source: Arc<dyn RequestSource>,
        pipeline: ComparisonPipeline,
        poll_interval: time::Duration,
        max_concurrent_jobs: usize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            source: source.clone(),
            pipeline,
            poll_interval,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            liveness,
            acknowledger: Acknowledger::new(source),
        }
    }

    /// Wait until a request is available on the topic.
    async fn wait_for_request(&self) -> Result<(WorkRequest, Offset), WorkerError> {
        loop {
            if self.acknowledger.halted() {
                return Err(WorkerError::DeadLetterUnavailable);
            }
            self.liveness.report_healthy().await;

            let polled = tokio::time::timeout(self.poll_interval, self.source.recv()).await;
            if let Ok(received) = polled {
                return Ok(received?);
            }
        }
    }

    /// Run this worker to continuously process any requests that become available.
    ///
    /// Returns when a message can be neither completed nor dead-lettered, leaving
    /// its offset unstored so the request is delivered again after a restart.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let semaphore = Arc::new(sync::Semaphore::new(self.max_concurrent_jobs));
        let report_semaphore_utilization = || {
            metrics::gauge!("comparison_worker_saturation_percent")
                .set(1f64 - semaphore.available_permits() as f64 / self.max_concurrent_jobs as f64);
        };

        loop {
            report_semaphore_utilization();
            if let Err(error) = self.process_next(&semaphore).await {
                self.liveness
                    .report_status(ComponentStatus::Unhealthy)
                    .await;
                return Err(error);
            }
        }
    }

    async fn process_next(&self, semaphore: &Arc<sync::Semaphore>) -> Result<(), WorkerError> {
        let (request, offset) = self.wait_for_request().await?;
        spawn_comparison_task(
            self.pipeline.clone(),
            semaphore.clone(),
            self.acknowledger.clone(),
            request,
            offset,
        )
        .await?;

        Ok(())
    }
}

/// Decides which offsets may be stored as pipeline runs settle.
#[derive(Clone)]
struct Acknowledger {
    source: Arc<dyn RequestSource>,
    offsets: Arc<Mutex<OffsetTracker>>,
    /// Set once a message could be neither processed nor dead-lettered.
    halted: Arc<AtomicBool>,
}

impl Acknowledger {
    fn new(source: Arc<dyn RequestSource>) -> Self {
        Self {
            source,
            offsets: Arc::new(Mutex::new(OffsetTracker::new())),
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Must be called in receive order, before the run for `offset` starts.
    fn begin(&self, offset: Offset) -> Result<(), WorkerError> {
        self.offsets
            .lock()
            .map_err(|_| WorkerError::OffsetTracking)?
            .begin(offset);
        Ok(())
    }

    fn settle(&self, file_id: &str, offset: Offset, disposition: Disposition) {
        if !disposition.acknowledges() {
            warn!(
                file_id,
                partition = offset.partition,
                offset = offset.offset,
                "leaving offset unstored, halting consumption"
            );
            self.halted.store(true, Ordering::SeqCst);
            return;
        }

        // Once halted, nothing more is acknowledged.
        if self.halted() {
            return;
        }

        let storable = match self.offsets.lock() {
            Ok(mut offsets) => {
                let storable = offsets.settle(offset);
                metrics::gauge!("comparison_worker_unsettled_offsets").set(offsets.unsettled() as f64);
                storable
            }
            Err(_) => {
                error!(file_id, "offset tracking unavailable, leaving offset unstored");
                return;
            }
        };

        if let Some(storable) = storable {
            if let Err(error) = self.source.store(storable) {
                error!(file_id, "failed to store offset: {}", error);
            }
        }
    }
}

/// Spawn a Tokio task to run the pipeline once we successfully acquire a permit.
///
/// The offset is stored only once this message and every earlier one of its
/// partition were completed or dead-lettered.
async fn spawn_comparison_task(
    pipeline: ComparisonPipeline,
    semaphore: Arc<sync::Semaphore>,
    acknowledger: Acknowledger,
    request: WorkRequest,
    offset: Offset,
) -> Result<tokio::task::JoinHandle<()>, WorkerError> {
    let permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| WorkerError::PoolClosed)?;

    // No new work once a message has been retained.
    if acknowledger.halted() {
        return Err(WorkerError::DeadLetterUnavailable);
    }
    acknowledger.begin(offset)?;

    Ok(tokio::spawn(async move {
        let disposition = pipeline.handle(&request).await;

        let file_id = request.get_str(FILE_ID).unwrap_or_default();
        acknowledger.settle(file_id, offset, disposition);

        drop(permit);
    }))
}

#[cfg(test)]
mod tests {
    use compare_common::envelope::{CLEAN_PRESIGNED_URL, SOURCE_PRESIGNED_URL};
    use compare_common::extraction::MockExtractor;
    use compare_common::storage::MockArtifactStore;
    use health::HealthRegistry;

    use super::*;
    use crate::publisher::MemoryPublisher;
    use crate::source::MemorySource;

    const BUCKET: &str = "clean";
    const SOURCE_URL: &str = "http://files/source.txt";
    const CLEAN_URL: &str = "http://files/clean.txt";

    fn at(partition: i32, offset: i64) -> Offset {
        Offset { partition, offset }
    }

    fn valid_request(file_id: &str) -> WorkRequest {
        WorkRequest::new()
            .with_header(FILE_ID, file_id)
            .with_header(SOURCE_PRESIGNED_URL, SOURCE_URL)
            .with_header(CLEAN_PRESIGNED_URL, CLEAN_URL)
    }

    fn malformed_request() -> WorkRequest {
        WorkRequest::new().with_header(SOURCE_PRESIGNED_URL, SOURCE_URL)
    }

    fn pipeline(publisher: &MemoryPublisher) -> ComparisonPipeline {
        let store = MockArtifactStore::new()
            .with_bucket(BUCKET)
            .with_file(SOURCE_URL, "hello world")
            .with_file(CLEAN_URL, "hello word");

        ComparisonPipeline::new(
            Arc::new(store),
            Arc::new(MockExtractor::new()),
            Arc::new(publisher.clone()),
            BUCKET,
            CLEAN_PRESIGNED_URL,
        )
    }

    async fn worker(
        source: &MemorySource,
        publisher: &MemoryPublisher,
        max_concurrent_jobs: usize,
    ) -> (ComparisonWorker, HealthRegistry) {
        let registry = HealthRegistry::new("liveness");
        let liveness = registry
            .register("worker".to_string(), ::time::Duration::seconds(30))
            .await;

        let worker = ComparisonWorker::new(
            Arc::new(source.clone()),
            pipeline(publisher),
            time::Duration::from_millis(10),
            max_concurrent_jobs,
            liveness,
        );
        (worker, registry)
    }

    async fn wait_for_stored(source: &MemorySource, expected: Vec<Offset>) {
        tokio::time::timeout(time::Duration::from_secs(5), async {
            while source.stored() != expected {
                tokio::time::sleep(time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("stored {:?}, expected {:?}", source.stored(), expected));
    }

    #[tokio::test]
    async fn handled_requests_store_their_offsets() {
        let source = MemorySource::new()
            .with_request(0, 10, valid_request("f1"))
            .with_request(0, 11, malformed_request());
        let publisher = MemoryPublisher::new();
        let (worker, registry) = worker(&source, &publisher, 1).await;

        let handle = tokio::spawn(async move { worker.run().await });
        wait_for_stored(&source, vec![at(0, 10), at(0, 11)]).await;

        assert_eq!(publisher.outcomes().len(), 1);
        assert_eq!(publisher.dead_letters().len(), 1);
        assert!(registry.get_status().healthy);
        handle.abort();
    }

    #[tokio::test]
    async fn retained_request_halts_consumption() {
        let source = MemorySource::new()
            .with_request(0, 10, malformed_request())
            .with_request(0, 11, valid_request("f2"));
        let publisher = MemoryPublisher::new().failing_dead_letters();
        let (worker, registry) = worker(&source, &publisher, 1).await;

        let result = tokio::time::timeout(time::Duration::from_secs(5), worker.run())
            .await
            .expect("worker kept consuming after a retained message");

        assert!(matches!(result, Err(WorkerError::DeadLetterUnavailable)));
        assert!(source.stored().is_empty());
        assert!(publisher.outcomes().is_empty());

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("worker"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[test]
    fn completed_offset_after_retained_one_is_not_stored() {
        let source = MemorySource::new();
        let acknowledger = Acknowledger::new(Arc::new(source.clone()));
        acknowledger.begin(at(0, 10)).unwrap();
        acknowledger.begin(at(0, 11)).unwrap();

        acknowledger.settle("f2", at(0, 11), Disposition::Completed);
        acknowledger.settle("f1", at(0, 10), Disposition::Retained);

        assert!(acknowledger.halted());
        assert!(source.stored().is_empty());
    }

    #[test]
    fn completed_offset_waits_for_earlier_run() {
        let source = MemorySource::new();
        let acknowledger = Acknowledger::new(Arc::new(source.clone()));
        acknowledger.begin(at(0, 10)).unwrap();
        acknowledger.begin(at(0, 11)).unwrap();

        acknowledger.settle("f2", at(0, 11), Disposition::Completed);
        assert!(source.stored().is_empty());

        acknowledger.settle("f1", at(0, 10), Disposition::DeadLettered);
        assert_eq!(source.stored(), vec![at(0, 11)]);
        assert!(!acknowledger.halted());
    }

    #[test]
    fn nothing_is_stored_once_halted() {
        let source = MemorySource::new();
        let acknowledger = Acknowledger::new(Arc::new(source.clone()));
        acknowledger.begin(at(0, 10)).unwrap();
        acknowledger.begin(at(1, 3)).unwrap();

        acknowledger.settle("f1", at(0, 10), Disposition::Retained);
        acknowledger.settle("f2", at(1, 3), Disposition::Completed);

        assert!(source.stored().is_empty());
    }
}
