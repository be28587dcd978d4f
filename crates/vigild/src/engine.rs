use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use vigil_core::{decode_image, AggregateResult, Embedding, EmbeddingExtractor, ExtractError, FrameSampler};

/// Pending jobs allowed per worker before submitters wait.
const QUEUE_DEPTH_PER_WORKER: usize = 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verify(#[from] vigil_core::Error),
    #[error("extraction did not finish within {0:?}")]
    Timeout(Duration),
    #[error("worker pool exited")]
    ChannelClosed,
    #[error("worker startup failed: {0}")]
    Startup(String),
}

type Reply<T> = oneshot::Sender<Result<T, vigil_core::Error>>;

/// Jobs sent from request handlers to the worker threads.
enum WorkerRequest {
    Extract {
        image: Vec<u8>,
        reply: Reply<Vec<Embedding>>,
    },
    CompareVideo {
        user_id: String,
        baseline: Embedding,
        frames: Vec<Vec<u8>>,
        reply: Reply<AggregateResult>,
    },
}

/// Clone-safe handle to the extraction worker pool.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerRequest>,
    /// Deadline for one extraction, queueing included.
    timeout: Duration,
    stride: usize,
    workers: usize,
}

impl WorkerHandle {
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Decode an image and extract one embedding per face.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Vec<Embedding>, EngineError> {
        self.submit(self.timeout, |reply| WorkerRequest::Extract { image, reply })
            .await
    }

    /// Compare sampled frames of a video against `baseline`.
    ///
    /// The deadline is the per-extraction timeout times the number of
    /// sampled frames. If it expires the worker stops at the next sampled
    /// frame.
    pub async fn compare_video(
        &self,
        user_id: String,
        baseline: Embedding,
        frames: Vec<Vec<u8>>,
    ) -> Result<AggregateResult, EngineError> {
        let sampled = (frames.len() / self.stride).max(1);
        let deadline = self.timeout.saturating_mul(u32::try_from(sampled).unwrap_or(u32::MAX));
        self.submit(deadline, |reply| WorkerRequest::CompareVideo {
            user_id,
            baseline,
            frames,
            reply,
        })
        .await
    }

    async fn submit<T>(
        &self,
        deadline: Duration,
        make: impl FnOnce(Reply<T>) -> WorkerRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(make(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };

        match tokio::time::timeout(deadline, exchange).await {
            Ok(reply) => Ok(reply??),
            Err(_) => {
                tracing::warn!(?deadline, "worker request timed out");
                Err(EngineError::Timeout(deadline))
            }
        }
    }
}

/// Spawn `count` worker threads, each with its own extractor from `factory`.
///
/// All extractors are built before any thread starts, so a missing model
/// fails startup instead of the first request. Workers share one job queue
/// and exit once every handle is dropped.
pub fn spawn_workers<E, F>(
    count: usize,
    timeout: Duration,
    sampler: FrameSampler,
    factory: F,
) -> Result<WorkerHandle, EngineError>
where
    E: EmbeddingExtractor + 'static,
    F: Fn() -> Result<E, ExtractError>,
{
    let count = count.max(1);
    let extractors = (0..count)
        .map(|_| factory())
        .collect::<Result<Vec<E>, _>>()
        .map_err(|e| EngineError::Startup(e.to_string()))?;

    let (tx, rx) = mpsc::channel::<WorkerRequest>(count * QUEUE_DEPTH_PER_WORKER);
    let rx = Arc::new(Mutex::new(rx));

    for (id, mut extractor) in extractors.into_iter().enumerate() {
        let rx = Arc::clone(&rx);
        std::thread::Builder::new()
            .name(format!("vigil-worker-{id}"))
            .spawn(move || {
                tracing::debug!(worker = id, "worker thread started");
                loop {
                    // Idle workers queue on the mutex; the holder waits for the next job.
                    let next = rx.lock().unwrap_or_else(PoisonError::into_inner).blocking_recv();
                    let Some(req) = next else {
                        break;
                    };
                    run_job(&mut extractor, &sampler, req);
                }
                tracing::debug!(worker = id, "worker thread exiting");
            })
            .map_err(|e| EngineError::Startup(format!("failed to spawn worker thread: {e}")))?;
    }

    tracing::info!(workers = count, ?timeout, stride = sampler.stride(), "extraction workers started");
    Ok(WorkerHandle {
        tx,
        timeout,
        stride: sampler.stride(),
        workers: count,
    })
}

fn run_job<E: EmbeddingExtractor>(extractor: &mut E, sampler: &FrameSampler, req: WorkerRequest) {
    match req {
        WorkerRequest::Extract { image, reply } => {
            let result = decode_image(&image)
                .and_then(|img| extractor.extract(&img))
                .map_err(vigil_core::Error::from);
            if let Err(e) = &result {
                tracing::debug!(error = %e, "extraction failed");
            }
            let _ = reply.send(result);
        }
        WorkerRequest::CompareVideo {
            user_id,
            baseline,
            frames,
            reply,
        } => {
            // A closed reply means the caller gave up; stop sampling.
            match sampler.compare_until(extractor, &user_id, &baseline, &frames, || reply.is_closed()) {
                Ok(Some(result)) => {
                    let _ = reply.send(Ok(result));
                }
                Ok(None) => tracing::debug!(user_id = %user_id, "video comparison abandoned by caller"),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct StubExtractor {
        faces: usize,
        delay: Duration,
    }

    impl EmbeddingExtractor for StubExtractor {
        fn extract(&mut self, _image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
            std::thread::sleep(self.delay);
            Ok(vec![Embedding::new(vec![0.5, 0.5]); self.faces])
        }
    }

    fn png() -> Vec<u8> {
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn pool(faces: usize, delay: Duration, timeout: Duration) -> WorkerHandle {
        spawn_workers(2, timeout, FrameSampler::default(), move || {
            Ok(StubExtractor { faces, delay })
        })
        .unwrap()
    }

    fn single_worker(delay: Duration, timeout: Duration) -> WorkerHandle {
        spawn_workers(1, timeout, FrameSampler::new(1), move || {
            Ok(StubExtractor { faces: 1, delay })
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_extract_round_trip() {
        let workers = pool(2, Duration::ZERO, Duration::from_secs(5));
        let faces = workers.extract(png()).await.unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(workers.workers(), 2);
    }

    #[tokio::test]
    async fn test_bad_image_is_extraction_failure() {
        let workers = pool(1, Duration::ZERO, Duration::from_secs(5));
        let err = workers.extract(b"nope".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Verify(vigil_core::Error::ExtractionFailure(_))));
    }

    #[tokio::test]
    async fn test_slow_extraction_times_out() {
        let workers = pool(1, Duration::from_millis(500), Duration::from_millis(50));
        let err = workers.extract(png()).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_parallel_requests_all_answered() {
        let workers = pool(1, Duration::from_millis(10), Duration::from_secs(5));
        let jobs: Vec<_> = (0..10)
            .map(|_| {
                let w = workers.clone();
                tokio::spawn(async move { w.extract(png()).await })
            })
            .collect();
        for job in jobs {
            assert_eq!(job.await.unwrap().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_abandoned_video_frees_worker() {
        let workers = single_worker(Duration::from_millis(100), Duration::from_millis(500));
        let frames = vec![png(); 20];

        // Give up on a two-second video well before it finishes.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(250),
            workers.compare_video("u1".into(), Embedding::new(vec![0.5, 0.5]), frames),
        )
        .await;
        assert!(abandoned.is_err());

        // The worker stops at its next sampled frame and takes this job in time.
        let faces = workers.extract(png()).await.unwrap();
        assert_eq!(faces.len(), 1);
    }

    #[tokio::test]
    async fn test_video_deadline_scales_with_sampled_frames() {
        let workers = single_worker(Duration::from_millis(60), Duration::from_millis(100));
        let frames = vec![png(); 4];
        let result = workers
            .compare_video("u1".into(), Embedding::new(vec![0.5, 0.5]), frames)
            .await
            .unwrap();
        assert_eq!(result.pct_present, 1.0);
    }

    #[tokio::test]
    async fn test_deadline_covers_time_spent_queued() {
        let workers = single_worker(Duration::from_millis(300), Duration::from_millis(100));
        let first = {
            let w = workers.clone();
            tokio::spawn(async move { w.extract(png()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        let err = workers.extract(png()).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(matches!(first.await.unwrap(), Err(EngineError::Timeout(_))));
    }

    #[test]
    fn test_factory_failure_aborts_startup() {
        let result = spawn_workers(3, Duration::from_secs(1), FrameSampler::default(), || {
            Err::<StubExtractor, _>(ExtractError::ModelNotFound("det_10g.onnx".into()))
        });
        assert!(matches!(result, Err(EngineError::Startup(_))));
    }
}
