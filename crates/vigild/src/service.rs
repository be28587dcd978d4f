use std::sync::Arc;

use serde::Serialize;
use vigil_core::{
    frame_distance, AggregateResult, Embedding, EnrollmentStore, Error, Neighbor, SessionCache, StoreError,
};

use crate::engine::{EngineError, WorkerHandle};

/// Snapshot returned by `Status()`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub version: &'static str,
    pub sessions: usize,
    pub capacity: usize,
    pub workers: usize,
    pub enrolled: usize,
}

/// Request-level operations shared by every transport handler.
///
/// Extraction goes to the worker pool, store access to blocking threads,
/// and session bookkeeping to the cache. Nothing here holds a lock across
/// an await.
pub struct VerificationService {
    cache: SessionCache,
    store: Arc<dyn EnrollmentStore>,
    workers: WorkerHandle,
}

impl VerificationService {
    pub fn new(cache: SessionCache, store: Arc<dyn EnrollmentStore>, workers: WorkerHandle) -> Self {
        Self { cache, store, workers }
    }

    /// Record one frame for a session, creating the session on first use.
    ///
    /// Returns the frame's distance, or `None` when no face was visible and
    /// nothing was recorded.
    pub async fn submit_frame(
        &self,
        session_id: &str,
        user_id: &str,
        timestamp: i64,
        image: Vec<u8>,
    ) -> Result<Option<f64>, EngineError> {
        let session = self.cache.get_or_create(session_id, user_id).await?;
        let faces = self.workers.extract(image).await?;

        let distance = frame_distance(session.baseline(), &faces)?;
        match distance {
            Some(d) => {
                session.record(timestamp, d);
                tracing::debug!(session_id, timestamp, distance = d, faces = faces.len(), "frame recorded");
            }
            None => tracing::debug!(session_id, timestamp, "no face in frame, skipped"),
        }
        Ok(distance)
    }

    pub fn session_result(&self, session_id: &str) -> Result<AggregateResult, EngineError> {
        Ok(self.cache.get(session_id)?.result()?)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.cache.remove(session_id)?;
        tracing::info!(session_id, "session deleted");
        Ok(())
    }

    /// Enroll the single face in `image` as `user_id`'s baseline.
    pub async fn enroll(&self, user_id: &str, image: Vec<u8>) -> Result<(), EngineError> {
        let embedding = self.single_face(image).await?;
        embedding.validate()?;

        let user = user_id.to_string();
        self.with_store(move |store| store.put(&user, &embedding)).await?;
        tracing::info!(user_id, "user enrolled");
        Ok(())
    }

    pub async fn baseline(&self, user_id: &str) -> Result<Embedding, EngineError> {
        let user = user_id.to_string();
        self.with_store(move |store| store.get(&user))
            .await?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()).into())
    }

    pub async fn delete_enrollment(&self, user_id: &str) -> Result<(), EngineError> {
        let user = user_id.to_string();
        if !self.with_store(move |store| store.delete(&user)).await? {
            return Err(Error::UserNotFound(user_id.to_string()).into());
        }
        tracing::info!(user_id, "enrollment deleted");
        Ok(())
    }

    /// Nearest enrolled users to the single face in `image`.
    pub async fn search_by_image(&self, image: Vec<u8>, n: usize) -> Result<Vec<Neighbor>, EngineError> {
        let probe = self.single_face(image).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        self.with_store(move |store| store.query_nearest(&probe, n)).await
    }

    /// Scaled distance between `user_id`'s baseline and the closest face in `image`.
    pub async fn image_distance(&self, user_id: &str, image: Vec<u8>) -> Result<f64, EngineError> {
        let baseline = self.baseline(user_id).await?;
        let faces = self.workers.extract(image).await?;
        frame_distance(&baseline, &faces)?.ok_or_else(|| Error::NoFaceDetected.into())
    }

    /// Sample a sequence of frames against `user_id`'s baseline.
    pub async fn video_distance(&self, user_id: &str, frames: Vec<Vec<u8>>) -> Result<AggregateResult, EngineError> {
        let baseline = self.baseline(user_id).await?;
        let total = frames.len();
        let result = self
            .workers
            .compare_video(user_id.to_string(), baseline, frames)
            .await?;
        tracing::info!(user_id, frames = total, pct_present = result.pct_present, "video compared");
        Ok(result)
    }

    pub async fn status(&self) -> Result<Status, EngineError> {
        let enrolled = self.with_store(|store| store.count()).await?;
        Ok(Status {
            version: env!("CARGO_PKG_VERSION"),
            sessions: self.cache.len(),
            capacity: self.cache.capacity(),
            workers: self.workers.workers(),
            enrolled,
        })
    }

    async fn single_face(&self, image: Vec<u8>) -> Result<Embedding, EngineError> {
        let mut faces = self.workers.extract(image).await?;
        match faces.len() {
            0 => Err(Error::NoFaceDetected.into()),
            1 => Ok(faces.remove(0)),
            n => Err(Error::MultipleFacesDetected(n).into()),
        }
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn EnrollmentStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| Error::StoreUnavailable(format!("store task failed: {e}")))?;
        Ok(result.map_err(Error::from)?)
    }
}
