use vigil_core::Error;
use zbus::interface;

use crate::engine::EngineError;
use crate::service::VerificationService;

pub const BUS_NAME: &str = "org.freedesktop.Vigil1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Vigil1";

/// Errors returned to D-Bus callers as `org.freedesktop.Vigil1.Error.*`.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.freedesktop.Vigil1.Error")]
pub enum VigilError {
    #[zbus(error)]
    ZBus(zbus::Error),
    SessionNotFound(String),
    UserNotFound(String),
    UserMismatch(String),
    NoFaceDetected(String),
    MultipleFacesDetected(String),
    EmptyAggregate(String),
    InvalidEmbedding(String),
    ExtractionFailure(String),
    StoreUnavailable(String),
    Timeout(String),
    Internal(String),
}

impl From<EngineError> for VigilError {
    fn from(e: EngineError) -> Self {
        let msg = e.to_string();
        match e {
            EngineError::Verify(err) => match err {
                Error::SessionNotFound(_) => Self::SessionNotFound(msg),
                Error::UserNotFound(_) => Self::UserNotFound(msg),
                Error::UserMismatch { .. } => Self::UserMismatch(msg),
                Error::NoFaceDetected => Self::NoFaceDetected(msg),
                Error::MultipleFacesDetected(_) => Self::MultipleFacesDetected(msg),
                Error::EmptyAggregate => Self::EmptyAggregate(msg),
                Error::InvalidEmbedding(_) => Self::InvalidEmbedding(msg),
                Error::ExtractionFailure(_) => Self::ExtractionFailure(msg),
                Error::StoreUnavailable(_) => {
                    tracing::error!(error = %msg, "enrollment store unavailable");
                    Self::StoreUnavailable(msg)
                }
            },
            EngineError::Timeout(_) => Self::Timeout(msg),
            EngineError::ChannelClosed | EngineError::Startup(_) => {
                tracing::error!(error = %msg, "engine failure");
                Self::Internal(msg)
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, VigilError> {
    serde_json::to_string(value).map_err(|e| VigilError::Internal(format!("serialization failed: {e}")))
}

/// D-Bus interface for the Vigil verification daemon.
///
/// Bus name: org.freedesktop.Vigil1
/// Object path: /org/freedesktop/Vigil1
pub struct VigilService {
    service: VerificationService,
}

impl VigilService {
    pub fn new(service: VerificationService) -> Self {
        Self { service }
    }
}

#[interface(name = "org.freedesktop.Vigil1")]
impl VigilService {
    /// Submit one captured frame. Returns false when no face was visible.
    async fn submit_frame(
        &self,
        session_id: &str,
        user_id: &str,
        timestamp: i64,
        image: Vec<u8>,
    ) -> Result<bool, VigilError> {
        let distance = self
            .service
            .submit_frame(session_id, user_id, timestamp, image)
            .await?;
        Ok(distance.is_some())
    }

    /// Presence statistics for a live session, as JSON.
    async fn get_session_result(&self, session_id: &str) -> Result<String, VigilError> {
        to_json(&self.service.session_result(session_id)?)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), VigilError> {
        Ok(self.service.delete_session(session_id)?)
    }

    /// Enroll the single face in `image` as the user's baseline.
    async fn enroll(&self, user_id: &str, image: Vec<u8>) -> Result<(), VigilError> {
        tracing::info!(user_id, bytes = image.len(), "enroll requested");
        Ok(self.service.enroll(user_id, image).await?)
    }

    async fn get_baseline(&self, user_id: &str) -> Result<Vec<f64>, VigilError> {
        let baseline = self.service.baseline(user_id).await?;
        Ok(baseline.values.iter().map(|&v| f64::from(v)).collect())
    }

    async fn delete_enrollment(&self, user_id: &str) -> Result<(), VigilError> {
        Ok(self.service.delete_enrollment(user_id).await?)
    }

    /// Nearest enrolled users to the face in `image`, as a JSON array.
    async fn search_by_image(&self, image: Vec<u8>, n: u32) -> Result<String, VigilError> {
        let hits = self.service.search_by_image(image, n as usize).await?;
        to_json(&hits)
    }

    async fn image_distance(&self, user_id: &str, image: Vec<u8>) -> Result<f64, VigilError> {
        Ok(self.service.image_distance(user_id, image).await?)
    }

    /// Compare sampled frames against the user's baseline, as JSON.
    async fn video_distance(&self, user_id: &str, frames: Vec<Vec<u8>>) -> Result<String, VigilError> {
        tracing::info!(user_id, frames = frames.len(), "video comparison requested");
        to_json(&self.service.video_distance(user_id, frames).await?)
    }

    /// Return daemon status information.
    async fn status(&self) -> Result<String, VigilError> {
        to_json(&self.service.status().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_names_follow_taxonomy() {
        let e: VigilError = EngineError::Verify(Error::MultipleFacesDetected(2)).into();
        assert!(matches!(e, VigilError::MultipleFacesDetected(ref m) if m.contains('2')));

        let e: VigilError = EngineError::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(e, VigilError::Timeout(_)));

        let e: VigilError = EngineError::ChannelClosed.into();
        assert!(matches!(e, VigilError::Internal(_)));
    }

    #[test]
    fn test_mismatch_message_names_owner() {
        let e: VigilError = EngineError::Verify(Error::UserMismatch {
            session_id: "s1".into(),
            owner: "alice".into(),
            requested: "bob".into(),
        })
        .into();
        match e {
            VigilError::UserMismatch(msg) => assert!(msg.contains("alice") && msg.contains("bob")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
