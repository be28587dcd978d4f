//! vigil-core: Continuous identity verification engine.
//!
//! Compares per-frame face embeddings against a user's enrolled baseline,
//! accumulates the distances per session in a bounded LRU cache, and
//! reports presence statistics on demand.

pub mod aggregate;
pub mod cache;
pub mod compare;
pub mod error;
pub mod extract;
pub mod lru;
pub mod sampler;
pub mod session;
pub mod store;
pub mod types;

pub use aggregate::{Aggregator, Stats, PRESENCE_THRESHOLD};
pub use cache::{SessionCache, DEFAULT_CAPACITY};
pub use compare::{frame_distance, DISTANCE_SCALE};
pub use error::Error;
pub use extract::{decode_image, EmbeddingExtractor, ExtractError};
pub use sampler::{FrameSampler, DEFAULT_STRIDE};
pub use session::Session;
pub use store::{EnrollmentStore, SqliteStore, StoreError};
pub use types::{AggregateResult, BoundingBox, Embedding, Neighbor};
