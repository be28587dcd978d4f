//! Bounded session cache with single-flight creation.
//!
//! One mutex guards the LRU map and the table of in-flight creations; every
//! operation takes it once and never across an await. Creating a session
//! publishes a `watch` channel for its id under the lock, fetches the
//! baseline with the lock released, then inserts the session and
//! broadcasts the outcome. Requests for an id that is already being
//! created wait on that channel instead of fetching again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::Error;
use crate::lru::LruMap;
use crate::session::Session;
use crate::store::EnrollmentStore;
use crate::types::Embedding;

pub const DEFAULT_CAPACITY: usize = 1024;

/// `None` until the creating request finishes.
type Outcome = Option<Result<Arc<Session>, Error>>;

struct InFlight {
    user_id: String,
    rx: watch::Receiver<Outcome>,
}

struct State {
    sessions: LruMap<String, Arc<Session>>,
    in_flight: HashMap<String, InFlight>,
}

enum Step {
    Ready(Arc<Session>),
    Wait(watch::Receiver<Outcome>),
    Create(watch::Sender<Outcome>),
}

/// Live sessions keyed by session id.
///
/// Inserting past capacity silently drops the least recently used session.
pub struct SessionCache {
    state: Mutex<State>,
    store: Arc<dyn EnrollmentStore>,
}

impl SessionCache {
    pub fn new(capacity: usize, store: Arc<dyn EnrollmentStore>) -> Self {
        Self {
            state: Mutex::new(State {
                sessions: LruMap::new(capacity),
                in_flight: HashMap::new(),
            }),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().sessions.capacity()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// Look up a live session and mark it most recently used.
    pub fn get(&self, session_id: &str) -> Result<Arc<Session>, Error> {
        self.lock()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub fn remove(&self, session_id: &str) -> Result<(), Error> {
        match self.lock().sessions.remove(session_id) {
            Some(_) => {
                tracing::debug!(session_id, "session deleted");
                Ok(())
            }
            None => Err(Error::SessionNotFound(session_id.to_string())),
        }
    }

    /// Return the session for `session_id`, creating it for `user_id` on first use.
    ///
    /// An existing session owned by another user fails with
    /// [`Error::UserMismatch`] and is left untouched. Concurrent first calls
    /// for the same id share one baseline fetch and one `Session`.
    pub async fn get_or_create(&self, session_id: &str, user_id: &str) -> Result<Arc<Session>, Error> {
        loop {
            let step = {
                let mut state = self.lock();
                // Peek first: a rejected request must not refresh another user's session.
                if let Some(session) = state.sessions.peek(session_id) {
                    if session.user_id() != user_id {
                        return Err(mismatch(session_id, session.user_id(), user_id));
                    }
                    let session = Arc::clone(session);
                    state.sessions.touch(session_id);
                    Step::Ready(session)
                } else if let Some(flight) = state.in_flight.get(session_id) {
                    if flight.user_id != user_id {
                        return Err(mismatch(session_id, &flight.user_id, user_id));
                    }
                    Step::Wait(flight.rx.clone())
                } else {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight.insert(
                        session_id.to_string(),
                        InFlight {
                            user_id: user_id.to_string(),
                            rx,
                        },
                    );
                    Step::Create(tx)
                }
            };

            match step {
                Step::Ready(session) => return Ok(session),
                Step::Create(tx) => return self.create(session_id, user_id, tx).await,
                Step::Wait(mut rx) => {
                    let outcome = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|r| (*r).clone());
                    match outcome {
                        Some(result) => return result.and_then(|s| check_owner(s, user_id)),
                        // Creator was cancelled before finishing; its marker is gone.
                        None => tracing::debug!(session_id, "in-flight session creation abandoned, retrying"),
                    }
                }
            }
        }
    }

    async fn create(
        &self,
        session_id: &str,
        user_id: &str,
        tx: watch::Sender<Outcome>,
    ) -> Result<Arc<Session>, Error> {
        let guard = InFlightGuard {
            cache: self,
            session_id,
            armed: true,
        };

        let result = self
            .fetch_baseline(user_id)
            .await
            .and_then(|baseline| Session::new(session_id, user_id, baseline))
            .map(Arc::new);

        {
            let mut state = self.lock();
            state.in_flight.remove(session_id);
            if let Ok(session) = &result {
                if let Some((evicted, _)) = state
                    .sessions
                    .put(session_id.to_string(), Arc::clone(session))
                {
                    tracing::debug!(evicted = %evicted, "cache full, least recently used session evicted");
                }
            }
        }
        guard.disarm();

        match &result {
            Ok(_) => tracing::info!(session_id, user_id, "session created"),
            Err(e) => tracing::warn!(session_id, user_id, error = %e, "session creation failed"),
        }

        tx.send_replace(Some(result.clone()));
        result
    }

    async fn fetch_baseline(&self, user_id: &str) -> Result<Embedding, Error> {
        let store = Arc::clone(&self.store);
        let uid = user_id.to_string();
        let baseline = tokio::task::spawn_blocking(move || store.get(&uid))
            .await
            .map_err(|e| Error::StoreUnavailable(format!("baseline fetch task failed: {e}")))??;
        baseline.ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }
}

/// Clears the in-flight marker if the creating future is dropped mid-fetch.
struct InFlightGuard<'a> {
    cache: &'a SessionCache,
    session_id: &'a str,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.lock().in_flight.remove(self.session_id);
        }
    }
}

fn mismatch(session_id: &str, owner: &str, requested: &str) -> Error {
    Error::UserMismatch {
        session_id: session_id.to_string(),
        owner: owner.to_string(),
        requested: requested.to_string(),
    }
}

fn check_owner(session: Arc<Session>, user_id: &str) -> Result<Arc<Session>, Error> {
    if session.user_id() == user_id {
        Ok(session)
    } else {
        Err(mismatch(session.id(), session.user_id(), user_id))
    }
}
