use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};

use crate::config::HistoryConfig;
use crate::models::chat::{SessionId, SessionRecord, Turn};
use crate::services::inference::{GenerationOutcome, InferenceEvent, InferenceStreamer};
use crate::services::session::{assemble, SessionError, SessionLocks, SessionStore};
use crate::utils::Metrics;

pub type ChatByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>;

/// Drives one chat turn: locked read, prompt assembly, unlocked generation,
/// locked append.
pub struct ChatService {
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    streamer: InferenceStreamer,
    history: HistoryConfig,
    metrics: Option<Metrics>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        locks: SessionLocks,
        streamer: InferenceStreamer,
        history: HistoryConfig,
    ) -> Self {
        Self {
            store,
            locks,
            streamer,
            history,
            metrics: None,
        }
    }

    /// Report generation counts and durations to `metrics`.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Reject a chat that would create a session beyond the cap.
    ///
    /// Runs outside any lock, so concurrent creations may overshoot slightly.
    pub async fn admit(&self, id: &SessionId) -> Result<(), SessionError> {
        if self.store.exists(id).await? {
            info!("Reusing existing chat history for chat_id: '{}'", id);
            return Ok(());
        }

        let count = self.store.count().await?;
        if count >= self.history.max_sessions {
            warn!(
                "Rejecting new chat_id '{}': {} of {} sessions in use",
                id, count, self.history.max_sessions
            );
            return Err(SessionError::CapacityExceeded {
                max: self.history.max_sessions,
            });
        }

        info!("Creating new chat history for chat_id: '{}'", id);
        Ok(())
    }

    /// Prompt that a chat with `message` would send, without locking,
    /// mutating, or spawning anything.
    pub async fn dry_run(&self, id: &SessionId, message: &str) -> String {
        let record = self.store.load(id).await;
        self.prompt_for(&record, message)
    }

    fn prompt_for(&self, record: &SessionRecord, message: &str) -> String {
        assemble(
            record.system_prompt.as_deref(),
            record.windowed(self.history.context_window),
            message,
        )
    }

    /// Stream the engine's reply to `message`.
    ///
    /// The record is read under the session lock before this returns. The
    /// lock is released while the engine runs and taken again only to append
    /// the finished turn. Dropping the returned stream early kills the engine
    /// and leaves the history untouched. `permit` is held until the stream
    /// ends or is dropped.
    pub async fn stream_chat(
        &self,
        id: SessionId,
        message: String,
        permit: Option<OwnedSemaphorePermit>,
    ) -> ChatByteStream {
        let record = self.locks.with_lock(&id, || self.store.load(&id)).await;
        if let Some(system_prompt) = &record.system_prompt {
            debug!("Using system prompt for chat_id '{}' ({} chars)", id, system_prompt.len());
        }

        let prompt = self.prompt_for(&record, &message);
        let mut inference = self.streamer.run(prompt);

        let store = self.store.clone();
        let locks = self.locks.clone();
        let window = self.history.context_window;
        let metrics = self.metrics.clone();

        Box::pin(async_stream::stream! {
            let _permit = permit;
            let _in_flight = metrics.as_ref().map(Metrics::generation_started);
            let mut guard = AbortGuard::new(id.clone());
            let started = Instant::now();
            let mut outcome = None;

            while let Some(event) = inference.next().await {
                match event {
                    InferenceEvent::Chunk(chunk) => {
                        yield Ok::<_, Infallible>(chunk);
                    }
                    InferenceEvent::Done(done) => {
                        outcome = Some(done);
                        break;
                    }
                }
            }
            guard.finished = true;
            if let (Some(metrics), Some(done)) = (&metrics, &outcome) {
                metrics.observe_generation(done.label(), started.elapsed());
            }

            match outcome {
                Some(GenerationOutcome::Succeeded(reply)) => {
                    debug!("Generation for chat_id '{}' took {:?}", id, started.elapsed());

                    let turn = Turn::new(message, reply);
                    let saved = {
                        let _lock = locks.acquire(&id).await;
                        let mut latest = store.load(&id).await;
                        latest.push_turn(turn, window);
                        store.save(&id, &latest).await
                    };

                    match saved {
                        Ok(()) => info!("History updated for chat_id: '{}'", id),
                        Err(e) => {
                            error!("Failed to save history for chat_id '{}': {}", id, e);
                            yield Ok::<_, Infallible>(Bytes::from(format!(
                                "\n\n[ERROR] Failed to save chat history: {}\n",
                                e
                            )));
                        }
                    }
                }
                Some(GenerationOutcome::Empty) => {
                    warn!(
                        "LLM generated an empty response for chat_id '{}'. History will not be updated.",
                        id
                    );
                }
                Some(GenerationOutcome::Failed(reason)) => {
                    error!("LLM process failed for chat_id '{}': {}", id, reason);
                }
                None => {
                    error!("Generation stream for chat_id '{}' ended without an outcome", id);
                }
            }
        })
    }

    /// Full stored record for `id`.
    pub async fn history(&self, id: &SessionId) -> Result<SessionRecord, SessionError> {
        self.locks
            .with_lock(id, || async {
                if !self.store.exists(id).await? {
                    return Err(SessionError::NotFound(id.clone()));
                }
                Ok(self.store.load(id).await)
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<SessionId>, SessionError> {
        self.store.list().await
    }

    /// Remove the record for `id` while holding its lock.
    pub async fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
        let result = self.locks.with_lock(id, || self.store.delete(id)).await;
        match &result {
            Ok(()) => info!("History deleted for chat_id: '{}'", id),
            Err(SessionError::NotFound(_)) => {
                warn!("Attempted to delete non-existent history for chat_id: '{}'", id)
            }
            Err(e) => error!("Failed to delete history for chat_id '{}': {}", id, e),
        }
        result
    }
}

/// Logs a client disconnect when a chat stream is dropped before the
/// generation finished.
struct AbortGuard {
    id: SessionId,
    finished: bool,
}

impl AbortGuard {
    fn new(id: SessionId) -> Self {
        Self { id, finished: false }
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "Chat stream for chat_id '{}' dropped mid-generation; engine killed, history untouched",
                self.id
            );
        }
    }
}
