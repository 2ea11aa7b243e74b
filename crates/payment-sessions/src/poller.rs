//! Background status polling.
//!
//! One poller per session key. A poller polls immediately, then once per
//! interval, and ends when the session is terminal, gone, or the manager is
//! dropped. Stopping a poller only takes effect between polls.

use crate::manager::{PollOutcome, SessionManager};
use async_stream::stream;
use session_store::{Namespace, SessionKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

/// Stream of poll outcomes for one session.
///
/// Holds only a weak reference to the manager so a running poller never
/// keeps it alive.
pub fn poll_stream(
    manager: Weak<SessionManager>,
    namespace: Namespace,
    key: SessionKey,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = PollOutcome> {
    stream! {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let Some(manager) = manager.upgrade() else {
                debug!("Session manager dropped, ending poll of {}", key);
                break;
            };

            let Some(session) = manager.active_session(&namespace, &key).await else {
                debug!("No active session for {}, ending poll", key);
                break;
            };

            let outcome = manager.poll_status(&namespace, &session).await;
            drop(manager);

            let done = outcome.is_final();
            yield outcome;
            if done {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
    }
}

static NEXT_POLLER_ID: AtomicU64 = AtomicU64::new(1);

/// A spawned poller.
///
/// When its stream ends the task removes its own entry from the manager.
pub struct PollHandle {
    id: u64,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn spawn(
        manager: Weak<SessionManager>,
        namespace: Namespace,
        key: SessionKey,
        interval: Duration,
    ) -> Self {
        let id = NEXT_POLLER_ID.fetch_add(1, Ordering::Relaxed);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let label = format!("{}/{}", namespace, key);

        let task = tokio::spawn(async move {
            let mut outcomes = Box::pin(poll_stream(
                manager.clone(),
                namespace.clone(),
                key.clone(),
                interval,
                shutdown_rx,
            ));

            while let Some(outcome) = outcomes.next().await {
                match &outcome {
                    PollOutcome::Changed { session, .. } if session.is_terminal() => {
                        info!("Poller {} reached {}", label, session.status)
                    }
                    _ => debug!("Poller {}: {:?}", label, outcome),
                }
            }
            drop(outcomes);

            if let Some(manager) = manager.upgrade() {
                manager.poller_finished(&namespace, &key, id).await;
            }
            debug!("Poller {} finished", label);
        });

        Self { id, shutdown, task }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the poller to stop after any in-flight poll.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
