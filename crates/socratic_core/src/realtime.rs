//! crates/socratic_core/src/realtime.rs
//!
//! A cancellable handle over a dialogue's live message feed.
//!
//! Opening a `Subscription` registers the filtered listener with the backend
//! before returning, then spawns a task that hands every delivered row to a
//! callback. Cancelling (explicitly or by dropping the handle) stops the task
//! and drops the stream, which releases the backend listener.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::Message;
use crate::ports::{PortResult, RealtimeService};

pub struct Subscription {
    dialogue_id: Uuid,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Subscribes to inserts for `dialogue_id` and feeds each row to `on_insert`.
    ///
    /// Returns once the backend listener is registered, so any insert made
    /// after this call resolves is delivered.
    pub async fn open<F>(
        realtime: &dyn RealtimeService,
        dialogue_id: Uuid,
        mut on_insert: F,
    ) -> PortResult<Self>
    where
        F: FnMut(Message) + Send + 'static,
    {
        let mut stream = realtime.subscribe_message_inserts(dialogue_id).await?;
        let token = CancellationToken::new();
        let child = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    next = stream.next() => match next {
                        Some(message) => {
                            if child.is_cancelled() {
                                break;
                            }
                            on_insert(message);
                        }
                        None => {
                            debug!("Message feed for dialogue {} ended.", dialogue_id);
                            break;
                        }
                    },
                }
            }
        });

        info!("Subscribed to message inserts for dialogue {}.", dialogue_id);
        Ok(Self {
            dialogue_id,
            token,
            task: Some(task),
        })
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stops delivery without waiting for an in-progress callback.
    pub fn cancel(&mut self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!("Unsubscribed from message inserts for dialogue {}.", self.dialogue_id);
    }

    /// Cancels and waits for the delivery task to wind down.
    pub async fn unsubscribe(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        info!("Unsubscribed from message inserts for dialogue {}.", self.dialogue_id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
