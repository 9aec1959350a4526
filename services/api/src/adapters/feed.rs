//! services/api/src/adapters/feed.rs
//!
//! The realtime change feed over Postgres `LISTEN/NOTIFY`. Implements the
//! `RealtimeService` port from the `core` crate.
//!
//! The `messages` insert trigger notifies on a per-dialogue channel with the new
//! row's id. One `PgListener`, on its own connection outside the query pool,
//! serves the whole process: a background task LISTENs to a dialogue's channel
//! while it has subscribers, UNLISTENs once the last one leaves, and fans each
//! notification out over a `broadcast` channel. Subscribers re-read the row by
//! id through the pool.

use async_trait::async_trait;
use socratic_core::ports::{MessageStream, PortError, PortResult, RealtimeService};
use sqlx::postgres::PgListener;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::db::DbAdapter;

/// Notifications a subscriber may fall behind by before it skips rows.
/// Skipped rows show up again on the next load.
const FEED_CAPACITY: usize = 256;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// The notification channel the insert trigger uses for one dialogue.
pub fn channel_name(dialogue_id: Uuid) -> String {
    format!("messages_{}", dialogue_id.simple())
}

enum Command {
    Listen {
        channel: String,
        ack: oneshot::Sender<Result<(), sqlx::Error>>,
    },
    /// A subscriber went away; UNLISTEN if it was the last one.
    Release { channel: String },
}

/// The broadcast sender of every channel that currently has subscribers.
#[derive(Default)]
struct Channels {
    senders: Mutex<HashMap<String, broadcast::Sender<Uuid>>>,
}

impl Channels {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Uuid>>> {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Joins a channel. The flag is true when nobody was on it yet, i.e. the
    /// listener still has to LISTEN.
    fn attach(&self, channel: &str) -> (broadcast::Receiver<Uuid>, bool) {
        let mut senders = self.lock();
        if let Some(sender) = senders.get(channel) {
            return (sender.subscribe(), false);
        }
        let (sender, receiver) = broadcast::channel(FEED_CAPACITY);
        senders.insert(channel.to_string(), sender);
        (receiver, true)
    }

    /// Forgets a channel nobody receives on any more. Returns whether it did.
    fn release(&self, channel: &str) -> bool {
        let mut senders = self.lock();
        match senders.get(channel) {
            Some(sender) if sender.receiver_count() == 0 => {
                senders.remove(channel);
                true
            }
            _ => false,
        }
    }

    fn dispatch(&self, channel: &str, message_id: Uuid) {
        if let Some(sender) = self.lock().get(channel) {
            // An error only means the last subscriber is on its way out.
            let _ = sender.send(message_id);
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// One subscriber's end of a channel. Dropping it asks the listener task to
/// release the channel.
struct FeedReceiver {
    receiver: Option<broadcast::Receiver<Uuid>>,
    channel: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl FeedReceiver {
    async fn next_id(&mut self) -> Option<Uuid> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(message_id) => return Some(message_id),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Feed on {} skipped {} notifications.", self.channel, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for FeedReceiver {
    fn drop(&mut self) {
        // Gone from the receiver count before the listener task looks.
        self.receiver.take();
        let _ = self.commands.send(Command::Release {
            channel: std::mem::take(&mut self.channel),
        });
    }
}

#[derive(Clone)]
pub struct PgMessageFeed {
    db: DbAdapter,
    channels: Arc<Channels>,
    commands: mpsc::UnboundedSender<Command>,
    /// Serializes subscribes so a second subscriber never returns before the
    /// first one's LISTEN is in place.
    subscribing: Arc<tokio::sync::Mutex<()>>,
}

impl PgMessageFeed {
    /// Opens the shared listener connection and starts its task.
    pub async fn connect(db: DbAdapter, database_url: &str) -> Result<Self, sqlx::Error> {
        let listener = PgListener::connect(database_url).await?;
        let channels = Arc::new(Channels::default());
        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_listener(listener, command_rx, channels.clone()));
        info!("Message feed listener connected.");
        Ok(Self {
            db,
            channels,
            commands,
            subscribing: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Number of dialogue channels currently listened to.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl RealtimeService for PgMessageFeed {
    async fn subscribe_message_inserts(&self, dialogue_id: Uuid) -> PortResult<MessageStream> {
        let channel = channel_name(dialogue_id);
        let mut feed = {
            let _serialized = self.subscribing.lock().await;
            let (receiver, needs_listen) = self.channels.attach(&channel);
            let feed = FeedReceiver {
                receiver: Some(receiver),
                channel: channel.clone(),
                commands: self.commands.clone(),
            };
            if needs_listen {
                let (ack, acked) = oneshot::channel();
                self.commands
                    .send(Command::Listen {
                        channel: channel.clone(),
                        ack,
                    })
                    .map_err(|_| PortError::Unexpected("message feed is closed".to_string()))?;
                // On failure `feed` drops here and releases the channel.
                acked
                    .await
                    .map_err(|_| PortError::Unexpected("message feed is closed".to_string()))?
                    .map_err(|e| PortError::Unexpected(e.to_string()))?;
            }
            feed
        };

        let db = self.db.clone();
        let stream = async_stream::stream! {
            while let Some(message_id) = feed.next_id().await {
                match db.get_message_by_id(message_id).await {
                    Ok(message) => yield message,
                    Err(e) => error!("Failed to fetch notified message {}: {:?}", message_id, e),
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Owns the listener connection until every feed handle is gone.
async fn run_listener(
    mut listener: PgListener,
    mut commands: mpsc::UnboundedReceiver<Command>,
    channels: Arc<Channels>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Listen { channel, ack }) => {
                    let listened = listener.listen(&channel).await;
                    match &listened {
                        Ok(()) => info!("Listening on channel {}.", channel),
                        Err(e) => error!("Failed to listen on {}: {:?}", channel, e),
                    }
                    let _ = ack.send(listened);
                }
                Some(Command::Release { channel }) => {
                    if channels.release(&channel) {
                        match listener.unlisten(&channel).await {
                            Ok(()) => info!("Stopped listening on channel {}.", channel),
                            Err(e) => warn!("Failed to unlisten {}: {:?}", channel, e),
                        }
                    }
                }
                None => break,
            },
            notification = listener.recv() => match notification {
                Ok(notification) => match Uuid::parse_str(notification.payload()) {
                    Ok(message_id) => channels.dispatch(notification.channel(), message_id),
                    Err(e) => warn!(
                        "Ignoring malformed payload on {}: {}",
                        notification.channel(),
                        e
                    ),
                },
                Err(e) => {
                    // The listener reconnects and re-LISTENs on the next call.
                    error!("Message feed listener failed: {:?}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            },
        }
    }
    info!("Message feed listener stopped.");
}
