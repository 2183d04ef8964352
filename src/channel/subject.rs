//! Per-channel broadcast subjects.

use async_stream::stream;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::types::ChannelEvent;
use crate::Result;
use crate::ws::{ChannelStatus, WsError};

/// Broadcast channel capacity per subject.
pub(crate) const SUBJECT_CAPACITY: usize = 1024;

struct ChannelSubject<M> {
    sender: broadcast::Sender<ChannelEvent<M>>,
    created_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
    message_count: u64,
}

impl<M: Clone> ChannelSubject<M> {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBJECT_CAPACITY);
        Self {
            sender,
            created_at: Utc::now(),
            last_message_at: None,
            message_count: 0,
        }
    }
}

/// Subjects by channel id, created lazily on first publish or subscribe.
///
/// Publishing never waits for consumers. A consumer that falls more than
/// [`SUBJECT_CAPACITY`] messages behind loses the oldest ones and is told how many.
pub(crate) struct ChannelRegistry<M> {
    subjects: DashMap<String, ChannelSubject<M>>,
}

impl<M> Default for ChannelRegistry<M> {
    fn default() -> Self {
        Self {
            subjects: DashMap::new(),
        }
    }
}

impl<M: Clone + Send + 'static> ChannelRegistry<M> {
    /// Stream of messages on `channel`, creating the subject if needed.
    pub(crate) fn subject(&self, channel: &str) -> impl Stream<Item = Result<M>> + use<M> {
        let receiver = match self.subjects.get(channel) {
            Some(subject) => subject.sender.subscribe(),
            None => self
                .subjects
                .entry(channel.to_owned())
                .or_insert_with(ChannelSubject::new)
                .sender
                .subscribe(),
        };
        subject_stream(channel.to_owned(), receiver)
    }

    /// Stream of messages on `channel`, only if the subject already exists.
    pub(crate) fn observable(&self, channel: &str) -> Option<impl Stream<Item = Result<M>> + use<M>> {
        let receiver = self.subjects.get(channel)?.sender.subscribe();
        Some(subject_stream(channel.to_owned(), receiver))
    }

    /// Deliver `message` to every consumer of `channel`. Returns how many consumers got it.
    pub(crate) fn publish(&self, channel: &str, message: M) -> usize {
        let mut subject = match self.subjects.get_mut(channel) {
            Some(subject) => subject,
            None => self
                .subjects
                .entry(channel.to_owned())
                .or_insert_with(ChannelSubject::new),
        };

        subject.message_count += 1;
        subject.last_message_at = Some(Utc::now());
        // No receivers is not an error: the subject exists for late subscribers.
        subject.sender.send(ChannelEvent::Data(message)).unwrap_or(0)
    }

    /// Terminate `channel` and forget it. Consumers see the end of their stream, or one
    /// error first when `error` is given.
    pub(crate) fn close(&self, channel: &str, error: Option<&str>) -> bool {
        let Some((_, subject)) = self.subjects.remove(channel) else {
            return false;
        };
        terminate(channel, &subject, error);
        true
    }

    pub(crate) fn close_all(&self, error: Option<&str>) {
        let channels: Vec<String> = self
            .subjects
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for channel in channels {
            self.close(&channel, error);
        }
    }

    /// Status of every subject, sorted by channel.
    pub(crate) fn status(&self) -> Vec<ChannelStatus> {
        let mut channels: Vec<ChannelStatus> = self
            .subjects
            .iter()
            .map(|entry| ChannelStatus {
                channel: entry.key().clone(),
                created_at: entry.created_at,
                last_message_at: entry.last_message_at,
                message_count: entry.message_count,
                receivers: entry.sender.receiver_count(),
            })
            .collect();
        channels.sort_by(|a, b| a.channel.cmp(&b.channel));
        channels
    }
}

fn terminate<M>(channel: &str, subject: &ChannelSubject<M>, error: Option<&str>) {
    let event = match error {
        Some(reason) => ChannelEvent::Errored(reason.to_owned()),
        None => ChannelEvent::Closed,
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(channel, ?error, "Closing channel subject");
    #[cfg(not(feature = "tracing"))]
    let _ = &channel;

    // Consumers that already left don't need the terminal event.
    drop(subject.sender.send(event));
}

/// Turn a subject receiver into a consumer stream.
fn subject_stream<M: Clone + Send + 'static>(
    channel: String,
    mut receiver: broadcast::Receiver<ChannelEvent<M>>,
) -> impl Stream<Item = Result<M>> {
    stream! {
        loop {
            match receiver.recv().await {
                Ok(ChannelEvent::Data(message)) => yield Ok(message),
                Ok(ChannelEvent::Closed) | Err(RecvError::Closed) => break,
                Ok(ChannelEvent::Errored(reason)) => {
                    yield Err(WsError::ChannelErrored(reason).into());
                    break;
                }
                Err(RecvError::Lagged(count)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%channel, count, "Channel consumer lagged, missed messages");
                    yield Err(WsError::Lagged { count }.into());
                }
            }
        }
        #[cfg(not(feature = "tracing"))]
        let _ = &channel;
    }
}
