//! Ephemeral progress channels for long-running operations.
//!
//! A channel is opened per operation and addressed by an opaque token. It is
//! released only on a terminal event ([`ProgressBroker::close`] or
//! [`ProgressBroker::fail`]); there is no timer-based expiry. Nothing here is
//! persisted, so channels do not survive a restart.

use std::sync::Arc;

use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

/// Opaque channel identifier handed to clients.
pub type ProgressToken = Uuid;

/// Buffered events per channel before slow subscribers start lagging.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum ProgressStage {
    #[serde(rename = "Converting Image")]
    #[strum(serialize = "Converting Image")]
    ImageConvert,
    #[serde(rename = "Converting Video")]
    #[strum(serialize = "Converting Video")]
    VideoConvert,
    #[serde(rename = "Watermarking Video")]
    #[strum(serialize = "Watermarking Video")]
    Watermarking,
    #[serde(rename = "Hashing Video")]
    #[strum(serialize = "Hashing Video")]
    HashingVideo,
    #[serde(rename = "Finished")]
    #[strum(serialize = "Finished")]
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    /// 0..=100.
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
        }
    }

    pub fn finished() -> Self {
        Self::new(ProgressStage::Finished, 100)
    }

    pub fn is_terminal(&self) -> bool {
        self.stage == ProgressStage::Finished
    }
}

/// Registry of open progress channels.
#[derive(Debug)]
pub struct ProgressBroker {
    channels: DashMap<ProgressToken, broadcast::Sender<ProgressEvent>>,
    capacity: usize,
}

impl Default for ProgressBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Allocate a new open channel.
    pub fn open(&self) -> ProgressToken {
        let token = Uuid::new_v4();
        let (tx, _) = broadcast::channel(self.capacity);
        self.channels.insert(token, tx);
        debug!(%token, "Opened progress channel");
        token
    }

    pub fn is_open(&self, token: &ProgressToken) -> bool {
        self.channels.contains_key(token)
    }

    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    /// Publish to an open channel; stale or unknown tokens are ignored.
    pub fn publish(&self, token: &ProgressToken, event: ProgressEvent) {
        // The shard guard is held across the send, so a concurrent close
        // cannot slip its terminal event in ahead of this one.
        if let Some(tx) = self.channels.get(token) {
            // No subscribers is fine; the event is simply dropped.
            let _ = tx.send(event);
            trace!(%token, stage = %event.stage, percent = event.percent, "Progress");
        }
    }

    /// Emit `Finished` and release the channel.
    pub fn close(&self, token: &ProgressToken) {
        if let Some((_, tx)) = self.channels.remove(token) {
            let _ = tx.send(ProgressEvent::finished());
            debug!(%token, "Closed progress channel");
        }
    }

    /// Release the channel without a `Finished` event.
    ///
    /// Subscribers see their stream end; the missing `Finished` is how they
    /// tell an error from success.
    pub fn fail(&self, token: &ProgressToken) {
        if self.channels.remove(token).is_some() {
            debug!(%token, "Progress channel closed after failure");
        }
    }

    /// Subscribe to a channel.
    ///
    /// Unknown or already-closed tokens yield an empty, already-finished
    /// subscription rather than an error.
    pub fn subscribe(&self, token: &ProgressToken) -> ProgressSubscription {
        ProgressSubscription {
            rx: self.channels.get(token).map(|tx| tx.subscribe()),
        }
    }
}

/// Live view of one channel.
#[derive(Debug)]
pub struct ProgressSubscription {
    rx: Option<broadcast::Receiver<ProgressEvent>>,
}

impl ProgressSubscription {
    /// Next event, or `None` once the channel has ended.
    ///
    /// A `Finished` event is always the last one yielded.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.is_terminal() {
                        self.rx = None;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Progress subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.rx.is_none()
    }

    /// Adapt into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

/// Cheap handle a pipeline stage uses to report progress.
///
/// Without a token every report is a no-op.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    target: Option<(Arc<ProgressBroker>, ProgressToken)>,
}

impl ProgressReporter {
    pub fn new(broker: Arc<ProgressBroker>, token: Option<ProgressToken>) -> Self {
        Self {
            target: token.map(|t| (broker, t)),
        }
    }

    pub fn noop() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Option<ProgressToken> {
        self.target.as_ref().map(|(_, t)| *t)
    }

    pub fn report(&self, stage: ProgressStage, percent: u8) {
        if let Some((broker, token)) = &self.target {
            broker.publish(token, ProgressEvent::new(stage, percent));
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("token", &self.token())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn events_arrive_in_order_then_finished() {
        let broker = ProgressBroker::new();
        let token = broker.open();
        let mut sub = broker.subscribe(&token);

        broker.publish(&token, ProgressEvent::new(ProgressStage::VideoConvert, 10));
        broker.publish(&token, ProgressEvent::new(ProgressStage::Watermarking, 50));
        broker.close(&token);

        assert_eq!(sub.next().await.unwrap().percent, 10);
        assert_eq!(sub.next().await.unwrap().stage, ProgressStage::Watermarking);
        assert!(sub.next().await.unwrap().is_terminal());
        assert_eq!(sub.next().await, None);
        assert!(!broker.is_open(&token));
    }

    #[tokio::test]
    async fn subscribe_after_close_is_empty() {
        let broker = ProgressBroker::new();
        let token = broker.open();
        broker.close(&token);

        let mut sub = broker.subscribe(&token);
        assert!(sub.is_terminated());
        assert_eq!(sub.next().await, None);

        let events: Vec<_> = broker.subscribe(&Uuid::new_v4()).into_stream().collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn publish_on_stale_token_is_ignored() {
        let broker = ProgressBroker::new();
        let token = broker.open();
        broker.close(&token);
        broker.publish(&token, ProgressEvent::new(ProgressStage::ImageConvert, 5));
        broker.close(&token);
        broker.fail(&token);
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn fail_ends_stream_without_finished() {
        let broker = ProgressBroker::new();
        let token = broker.open();
        let sub = broker.subscribe(&token);

        broker.publish(&token, ProgressEvent::new(ProgressStage::HashingVideo, 30));
        broker.fail(&token);

        let events: Vec<_> = sub.into_stream().collect().await;
        assert_eq!(events, vec![ProgressEvent::new(ProgressStage::HashingVideo, 30)]);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let broker = ProgressBroker::new();
        let token = broker.open();
        for pct in 0..200u8 {
            broker.publish(&token, ProgressEvent::new(ProgressStage::VideoConvert, pct));
        }
        let mut sub = broker.subscribe(&token);
        broker.close(&token);
        assert!(sub.next().await.unwrap().is_terminal());
    }

    #[test]
    fn percent_is_clamped_and_stage_serializes() {
        let event = ProgressEvent::new(ProgressStage::ImageConvert, 250);
        assert_eq!(event.percent, 100);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Converting Image"));
        assert_eq!(ProgressStage::HashingVideo.to_string(), "Hashing Video");
    }

    #[test]
    fn stage_wire_names() {
        let names: Vec<String> = [
            ProgressStage::ImageConvert,
            ProgressStage::VideoConvert,
            ProgressStage::Watermarking,
            ProgressStage::HashingVideo,
            ProgressStage::Finished,
        ]
        .iter()
        .map(|stage| serde_json::to_string(stage).unwrap())
        .collect();
        assert_eq!(
            names,
            [
                "\"Converting Image\"",
                "\"Converting Video\"",
                "\"Watermarking Video\"",
                "\"Hashing Video\"",
                "\"Finished\"",
            ]
        );
        assert_eq!(
            serde_json::from_str::<ProgressStage>("\"Watermarking Video\"").unwrap(),
            ProgressStage::Watermarking
        );
        assert_eq!(ProgressStage::Watermarking.to_string(), "Watermarking Video");
    }

    #[test]
    fn reporter_without_token_is_noop() {
        let reporter = ProgressReporter::noop();
        reporter.report(ProgressStage::Watermarking, 40);
        assert_eq!(reporter.token(), None);
    }

    #[tokio::test]
    async fn reporter_publishes_to_its_channel() {
        let broker = Arc::new(ProgressBroker::new());
        let token = broker.open();
        let mut sub = broker.subscribe(&token);
        let reporter = ProgressReporter::new(broker.clone(), Some(token));

        reporter.report(ProgressStage::ImageConvert, 20);
        assert_eq!(
            sub.next().await,
            Some(ProgressEvent::new(ProgressStage::ImageConvert, 20))
        );
    }
}
