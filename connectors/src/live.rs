//! Live ingestion of Slack events.
//!
//! Events arrive on a bounded channel and flow through the same normalize
//! and upsert path as the backfill crawl, so a message seen live and later
//! re-crawled lands as a single index document.

use std::sync::Arc;

use storage::WatermarkStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use wl_core::{MessageDoc, Provider};

use crate::slack::SlackMessage;

#[derive(Debug, Clone)]
pub struct LiveMessage {
    pub channel_id: String,
    pub channel_type: String,
    pub message: SlackMessage,
}

pub struct LiveIngest {
    tx: mpsc::Sender<LiveMessage>,
    task: JoinHandle<()>,
}

impl LiveIngest {
    pub fn spawn(
        partition: Arc<search::MessagePartition>,
        watermarks: Arc<dyn WatermarkStore>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<LiveMessage>(capacity);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                Self::ingest(&partition, &watermarks, event).await;
            }
        });
        Self { tx, task }
    }

    async fn ingest(
        partition: &search::MessagePartition,
        watermarks: &Arc<dyn WatermarkStore>,
        event: LiveMessage,
    ) {
        let message = &event.message;
        if message.kind != "message" || message.subtype.is_some() {
            debug!(ts = %message.ts, "skipping subtyped live event");
            return;
        }
        let Some(user) = &message.user else {
            debug!(ts = %message.ts, "skipping userless live event");
            return;
        };

        let doc = MessageDoc {
            ts: message.ts.clone(),
            client_msg_id: message.client_msg_id.clone(),
            text: message.text.clone(),
            user_id: user.clone(),
            team_id: message.team.clone(),
            channel_id: event.channel_id.clone(),
            channel_type: event.channel_type.clone(),
            // Permalinks are backfilled by the next crawl; live delivery
            // should not wait on another API round trip.
            permalink: None,
        };

        if let Err(err) = partition.upsert(std::slice::from_ref(&doc)) {
            error!(doc_id = %doc.doc_id(), error = %err, "live upsert failed");
            return;
        }
        if let Err(err) = watermarks
            .record(Provider::Slack, Some(&event.channel_id), &doc.ts, 1)
            .await
        {
            error!(channel = %event.channel_id, error = %err, "live watermark update failed");
        }
    }

    /// Queue an event, waiting if the channel is full. Returns `false` once
    /// the worker has shut down.
    pub async fn submit(&self, event: LiveMessage) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Non-blocking variant for callers that would rather drop an event
    /// than stall the event socket.
    pub fn try_submit(&self, event: LiveMessage) -> bool {
        self.tx.try_send(event).is_ok()
    }

    /// Stop accepting events and drain what is already queued.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryWatermarkStore;

    fn live_msg(ts: &str, text: &str) -> LiveMessage {
        LiveMessage {
            channel_id: "C1".into(),
            channel_type: "channel".into(),
            message: SlackMessage {
                kind: "message".into(),
                subtype: None,
                ts: ts.into(),
                client_msg_id: None,
                text: Some(text.into()),
                user: Some("U1".into()),
                team: Some("T1".into()),
            },
        }
    }

    #[tokio::test]
    async fn live_message_is_searchable_and_advances_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let partition = Arc::new(search::MessagePartition::open(dir.path()).unwrap());
        let watermarks = Arc::new(MemoryWatermarkStore::new());

        let live = LiveIngest::spawn(
            Arc::clone(&partition),
            Arc::clone(&watermarks) as Arc<dyn WatermarkStore>,
            16,
        );
        assert!(live.submit(live_msg("1700000000.000100", "incident declared")).await);
        live.shutdown().await;

        assert_eq!(partition.count("incident").unwrap(), 1);
        let wm = watermarks
            .latest(Provider::Slack, Some("C1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wm.position, "1700000000.000100");
    }

    #[tokio::test]
    async fn subtyped_events_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let partition = Arc::new(search::MessagePartition::open(dir.path()).unwrap());
        let watermarks = Arc::new(MemoryWatermarkStore::new());

        let live = LiveIngest::spawn(
            Arc::clone(&partition),
            Arc::clone(&watermarks) as Arc<dyn WatermarkStore>,
            16,
        );
        let mut event = live_msg("1700000000.000200", "channel renamed");
        event.message.subtype = Some("channel_name".into());
        assert!(live.submit(event).await);
        live.shutdown().await;

        assert_eq!(partition.count("renamed").unwrap(), 0);
        assert!(watermarks
            .latest(Provider::Slack, Some("C1"))
            .await
            .unwrap()
            .is_none());
    }
}
