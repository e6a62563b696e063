//! Run-keyed event fan-out

use agent_exchange_contracts::{StreamEvent, StreamEventType};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

struct RunChannel {
    seq: u64,
    subscribers: HashMap<Uuid, mpsc::Sender<StreamEvent>>,
    closed: bool,
    last_activity: Instant,
}

impl RunChannel {
    fn new() -> Self {
        Self {
            seq: 0,
            subscribers: HashMap::new(),
            closed: false,
            last_activity: Instant::now(),
        }
    }
}

/// One client's view of a run's stream.
pub struct Subscription {
    pub client_id: Uuid,
    pub run_id: Uuid,
    pub receiver: mpsc::Receiver<StreamEvent>,
}

/// Hub gauges.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    pub active_runs: usize,
    pub total_subscribers: usize,
}

/// Central fan-out for stream events.
pub struct StreamHub {
    runs: RwLock<HashMap<Uuid, RunChannel>>,
    subscriber_buffer: usize,
}

impl StreamHub {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            subscriber_buffer: subscriber_buffer.max(1),
        }
    }

    /// Subscribe a client to a run. The entry is created if the run has
    /// not published yet, so subscribers attached before the first event
    /// observe the whole stream.
    pub async fn subscribe(&self, run_id: Uuid, client_id: Uuid) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.subscriber_buffer);
        let mut runs = self.runs.write().await;
        let channel = runs.entry(run_id).or_insert_with(RunChannel::new);
        channel.subscribers.insert(client_id, sender);
        debug!(
            "Client {} subscribed to run {} ({} subscriber(s))",
            client_id,
            run_id,
            channel.subscribers.len()
        );
        Subscription {
            client_id,
            run_id,
            receiver,
        }
    }

    /// Detach a client. The run entry is collected once it is closed and
    /// nobody is left listening.
    pub async fn unsubscribe(&self, run_id: Uuid, client_id: Uuid) {
        let mut runs = self.runs.write().await;
        if let Some(channel) = runs.get_mut(&run_id) {
            channel.subscribers.remove(&client_id);
            if channel.subscribers.is_empty() && channel.closed {
                runs.remove(&run_id);
            }
        }
    }

    /// Publish an event to every subscriber of the run.
    ///
    /// The sequence number is assigned here, under the run entry, so
    /// ordering is identical for all subscribers. Delivery uses
    /// `try_send`: a subscriber whose buffer is full is dropped. A
    /// terminal event closes the run.
    pub async fn publish(&self, run_id: Uuid, mut event: StreamEvent) -> u64 {
        let mut runs = self.runs.write().await;
        let channel = runs.entry(run_id).or_insert_with(RunChannel::new);
        if channel.closed {
            debug!("Dropping event for closed run {}", run_id);
            return channel.seq;
        }

        channel.seq += 1;
        event.seq = channel.seq;
        channel.last_activity = Instant::now();

        let mut dropped = Vec::new();
        for (client_id, sender) in &channel.subscribers {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Subscriber {} too slow on run {}; disconnecting",
                        client_id, run_id
                    );
                    dropped.push(*client_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(*client_id);
                }
            }
        }
        for client_id in dropped {
            channel.subscribers.remove(&client_id);
        }

        let seq = channel.seq;
        if event.event_type.is_terminal() {
            channel.closed = true;
            // Dropping the senders ends every receiver's stream.
            channel.subscribers.clear();
            runs.remove(&run_id);
            debug!("Run {} closed at seq {}", run_id, seq);
        }
        seq
    }

    /// Convenience publisher that stamps the run id as the request id.
    pub async fn publish_event(
        &self,
        run_id: Uuid,
        event_type: StreamEventType,
        data: serde_json::Value,
    ) -> u64 {
        self.publish(run_id, StreamEvent::new(event_type, data, run_id))
            .await
    }

    /// Remove runs with no activity for longer than `idle`. Returns the
    /// reaped run ids. Subscribers of a reaped run see their stream end.
    pub async fn reap_idle(&self, idle: Duration) -> Vec<Uuid> {
        let mut runs = self.runs.write().await;
        let now = Instant::now();
        let stale: Vec<Uuid> = runs
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_activity) >= idle)
            .map(|(id, _)| *id)
            .collect();
        for run_id in &stale {
            runs.remove(run_id);
            debug!("Reaped idle run {}", run_id);
        }
        stale
    }

    pub async fn subscriber_count(&self, run_id: Uuid) -> usize {
        self.runs
            .read()
            .await
            .get(&run_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> HubStats {
        let runs = self.runs.read().await;
        HubStats {
            active_runs: runs.len(),
            total_subscribers: runs.values().map(|c| c.subscribers.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn two_subscribers_see_identical_ordered_events() {
        let hub = StreamHub::new(16);
        let run = Uuid::new_v4();
        let mut first = hub.subscribe(run, Uuid::new_v4()).await;
        let mut second = hub.subscribe(run, Uuid::new_v4()).await;

        hub.publish(run, StreamEvent::start(run)).await;
        hub.publish(run, StreamEvent::token(run, "a")).await;
        hub.publish(run, StreamEvent::token(run, "b")).await;
        hub.publish(run, StreamEvent::done(run, None)).await;

        for subscription in [&mut first, &mut second] {
            let mut seqs = Vec::new();
            let mut types = Vec::new();
            while let Some(event) = subscription.receiver.recv().await {
                seqs.push(event.seq);
                types.push(event.event_type);
            }
            assert_eq!(seqs, vec![1, 2, 3, 4]);
            assert_eq!(
                types,
                vec![
                    StreamEventType::Start,
                    StreamEventType::Token,
                    StreamEventType::Token,
                    StreamEventType::Done
                ]
            );
        }
    }

    #[tokio::test]
    async fn done_event_closes_the_run() {
        let hub = StreamHub::new(16);
        let run = Uuid::new_v4();
        let mut subscription = hub.subscribe(run, Uuid::new_v4()).await;

        hub.publish(run, StreamEvent::done(run, None)).await;
        // Receiver drains the done event then ends.
        assert!(subscription.receiver.recv().await.is_some());
        assert!(subscription.receiver.recv().await.is_none());

        assert_eq!(hub.stats().await.active_runs, 0);
        // A publish after collection starts a fresh entry with a fresh
        // sequence; close it again.
        let seq = hub.publish(run, StreamEvent::token(run, "late")).await;
        assert_eq!(seq, 1);
        hub.publish(run, StreamEvent::done(run, None)).await;
        assert_eq!(hub.stats().await.active_runs, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_not_blocking() {
        let hub = StreamHub::new(2);
        let run = Uuid::new_v4();
        let slow = Uuid::new_v4();
        let _subscription = hub.subscribe(run, slow).await;

        // Publisher never blocks even with a full buffer.
        for i in 0..5 {
            hub.publish(run, StreamEvent::token(run, format!("t{}", i)))
                .await;
        }
        assert_eq!(hub.subscriber_count(run).await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_collects_closed_runs() {
        let hub = StreamHub::new(4);
        let run = Uuid::new_v4();
        let client = Uuid::new_v4();
        let _subscription = hub.subscribe(run, client).await;

        assert_eq!(hub.stats().await.active_runs, 1);
        hub.unsubscribe(run, client).await;
        // Run not closed yet: entry is kept for the active publisher.
        assert_eq!(hub.stats().await.active_runs, 1);

        hub.publish(run, StreamEvent::done(run, None)).await;
        assert_eq!(hub.stats().await.active_runs, 0);
    }

    #[tokio::test]
    async fn reap_idle_removes_stale_runs() {
        let hub = StreamHub::new(4);
        let run = Uuid::new_v4();
        hub.publish(run, StreamEvent::start(run)).await;

        assert!(hub.reap_idle(Duration::from_secs(3600)).await.is_empty());
        let reaped = hub.reap_idle(Duration::from_millis(0)).await;
        assert_eq!(reaped, vec![run]);
        assert_eq!(hub.stats().await.active_runs, 0);
    }

    #[tokio::test]
    async fn late_subscriber_sees_later_seqs_only() {
        let hub = StreamHub::new(16);
        let run = Uuid::new_v4();
        hub.publish(run, StreamEvent::start(run)).await;

        let mut late = hub.subscribe(run, Uuid::new_v4()).await;
        hub.publish(run, StreamEvent::token(run, "x")).await;
        let event = late.receiver.recv().await.unwrap();
        assert_eq!(event.seq, 2);
    }
}
