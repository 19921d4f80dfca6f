//! Scheduler lifecycle events and the broadcast hub.
//!
//! Events are facts about the job lifecycle, serialized exactly as the push
//! channel delivers them (`{"type": "job_update", ...}`). The hub is a
//! single tokio broadcast channel: publishing never blocks, and a subscriber
//! that falls behind loses the oldest messages rather than back-pressuring
//! the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::job::JobStatus;

/// Queue capacity per subscriber before the oldest events are dropped.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A job changed state (created, scheduled, completed, failed, ...).
    JobUpdate {
        job_id: String,
        status: JobStatus,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_run_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        records_collected: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// An execution attempt started.
    ExecutionStarted {
        job_id: String,
        execution_id: i64,
        attempt: i32,
        timestamp: DateTime<Utc>,
    },

    /// An attempt finished, possibly scheduling a retry.
    ExecutionFinished {
        job_id: String,
        execution_id: i64,
        attempt: i32,
        succeeded: bool,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
}

impl SchedulerEvent {
    pub fn job_update(job_id: &str, status: JobStatus) -> Self {
        SchedulerEvent::JobUpdate {
            job_id: job_id.to_string(),
            status,
            timestamp: Utc::now(),
            next_run_at: None,
            records_collected: None,
            error: None,
        }
    }
}

/// Fan-out hub for scheduler events.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Broadcast to all current subscribers; a hub with no subscribers
    /// swallows the event.
    pub fn publish(&self, event: SchedulerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_update_serializes_with_type_tag() {
        let event = SchedulerEvent::job_update("aapl_daily", JobStatus::Active);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_update");
        assert_eq!(json["job_id"], "aapl_daily");
        assert_eq!(json["status"], "active");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn execution_events_serialize_roundtrip() {
        let events = vec![
            SchedulerEvent::ExecutionStarted {
                job_id: "j".to_string(),
                execution_id: 1,
                attempt: 1,
                timestamp: Utc::now(),
            },
            SchedulerEvent::ExecutionFinished {
                job_id: "j".to_string(),
                execution_id: 1,
                attempt: 2,
                succeeded: false,
                will_retry: true,
                timestamp: Utc::now(),
            },
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let _: SchedulerEvent = serde_json::from_str(&json).unwrap();
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let hub = EventHub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        hub.publish(SchedulerEvent::job_update("j1", JobStatus::Active));

        assert!(matches!(
            rx1.recv().await.unwrap(),
            SchedulerEvent::JobUpdate { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            SchedulerEvent::JobUpdate { .. }
        ));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub = EventHub::new();
        hub.publish(SchedulerEvent::job_update("j1", JobStatus::Active));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscribers_drop_oldest_events() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        for i in 0..(EVENT_CAPACITY + 10) {
            hub.publish(SchedulerEvent::job_update(&format!("j{i}"), JobStatus::Active));
        }

        // The receiver lagged; the oldest events are gone but the stream
        // recovers rather than blocking the publisher.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
