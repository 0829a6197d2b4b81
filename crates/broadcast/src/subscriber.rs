//! Per-session SSE subscriber: a bounded outbound queue with the
//! coalescing rule for pane updates. Visibility is idempotent, so when the
//! queue is full the oldest pending update for the same story fragment is
//! dropped in favor of the newer verdict.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use axum::response::sse::Event;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tractstack_core::{TractError, TractResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseMessage {
    PaneUpdate {
        storyfragment_id: String,
        affected_pane_ids: Vec<String>,
        scroll_target: Option<String>,
    },
}

impl SseMessage {
    pub fn storyfragment_id(&self) -> &str {
        match self {
            SseMessage::PaneUpdate {
                storyfragment_id, ..
            } => storyfragment_id,
        }
    }

    /// The JSON body sent on the wire.
    pub fn payload_json(&self) -> String {
        match self {
            SseMessage::PaneUpdate {
                storyfragment_id,
                affected_pane_ids,
                scroll_target,
            } => {
                #[derive(Serialize)]
                #[serde(rename_all = "camelCase")]
                struct Payload<'a> {
                    storyfragment_id: &'a str,
                    affected_pane_ids: &'a [String],
                    #[serde(skip_serializing_if = "Option::is_none")]
                    scroll_target: Option<&'a str>,
                }
                serde_json::to_string(&Payload {
                    storyfragment_id,
                    affected_pane_ids,
                    scroll_target: scroll_target.as_deref(),
                })
                .unwrap_or_else(|_| "{}".to_string())
            }
        }
    }

    pub fn to_event(&self) -> Event {
        Event::default().event("paneUpdate").data(self.payload_json())
    }
}

pub struct Subscriber {
    pub tenant_id: String,
    pub session_id: String,
    queue: Mutex<VecDeque<SseMessage>>,
    notify: Notify,
    closed: AtomicBool,
    /// Story fragments this session reported viewing.
    viewing: Mutex<BTreeSet<String>>,
}

impl Subscriber {
    pub fn new(tenant_id: String, session_id: String) -> Self {
        Self {
            tenant_id,
            session_id,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            viewing: Mutex::new(BTreeSet::new()),
        }
    }

    /// Enqueue a message, applying the coalescing rule at `cap` and the
    /// lagging drop at `hard_cap`.
    pub fn enqueue(&self, message: SseMessage, cap: usize, hard_cap: usize) -> TractResult<()> {
        if self.is_closed() {
            return Err(TractError::SubscriberLagging(self.session_id.clone()));
        }

        let mut queue = self.queue.lock();
        if queue.len() >= cap {
            if let Some(stale) = queue
                .iter()
                .position(|m| m.storyfragment_id() == message.storyfragment_id())
            {
                queue.remove(stale);
                metrics::counter!("sse_coalesced").increment(1);
            }
        }
        queue.push_back(message);

        if queue.len() > hard_cap {
            drop(queue);
            self.close();
            metrics::counter!("sse_lagging_dropped").increment(1);
            return Err(TractError::SubscriberLagging(self.session_id.clone()));
        }

        drop(queue);
        self.notify.notify_one();
        Ok(())
    }

    pub fn drain(&self) -> Vec<SseMessage> {
        self.queue.lock().drain(..).collect()
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn mark_viewing(&self, storyfragment_id: &str) {
        self.viewing.lock().insert(storyfragment_id.to_string());
    }

    pub fn viewing(&self) -> Vec<String> {
        self.viewing.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(sf: &str, panes: &[&str]) -> SseMessage {
        SseMessage::PaneUpdate {
            storyfragment_id: sf.to_string(),
            affected_pane_ids: panes.iter().map(|p| p.to_string()).collect(),
            scroll_target: None,
        }
    }

    #[test]
    fn test_fifo_below_cap() {
        let sub = Subscriber::new("t".to_string(), "s".to_string());
        sub.enqueue(update("sf1", &["p1"]), 4, 8).expect("enqueue");
        sub.enqueue(update("sf2", &["p2"]), 4, 8).expect("enqueue");
        let drained = sub.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].storyfragment_id(), "sf1");
        assert_eq!(drained[1].storyfragment_id(), "sf2");
    }

    #[test]
    fn test_full_queue_coalesces_same_fragment() {
        let sub = Subscriber::new("t".to_string(), "s".to_string());
        sub.enqueue(update("sf1", &["p1"]), 2, 8).expect("enqueue");
        sub.enqueue(update("sf2", &["p2"]), 2, 8).expect("enqueue");
        // Queue at cap: the old sf1 update is replaced by the newer one.
        sub.enqueue(update("sf1", &["p1", "p3"]), 2, 8).expect("enqueue");

        let drained = sub.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].storyfragment_id(), "sf2");
        assert_eq!(
            drained[1],
            update("sf1", &["p1", "p3"]),
        );
    }

    #[test]
    fn test_uncoalescible_overflow_drops_subscriber() {
        let sub = Subscriber::new("t".to_string(), "s".to_string());
        let mut result = Ok(());
        for i in 0..10 {
            result = sub.enqueue(update(&format!("sf{i}"), &["p"]), 2, 4);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(TractError::SubscriberLagging(_))));
        assert!(sub.is_closed());
        assert!(sub
            .enqueue(update("sfX", &["p"]), 2, 4)
            .is_err());
    }

    #[test]
    fn test_pane_update_wire_shape() {
        let message = SseMessage::PaneUpdate {
            storyfragment_id: "home".to_string(),
            affected_pane_ids: vec!["p2".to_string()],
            scroll_target: Some("p2".to_string()),
        };
        let payload = message.payload_json();
        assert_eq!(
            payload,
            r#"{"storyfragmentId":"home","affectedPaneIds":["p2"],"scrollTarget":"p2"}"#
        );

        let without_target = SseMessage::PaneUpdate {
            storyfragment_id: "home".to_string(),
            affected_pane_ids: vec!["p2".to_string()],
            scroll_target: None,
        };
        assert!(!without_target.payload_json().contains("scrollTarget"));
    }
}
