#![warn(clippy::unwrap_used)]

//! SSE broadcaster: per-session subscriber registry, visibility diff
//! computation, and ordered fan-out with coalescing and liveness.

pub mod diff;
pub mod subscriber;

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tractstack_cache::TenantCache;
use tractstack_core::config::SseConfig;
use tractstack_core::types::{BeliefMap, SessionBeliefContext, SessionData};
use tractstack_core::TractResult;
use tractstack_store::{BeliefStateStore, ContentLoader, TenantDb};
use tracing::{debug, info, warn};

pub use diff::{changed_panes, evaluate_fragment};
pub use subscriber::{SseMessage, Subscriber};

type SessionKey = (String, String);

pub struct Broadcaster {
    config: SseConfig,
    cache: Arc<TenantCache>,
    loader: ContentLoader,
    beliefs: Arc<BeliefStateStore>,
    /// (tenant, session) -> live subscriber.
    subscribers: DashMap<SessionKey, Arc<Subscriber>>,
    /// (tenant, storyfragment) -> sessions viewing it.
    viewers: DashMap<SessionKey, BTreeSet<String>>,
}

impl Broadcaster {
    pub fn new(
        config: SseConfig,
        cache: Arc<TenantCache>,
        loader: ContentLoader,
        beliefs: Arc<BeliefStateStore>,
    ) -> Self {
        Self {
            config,
            cache,
            loader,
            beliefs,
            subscribers: DashMap::new(),
            viewers: DashMap::new(),
        }
    }

    // ─── Subscription lifecycle ─────────────────────────────────────────

    /// Register a subscriber for `(tenant, session)` and return the SSE
    /// stream. A second subscription for the same session closes the first.
    pub fn subscribe(
        self: Arc<Self>,
        tenant_id: &str,
        session_id: &str,
        initial_fragment: Option<&str>,
    ) -> ReceiverStream<Result<Event, Infallible>> {
        let subscriber = Arc::new(Subscriber::new(
            tenant_id.to_string(),
            session_id.to_string(),
        ));
        if let Some(fragment) = initial_fragment {
            self.mark_viewing_inner(&subscriber, fragment);
        }

        let key = (tenant_id.to_string(), session_id.to_string());
        if let Some(previous) = self.subscribers.insert(key, Arc::clone(&subscriber)) {
            previous.close();
        }
        metrics::counter!("sse_subscribed").increment(1);
        info!(tenant = tenant_id, session = session_id, "sse subscribed");

        let (sender, receiver) = mpsc::channel::<Result<Event, Infallible>>(16);
        tokio::spawn(async move {
            self.pump(subscriber, sender).await;
        });

        ReceiverStream::new(receiver)
    }

    /// Drive one subscriber: drain pane updates as they arrive, emit
    /// heartbeats, and close after the idle window with no successful write.
    async fn pump(
        self: Arc<Self>,
        subscriber: Arc<Subscriber>,
        sender: mpsc::Sender<Result<Event, Infallible>>,
    ) {
        let heartbeat_period = Duration::from_secs(self.config.heartbeat_secs);
        let idle_window = Duration::from_secs(self.config.idle_close_secs);
        let mut heartbeat = tokio::time::interval(heartbeat_period);
        let mut last_write = Instant::now();
        let mut beats: u64 = 0;

        loop {
            if subscriber.is_closed() {
                break;
            }
            tokio::select! {
                _ = subscriber.notified() => {
                    let mut delivered = true;
                    for message in subscriber.drain() {
                        match tokio::time::timeout(idle_window, sender.send(Ok(message.to_event()))).await {
                            Ok(Ok(())) => {
                                last_write = Instant::now();
                                metrics::counter!("sse_delivered").increment(1);
                            }
                            _ => {
                                delivered = false;
                                break;
                            }
                        }
                    }
                    if !delivered {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    beats += 1;
                    let event = Event::default().event("heartbeat").data(beats.to_string());
                    match tokio::time::timeout(idle_window, sender.send(Ok(event))).await {
                        Ok(Ok(())) => last_write = Instant::now(),
                        _ => break,
                    }
                    if last_write.elapsed() > idle_window {
                        warn!(session = %subscriber.session_id, "sse idle, closing");
                        break;
                    }
                }
            }
        }

        self.unregister(&subscriber).await;
    }

    /// Release a subscriber from both indices, then destroy the session
    /// after the grace period unless it resubscribed.
    async fn unregister(self: Arc<Self>, subscriber: &Arc<Subscriber>) {
        subscriber.close();
        let key = (subscriber.tenant_id.clone(), subscriber.session_id.clone());

        // Only remove the entry if it still points at this subscriber; a
        // reconnect may already have replaced it.
        if let Some(current) = self.subscribers.get(&key) {
            if Arc::ptr_eq(current.value(), subscriber) {
                drop(current);
                self.subscribers.remove(&key);
            }
        }
        for fragment in subscriber.viewing() {
            let viewer_key = (subscriber.tenant_id.clone(), fragment);
            if let Some(mut sessions) = self.viewers.get_mut(&viewer_key) {
                sessions.remove(&subscriber.session_id);
            }
        }
        metrics::counter!("sse_unsubscribed").increment(1);

        let broadcaster = self;
        let (tenant_id, session_id) = key;
        let grace = Duration::from_secs(broadcaster.config.session_grace_secs);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let key = (tenant_id.clone(), session_id.clone());
            if !broadcaster.subscribers.contains_key(&key) {
                broadcaster.cache.user_state.remove_session(&tenant_id, &session_id);
                debug!(session = %session_id, "session destroyed after grace");
            }
        });
    }

    /// Record a "session is viewing fragment" heartbeat.
    pub fn mark_viewing(&self, tenant_id: &str, session_id: &str, storyfragment_id: &str) {
        let key = (tenant_id.to_string(), session_id.to_string());
        if let Some(subscriber) = self.subscribers.get(&key) {
            self.mark_viewing_inner(subscriber.value(), storyfragment_id);
        } else {
            // No live stream yet; index the intent so the first broadcast
            // after subscribe still reaches this session.
            self.viewers
                .entry((tenant_id.to_string(), storyfragment_id.to_string()))
                .or_default()
                .insert(session_id.to_string());
        }
    }

    fn mark_viewing_inner(&self, subscriber: &Subscriber, storyfragment_id: &str) {
        subscriber.mark_viewing(storyfragment_id);
        self.viewers
            .entry((subscriber.tenant_id.clone(), storyfragment_id.to_string()))
            .or_default()
            .insert(subscriber.session_id.clone());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Story fragments one session has reported viewing.
    pub fn fragments_viewed_by(&self, tenant_id: &str, session_id: &str) -> Vec<String> {
        self.viewers
            .iter()
            .filter(|entry| entry.key().0 == tenant_id && entry.value().contains(session_id))
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    // ─── Diff + fan-out ─────────────────────────────────────────────────

    /// After belief mutations: for every story fragment whose registry
    /// references a changed slug, re-evaluate each viewing session and
    /// send the panes whose verdict flipped. Called with the origin
    /// fingerprint's stripe lock still held.
    pub async fn broadcast_changes(
        &self,
        db: &TenantDb,
        origin: &SessionData,
        changed_slugs: &[String],
        current_pane_id: Option<&str>,
        goto_pane_id: Option<&str>,
    ) -> TractResult<()> {
        let fragments: Vec<String> = self
            .viewers
            .iter()
            .filter(|entry| entry.key().0 == db.tenant_id && !entry.value().is_empty())
            .map(|entry| entry.key().1.clone())
            .collect();

        for storyfragment_id in fragments {
            let registry = match self.loader.registry(db, &storyfragment_id).await {
                Ok(registry) => registry,
                Err(e) => {
                    warn!(fragment = %storyfragment_id, error = %e, "registry unavailable for diff");
                    continue;
                }
            };
            if !registry.references_any(changed_slugs) {
                continue;
            }

            let sessions: Vec<String> = self
                .viewers
                .get(&(db.tenant_id.clone(), storyfragment_id.clone()))
                .map(|s| s.value().iter().cloned().collect())
                .unwrap_or_default();

            for session_id in sessions {
                let Some(session) = self.cache.user_state.get_session(&db.tenant_id, &session_id)
                else {
                    continue;
                };
                // Only sessions of the mutated fingerprint can flip.
                if session.fingerprint_id != origin.fingerprint_id {
                    continue;
                }

                let state = match self.beliefs.load_state(db, &session.fingerprint_id).await {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "state load failed, skipping session");
                        continue;
                    }
                };
                let baseline = self
                    .cache
                    .user_state
                    .get_belief_context(&db.tenant_id, &session_id, &storyfragment_id);
                let after = evaluate_fragment(&registry, &state.held_beliefs);

                let affected = match &baseline {
                    Some(context) => changed_panes(&context.last_evaluation, &after),
                    // First evaluation for this session+fragment: warm the
                    // context, nothing to diff against.
                    None => Vec::new(),
                };

                self.cache.user_state.set_belief_context(
                    &db.tenant_id,
                    SessionBeliefContext {
                        tenant_id: db.tenant_id.clone(),
                        session_id: session_id.clone(),
                        storyfragment_id: storyfragment_id.clone(),
                        user_beliefs: state.held_beliefs.clone(),
                        last_evaluation: after.clone(),
                    },
                );

                if affected.is_empty() {
                    continue;
                }

                let scroll_target = if session_id == origin.session_id {
                    scroll_target_for(goto_pane_id, current_pane_id, &affected, &after)
                } else {
                    None
                };

                self.send_to_session(
                    &db.tenant_id,
                    &session_id,
                    SseMessage::PaneUpdate {
                        storyfragment_id: storyfragment_id.clone(),
                        affected_pane_ids: affected,
                        scroll_target,
                    },
                );
            }
        }
        Ok(())
    }

    /// PAGEVIEWED synchronization: diff "no beliefs" against the session's
    /// current beliefs and send the result to that session only.
    pub async fn synchronize_session(
        &self,
        db: &TenantDb,
        session: &SessionData,
        storyfragment_id: &str,
    ) -> TractResult<()> {
        let state = self.beliefs.load_state(db, &session.fingerprint_id).await?;
        if state.held_beliefs.is_empty() {
            return Ok(());
        }

        let registry = self.loader.registry(db, storyfragment_id).await?;
        let baseline = evaluate_fragment(&registry, &BeliefMap::new());
        let after = evaluate_fragment(&registry, &state.held_beliefs);
        let affected = changed_panes(&baseline, &after);

        self.cache.user_state.set_belief_context(
            &db.tenant_id,
            SessionBeliefContext {
                tenant_id: db.tenant_id.clone(),
                session_id: session.session_id.clone(),
                storyfragment_id: storyfragment_id.to_string(),
                user_beliefs: state.held_beliefs.clone(),
                last_evaluation: after,
            },
        );

        if !affected.is_empty() {
            self.send_to_session(
                &db.tenant_id,
                &session.session_id,
                SseMessage::PaneUpdate {
                    storyfragment_id: storyfragment_id.to_string(),
                    affected_pane_ids: affected,
                    scroll_target: None,
                },
            );
        }
        Ok(())
    }

    fn send_to_session(&self, tenant_id: &str, session_id: &str, message: SseMessage) {
        let key = (tenant_id.to_string(), session_id.to_string());
        let Some(subscriber) = self.subscribers.get(&key).map(|s| Arc::clone(s.value())) else {
            debug!(session = session_id, "no live subscriber for update");
            return;
        };
        if let Err(e) = subscriber.enqueue(
            message,
            self.config.queue_cap,
            self.config.queue_hard_cap,
        ) {
            warn!(session = session_id, error = %e, "subscriber dropped");
            self.subscribers.remove(&key);
        }
    }
}

/// `gotoPaneId` wins iff it just became visible; otherwise echo the
/// current pane so the client preserves its viewport.
fn scroll_target_for(
    goto_pane_id: Option<&str>,
    current_pane_id: Option<&str>,
    affected: &[String],
    after: &std::collections::BTreeMap<String, bool>,
) -> Option<String> {
    if let Some(goto) = goto_pane_id {
        let newly_visible =
            affected.iter().any(|p| p == goto) && after.get(goto).copied().unwrap_or(false);
        if newly_visible {
            return Some(goto.to_string());
        }
    }
    current_pane_id.map(|p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_target_prefers_newly_visible_goto() {
        let mut after = std::collections::BTreeMap::new();
        after.insert("p2".to_string(), true);
        let affected = vec!["p2".to_string()];

        assert_eq!(
            scroll_target_for(Some("p2"), Some("p1"), &affected, &after),
            Some("p2".to_string())
        );
    }

    #[test]
    fn test_scroll_target_echoes_current_pane_otherwise() {
        let mut after = std::collections::BTreeMap::new();
        after.insert("p2".to_string(), false);
        let affected = vec!["p2".to_string()];

        assert_eq!(
            scroll_target_for(Some("p2"), Some("p1"), &affected, &after),
            Some("p1".to_string())
        );
        assert_eq!(scroll_target_for(None, None, &affected, &after), None);
    }
}
