//! Event processing pipeline: classify, sequence, and dispatch a client
//! event batch, then hand visibility work to the broadcaster.
//!
//! Per-event failures are logged and never abort sibling events; one bad
//! belief slug must not drop the analytics events posted alongside it.

use std::sync::Arc;

use chrono::Utc;
use tractstack_broadcast::{evaluate_fragment, Broadcaster};
use tractstack_cache::TenantCache;
use tractstack_core::beliefs::BeliefVerb;
use tractstack_core::events::{ClientEvent, EventBatch, EventKind};
use tractstack_core::ids;
use tractstack_core::types::{Action, ObjectType, SessionBeliefContext, SessionData};
use tractstack_core::{TractError, TractResult};
use tractstack_store::{BeliefStateStore, ContentLoader, PersistOp, PersistQueue, TenantDb};
use tracing::{debug, warn};

pub struct EventProcessor {
    cache: Arc<TenantCache>,
    loader: ContentLoader,
    beliefs: Arc<BeliefStateStore>,
    broadcaster: Arc<Broadcaster>,
    persist: PersistQueue,
}

impl EventProcessor {
    pub fn new(
        cache: Arc<TenantCache>,
        loader: ContentLoader,
        beliefs: Arc<BeliefStateStore>,
        broadcaster: Arc<Broadcaster>,
        persist: PersistQueue,
    ) -> Self {
        Self {
            cache,
            loader,
            beliefs,
            broadcaster,
            persist,
        }
    }

    /// Process one batch for `(tenant, session)`. Events apply in input
    /// order; the fingerprint stripe lock is held from the visibility
    /// snapshot through broadcast enqueue so concurrent batches for the
    /// same fingerprint cannot stale each other's diff baseline.
    pub async fn process_batch(
        &self,
        db: &TenantDb,
        session_id: &str,
        batch: EventBatch,
    ) -> TractResult<()> {
        let start = std::time::Instant::now();
        let session = self
            .cache
            .user_state
            .get_session(&db.tenant_id, session_id)
            .ok_or_else(|| TractError::SessionUnknown(session_id.to_string()))?;

        let _guard = self
            .beliefs
            .locks()
            .lock(&db.tenant_id, &session.fingerprint_id)
            .await;

        if let Some(storyfragment_id) = &batch.storyfragment_id {
            self.broadcaster
                .mark_viewing(&db.tenant_id, session_id, storyfragment_id);
        }

        let belief_slugs = batch.belief_slugs();
        if batch.current_pane_id.is_some() && !belief_slugs.is_empty() {
            self.snapshot_visibility(db, &session, &belief_slugs).await;
        }

        let mut changed_slugs: Vec<String> = Vec::new();
        let mut pageviewed_fragments: Vec<String> = Vec::new();

        for event in &batch.events {
            match event.kind {
                EventKind::Belief => {
                    match self.apply_belief_event(db, &session, event).await {
                        Ok(true) => changed_slugs.push(event.id.clone()),
                        Ok(false) => {}
                        Err(e) => {
                            metrics::counter!("events_failed").increment(1);
                            warn!(slug = %event.id, error = %e, "belief event failed, continuing batch");
                        }
                    }
                }
                EventKind::Pane | EventKind::StoryFragment => {
                    if let Err(e) = self.record_analytics_event(db, &session, event) {
                        metrics::counter!("events_failed").increment(1);
                        warn!(id = %event.id, error = %e, "analytics event failed, continuing batch");
                        continue;
                    }
                    if event.kind == EventKind::StoryFragment && event.verb == "PAGEVIEWED" {
                        pageviewed_fragments.push(event.id.clone());
                    }
                }
                EventKind::Unknown => {
                    warn!(id = %event.id, verb = %event.verb, "unknown event type, skipping");
                }
            }
            metrics::counter!("events_processed").increment(1);
        }

        if !changed_slugs.is_empty() {
            self.broadcaster
                .broadcast_changes(
                    db,
                    &session,
                    &changed_slugs,
                    batch.current_pane_id.as_deref(),
                    batch.goto_pane_id.as_deref(),
                )
                .await?;
        }

        for storyfragment_id in pageviewed_fragments {
            self.broadcaster
                .mark_viewing(&db.tenant_id, session_id, &storyfragment_id);
            if let Err(e) = self
                .broadcaster
                .synchronize_session(db, &session, &storyfragment_id)
                .await
            {
                warn!(fragment = %storyfragment_id, error = %e, "synchronization broadcast failed");
            }
        }

        metrics::histogram!("event_batch_latency_us").record(start.elapsed().as_micros() as f64);
        Ok(())
    }

    /// Pre-mutation visibility snapshot: for each fragment this session
    /// views whose registry references a batch slug, warm the session
    /// belief context with current beliefs and verdicts. This is the diff
    /// baseline the broadcaster compares against after mutation.
    async fn snapshot_visibility(&self, db: &TenantDb, session: &SessionData, slugs: &[String]) {
        let mut fragments = self
            .broadcaster
            .fragments_viewed_by(&db.tenant_id, &session.session_id);
        fragments.sort();
        fragments.dedup();

        for storyfragment_id in fragments {
            let registry = match self.loader.registry(db, &storyfragment_id).await {
                Ok(registry) => registry,
                Err(e) => {
                    warn!(fragment = %storyfragment_id, error = %e, "snapshot skipped");
                    continue;
                }
            };
            if !registry.references_any(slugs) {
                continue;
            }
            let state = match self.beliefs.load_state(db, &session.fingerprint_id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "fingerprint load failed during snapshot");
                    continue;
                }
            };
            let verdicts = evaluate_fragment(&registry, &state.held_beliefs);
            self.cache.user_state.set_belief_context(
                &db.tenant_id,
                SessionBeliefContext {
                    tenant_id: db.tenant_id.clone(),
                    session_id: session.session_id.clone(),
                    storyfragment_id: storyfragment_id.clone(),
                    user_beliefs: state.held_beliefs.clone(),
                    last_evaluation: verdicts,
                },
            );
            debug!(fragment = %storyfragment_id, "visibility snapshot taken");
        }
    }

    /// Belief events carry the belief slug in `id`. Resolution failures and
    /// illegal verbs fail soft.
    async fn apply_belief_event(
        &self,
        db: &TenantDb,
        session: &SessionData,
        event: &ClientEvent,
    ) -> TractResult<bool> {
        let belief = self.loader.belief(db, &event.id).await?;
        let verb = BeliefVerb::parse(&event.verb, belief.scale)?;
        self.beliefs
            .apply(db, session, &belief, &verb, event.object.as_deref())
            .await
    }

    /// Pane / story fragment events append an action row and bump the
    /// hour-bucketed analytics counter.
    fn record_analytics_event(
        &self,
        db: &TenantDb,
        session: &SessionData,
        event: &ClientEvent,
    ) -> TractResult<()> {
        event.validate_verb()?;
        let object_type = match event.kind {
            EventKind::Pane => ObjectType::Pane,
            EventKind::StoryFragment => ObjectType::StoryFragment,
            _ => return Err(TractError::InvalidEvent("not an analytics event".to_string())),
        };

        let now = Utc::now();
        self.persist.enqueue(
            db.pool.clone(),
            PersistOp::AppendAction(Action {
                id: ids::new_id(),
                object_id: event.id.clone(),
                object_type,
                verb: event.verb.clone(),
                duration: event.duration,
                visit_id: session.visit_id.clone(),
                fingerprint_id: session.fingerprint_id.clone(),
                created_at: now,
            }),
        );
        self.cache
            .analytics
            .increment(&db.tenant_id, &event.id, &event.verb, now);
        Ok(())
    }
}
