//! Belief state store: the cache-authoritative fingerprint belief map with
//! asynchronous write-through to the durable `heldbeliefs` and `actions`
//! tables.
//!
//! Reads come from the user-state cache, rehydrating from the store on
//! miss. Writes are serialized per fingerprint by the caller holding the
//! stripe lock; persistence lags behind the cache and its failures never
//! fail the user-visible path.

use std::sync::Arc;

use chrono::Utc;
use tractstack_cache::TenantCache;
use tractstack_core::beliefs::BeliefVerb;
use tractstack_core::ids;
use tractstack_core::types::{Action, Belief, FingerprintState, HeldBeliefRow, ObjectType, SessionData};
use tractstack_core::{TractError, TractResult};
use tracing::debug;

use crate::locks::FingerprintLocks;
use crate::persist::{PersistOp, PersistQueue};
use crate::sqlite::TenantDb;
use crate::visitors;

pub struct BeliefStateStore {
    cache: Arc<TenantCache>,
    persist: PersistQueue,
    locks: Arc<FingerprintLocks>,
}

impl BeliefStateStore {
    pub fn new(cache: Arc<TenantCache>, persist: PersistQueue, locks: Arc<FingerprintLocks>) -> Self {
        Self {
            cache,
            persist,
            locks,
        }
    }

    pub fn locks(&self) -> &Arc<FingerprintLocks> {
        &self.locks
    }

    /// Load the fingerprint state, rehydrating from `heldbeliefs` if the
    /// cache evicted it. Creates an empty state for new visitors.
    pub async fn load_state(&self, db: &TenantDb, fingerprint_id: &str) -> TractResult<FingerprintState> {
        if let Some(state) = self.cache.user_state.get_fingerprint(&db.tenant_id, fingerprint_id) {
            return Ok(state);
        }
        let state = visitors::rehydrate_fingerprint(&db.pool, fingerprint_id).await?;
        self.cache
            .user_state
            .set_fingerprint(&db.tenant_id, state.clone());
        Ok(state)
    }

    /// Apply one belief event. Returns whether the held value actually
    /// changed. Caller holds the fingerprint stripe lock.
    pub async fn apply(
        &self,
        db: &TenantDb,
        session: &SessionData,
        belief: &Belief,
        verb: &BeliefVerb,
        object: Option<&str>,
    ) -> TractResult<bool> {
        let mut state = self.load_state(db, &session.fingerprint_id).await?;
        let previous = state.held_beliefs.get(&belief.slug).cloned();

        let next: Option<Vec<String>> = match verb {
            BeliefVerb::IdentifyAs => {
                let object = object.ok_or_else(|| {
                    TractError::InvalidEvent(format!(
                        "IDENTIFY_AS for {} requires an object",
                        belief.slug
                    ))
                })?;
                Some(vec![object.to_string()])
            }
            BeliefVerb::Unset => None,
            BeliefVerb::Scale(value) => Some(vec![value.clone()]),
        };

        let changed = previous != next;
        if changed {
            match &next {
                Some(values) => {
                    state
                        .held_beliefs
                        .insert(belief.slug.clone(), values.clone());
                }
                None => {
                    state.held_beliefs.remove(&belief.slug);
                }
            }
            state.last_activity = Utc::now();
            self.cache
                .user_state
                .set_fingerprint(&db.tenant_id, state);
            // Any cached diff baseline for this session is now stale.
            self.cache
                .user_state
                .invalidate_session_contexts(&db.tenant_id, &session.session_id);
            metrics::counter!("beliefs_changed").increment(1);
        } else {
            debug!(belief = %belief.slug, "belief event produced no change");
        }

        // The action row is appended for every verb, UNSET included; the
        // heldbeliefs row mirrors only the current non-UNSET value.
        self.persist.enqueue(
            db.pool.clone(),
            PersistOp::AppendAction(Action {
                id: ids::new_id(),
                object_id: belief.id.clone(),
                object_type: ObjectType::Belief,
                verb: verb.as_str().to_string(),
                duration: None,
                visit_id: session.visit_id.clone(),
                fingerprint_id: session.fingerprint_id.clone(),
                created_at: Utc::now(),
            }),
        );
        self.cache.analytics.increment(
            &db.tenant_id,
            &belief.id,
            verb.as_str(),
            Utc::now(),
        );

        if changed {
            match verb {
                BeliefVerb::Unset => {
                    self.persist.enqueue(
                        db.pool.clone(),
                        PersistOp::DeleteHeldBelief {
                            belief_id: belief.id.clone(),
                            fingerprint_id: session.fingerprint_id.clone(),
                        },
                    );
                }
                _ => {
                    self.persist.enqueue(
                        db.pool.clone(),
                        PersistOp::UpsertHeldBelief(HeldBeliefRow {
                            id: ids::new_id(),
                            belief_id: belief.id.clone(),
                            fingerprint_id: session.fingerprint_id.clone(),
                            verb: verb.as_str().to_string(),
                            object: object.map(|o| o.to_string()),
                            updated_at: Utc::now(),
                        }),
                    );
                }
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tractstack_core::beliefs::BeliefScale;
    use tractstack_core::config::{CacheConfig, PersistConfig};
    use tractstack_core::types::BeliefMap;

    async fn setup() -> (BeliefStateStore, TenantDb, SessionData, Belief) {
        let pool = crate::sqlite::open_memory_database().await.expect("memory db");
        sqlx::query("INSERT INTO beliefs (id, slug, title, scale) VALUES ('b-mood', 'mood', 'Mood', 'custom')")
            .execute(&pool)
            .await
            .expect("seed belief");

        let cache = Arc::new(TenantCache::new(&CacheConfig::default()));
        let store = BeliefStateStore::new(
            Arc::clone(&cache),
            PersistQueue::new(&PersistConfig::default()),
            Arc::new(FingerprintLocks::new()),
        );
        let db = TenantDb::new("t", pool);
        let session = SessionData {
            session_id: "s1".to_string(),
            tenant_id: "t".to_string(),
            fingerprint_id: "fp1".to_string(),
            visit_id: "v1".to_string(),
        };
        let belief = Belief {
            id: "b-mood".to_string(),
            slug: "mood".to_string(),
            title: "Mood".to_string(),
            scale: BeliefScale::Custom,
            custom_values: None,
        };
        (store, db, session, belief)
    }

    #[tokio::test]
    async fn test_identify_as_sets_and_repeats_are_unchanged() {
        let (store, db, session, belief) = setup().await;

        let changed = store
            .apply(&db, &session, &belief, &BeliefVerb::IdentifyAs, Some("happy"))
            .await
            .expect("apply");
        assert!(changed);

        let state = store.load_state(&db, "fp1").await.expect("state");
        assert_eq!(state.held_beliefs["mood"], vec!["happy"]);

        let changed = store
            .apply(&db, &session, &belief, &BeliefVerb::IdentifyAs, Some("happy"))
            .await
            .expect("apply");
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_unset_removes_cache_and_durable_row() {
        let (store, db, session, belief) = setup().await;

        store
            .apply(&db, &session, &belief, &BeliefVerb::IdentifyAs, Some("happy"))
            .await
            .expect("apply");
        let changed = store
            .apply(&db, &session, &belief, &BeliefVerb::Unset, None)
            .await
            .expect("apply");
        assert!(changed);

        let state = store.load_state(&db, "fp1").await.expect("state");
        assert!(!state.held_beliefs.contains_key("mood"));

        store.persist.flush(db.pool.clone()).await;
        let rows = visitors::held_belief_rows(&db.pool, "fp1").await.expect("rows");
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_unset_of_absent_belief_is_not_a_change() {
        let (store, db, session, belief) = setup().await;
        let changed = store
            .apply(&db, &session, &belief, &BeliefVerb::Unset, None)
            .await
            .expect("apply");
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_persist_then_rehydrate_round_trips() {
        let (store, db, session, belief) = setup().await;

        store
            .apply(&db, &session, &belief, &BeliefVerb::IdentifyAs, Some("happy"))
            .await
            .expect("apply");
        store.persist.flush(db.pool.clone()).await;

        // Simulate cache eviction and reload from heldbeliefs.
        store.cache.user_state.invalidate_tenant("t");
        let state = store.load_state(&db, "fp1").await.expect("state");

        let mut expected = BeliefMap::new();
        expected.insert("mood".to_string(), vec!["happy".to_string()]);
        assert_eq!(state.held_beliefs, expected);
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_row_per_belief() {
        let (store, db, session, belief) = setup().await;

        store
            .apply(&db, &session, &belief, &BeliefVerb::IdentifyAs, Some("happy"))
            .await
            .expect("apply");
        store
            .apply(&db, &session, &belief, &BeliefVerb::IdentifyAs, Some("sad"))
            .await
            .expect("apply");
        store.persist.flush(db.pool.clone()).await;

        let rows = visitors::held_belief_rows(&db.pool, "fp1").await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2.as_deref(), Some("sad"));
    }
}
