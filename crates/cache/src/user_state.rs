//! User-state layer: fingerprint states, session data, and session belief
//! contexts. 30-minute sliding TTL; the durable store rehydrates on miss.

use std::time::Duration;

use tractstack_core::config::CacheConfig;
use tractstack_core::types::{FingerprintState, SessionBeliefContext, SessionData};

use crate::layer::CacheLayer;

#[derive(Debug, Clone)]
enum UserStateValue {
    Fingerprint(FingerprintState),
    Session(SessionData),
    BeliefContext(SessionBeliefContext),
}

pub struct UserStateLayer {
    layer: CacheLayer<UserStateValue>,
}

impl UserStateLayer {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            layer: CacheLayer::new(
                "user_state",
                Some(Duration::from_secs(config.user_state_ttl_secs)),
                true,
                0,
            ),
        }
    }

    pub fn get_fingerprint(&self, tenant_id: &str, fingerprint_id: &str) -> Option<FingerprintState> {
        self.layer
            .get(tenant_id, &format!("fp:{fingerprint_id}"))
            .and_then(|v| match v.as_ref() {
                UserStateValue::Fingerprint(state) => Some(state.clone()),
                _ => None,
            })
    }

    /// Replace the fingerprint entry wholesale (copy-on-write of the caller's
    /// mutated state). Serialized per fingerprint by the store's stripe lock.
    pub fn set_fingerprint(&self, tenant_id: &str, state: FingerprintState) {
        let key = format!("fp:{}", state.fingerprint_id);
        let size = state.held_beliefs.len() * 64 + 128;
        self.layer
            .set(tenant_id, &key, UserStateValue::Fingerprint(state), None, size);
    }

    pub fn get_session(&self, tenant_id: &str, session_id: &str) -> Option<SessionData> {
        self.layer
            .get(tenant_id, &format!("sess:{session_id}"))
            .and_then(|v| match v.as_ref() {
                UserStateValue::Session(data) => Some(data.clone()),
                _ => None,
            })
    }

    pub fn set_session(&self, tenant_id: &str, data: SessionData) {
        let key = format!("sess:{}", data.session_id);
        self.layer
            .set(tenant_id, &key, UserStateValue::Session(data), None, 128);
    }

    pub fn remove_session(&self, tenant_id: &str, session_id: &str) {
        self.layer.invalidate(tenant_id, &format!("sess:{session_id}"));
        self.invalidate_session_contexts(tenant_id, session_id);
    }

    pub fn get_belief_context(
        &self,
        tenant_id: &str,
        session_id: &str,
        storyfragment_id: &str,
    ) -> Option<SessionBeliefContext> {
        self.layer
            .get(tenant_id, &format!("ctx:{session_id}:{storyfragment_id}"))
            .and_then(|v| match v.as_ref() {
                UserStateValue::BeliefContext(ctx) => Some(ctx.clone()),
                _ => None,
            })
    }

    pub fn set_belief_context(&self, tenant_id: &str, context: SessionBeliefContext) {
        let key = format!("ctx:{}:{}", context.session_id, context.storyfragment_id);
        let size = context.user_beliefs.len() * 64 + context.last_evaluation.len() * 32 + 128;
        self.layer
            .set(tenant_id, &key, UserStateValue::BeliefContext(context), None, size);
    }

    /// Drop every cached belief context for one session, all fragments.
    /// Called after any belief mutation so the next diff rebuilds from the
    /// fingerprint state.
    pub fn invalidate_session_contexts(&self, tenant_id: &str, session_id: &str) -> usize {
        self.layer
            .invalidate_prefix(tenant_id, &format!("ctx:{session_id}:"))
    }

    pub fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        self.layer.invalidate_tenant(tenant_id)
    }

    pub fn scan_keys(&self, tenant_id: &str) -> Vec<String> {
        self.layer.scan_keys(tenant_id)
    }

    pub fn sweep(&self) -> usize {
        self.layer.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tractstack_core::types::BeliefMap;

    fn context(session: &str, sf: &str) -> SessionBeliefContext {
        SessionBeliefContext {
            tenant_id: "t".to_string(),
            session_id: session.to_string(),
            storyfragment_id: sf.to_string(),
            user_beliefs: BeliefMap::new(),
            last_evaluation: BTreeMap::new(),
        }
    }

    #[test]
    fn test_session_context_invalidation_is_per_session() {
        let layer = UserStateLayer::new(&CacheConfig::default());
        layer.set_belief_context("t", context("s1", "sf1"));
        layer.set_belief_context("t", context("s1", "sf2"));
        layer.set_belief_context("t", context("s2", "sf1"));

        assert_eq!(layer.invalidate_session_contexts("t", "s1"), 2);
        assert!(layer.get_belief_context("t", "s1", "sf1").is_none());
        assert!(layer.get_belief_context("t", "s2", "sf1").is_some());
    }

    #[test]
    fn test_remove_session_drops_contexts_too() {
        let layer = UserStateLayer::new(&CacheConfig::default());
        layer.set_session(
            "t",
            SessionData {
                session_id: "s1".to_string(),
                tenant_id: "t".to_string(),
                fingerprint_id: "fp1".to_string(),
                visit_id: "v1".to_string(),
            },
        );
        layer.set_belief_context("t", context("s1", "sf1"));

        layer.remove_session("t", "s1");
        assert!(layer.get_session("t", "s1").is_none());
        assert!(layer.get_belief_context("t", "s1", "sf1").is_none());
    }
}
