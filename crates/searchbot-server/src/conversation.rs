use std::sync::Arc;

use chrono::Duration;
use searchbot_contracts::UserId;
use searchbot_kernel::{conversation_key, saturating_minutes, Clock, Flow};
use serde_json::{Map, Value};

use crate::store::SessionStore;

pub type State = Map<String, Value>;

pub const CURRENT_FLOW: &str = "current_flow";
pub const FLOW_DATA: &str = "flow_data";
pub const UPDATED_AT: &str = "updated_at";

/// Per-user conversation state on top of [`SessionStore`].
///
/// Every write renews the TTL (sliding expiry). `update_state` is a plain
/// read-modify-write: two concurrent updates for the same user can lose one
/// of the changes. A chat user issues one action at a time, so this race is
/// accepted rather than locked away.
pub struct ConversationState {
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    namespace: String,
    ttl: Duration,
}

impl ConversationState {
    pub fn new(
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
        timeout_minutes: u64,
    ) -> Self {
        Self {
            store,
            clock,
            namespace: namespace.into(),
            ttl: saturating_minutes(timeout_minutes),
        }
    }

    fn key(&self, user_id: UserId) -> String {
        conversation_key(user_id, &self.namespace)
    }

    pub async fn get_state(&self, user_id: UserId) -> State {
        match self.store.get(&self.key(user_id)).await {
            Some(Value::Object(map)) => map,
            _ => State::new(),
        }
    }

    pub async fn set_state(&self, user_id: UserId, mut state: State) {
        state.insert(
            UPDATED_AT.to_string(),
            Value::String(self.clock.now().to_rfc3339()),
        );
        self.store
            .set(&self.key(user_id), &Value::Object(state), Some(self.ttl))
            .await;
    }

    pub async fn update_state(&self, user_id: UserId, partial: State) {
        let mut state = self.get_state(user_id).await;
        state.extend(partial);
        self.set_state(user_id, state).await;
    }

    pub async fn clear_state(&self, user_id: UserId) {
        self.store.delete(&self.key(user_id)).await;
    }

    /// Sets the current flow. `flow_data` is only replaced when `data` is given.
    pub async fn set_flow(&self, user_id: UserId, flow: &Flow, data: Option<State>) {
        let mut partial = State::new();
        partial.insert(CURRENT_FLOW.to_string(), Value::String(flow.to_string()));
        if let Some(data) = data {
            partial.insert(FLOW_DATA.to_string(), Value::Object(data));
        }
        self.update_state(user_id, partial).await;
    }

    pub async fn get_flow(&self, user_id: UserId) -> Option<Flow> {
        self.get_state(user_id)
            .await
            .get(CURRENT_FLOW)
            .and_then(Value::as_str)
            .map(Flow::parse)
    }

    pub async fn get_flow_data(&self, user_id: UserId) -> State {
        match self.get_state(user_id).await.remove(FLOW_DATA) {
            Some(Value::Object(map)) => map,
            _ => State::new(),
        }
    }

    /// Leaves the flow but keeps the ad-hoc fields (`last_query`, uploads).
    pub async fn end_flow(&self, user_id: UserId) {
        let mut state = self.get_state(user_id).await;
        let had_flow = state.remove(CURRENT_FLOW).is_some();
        let had_data = state.remove(FLOW_DATA).is_some();
        if had_flow || had_data {
            self.set_state(user_id, state).await;
        }
    }
}
