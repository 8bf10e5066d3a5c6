//! Scripted Steem node for tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chainfeed_core::Block;

use crate::rpc::SteemError;
use crate::transport::SteemTransport;

#[derive(Default)]
struct NodeState {
    head: u64,
    irreversible: u64,
    blocks: HashMap<u64, Value>,
    failures: u32,
    calls: u64,
}

/// A [`SteemTransport`] answering `condenser_api` calls from memory.
/// Clones share the same node.
#[derive(Clone, Default)]
pub struct ScriptedNode {
    state: Arc<Mutex<NodeState>>,
}

impl ScriptedNode {
    /// A node with the given head and irreversible heights and no blocks.
    pub fn new(head: u64, irreversible: u64) -> Self {
        let node = Self::default();
        node.set_head(head, irreversible);
        node
    }

    /// A node holding empty blocks `1..=head`, all irreversible.
    pub fn with_chain(head: u64) -> Self {
        let node = Self::new(head, head);
        for h in 1..=head {
            node.add_block(h);
        }
        node
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_head(&self, head: u64, irreversible: u64) {
        let mut state = self.state();
        state.head = head;
        state.irreversible = irreversible;
    }

    /// Store an empty block at `height`.
    pub fn add_block(&self, height: u64) {
        self.insert(height, &Block::new(height, vec![]));
    }

    pub fn insert(&self, height: u64, block: &Block) {
        let value = serde_json::to_value(block).unwrap_or(Value::Null);
        self.set_block_value(height, value);
    }

    /// Store a raw `get_block` answer.
    pub fn set_block_value(&self, height: u64, value: Value) {
        self.state().blocks.insert(height, value);
    }

    /// Make the next `times` calls fail with an HTTP error.
    pub fn fail_next(&self, times: u32) {
        self.state().failures = times;
    }

    pub fn call_count(&self) -> u64 {
        self.state().calls
    }
}

#[async_trait]
impl SteemTransport for ScriptedNode {
    async fn call(&self, method: &str, params: Value) -> Result<Value, SteemError> {
        let mut state = self.state();
        state.calls += 1;
        if state.failures > 0 {
            state.failures -= 1;
            return Err(SteemError::Http("injected failure".into()));
        }

        match method {
            "condenser_api.get_dynamic_global_properties" => Ok(json!({
                "head_block_number": state.head,
                "head_block_id": format!("{:08x}", state.head),
                "time": "2018-03-01T00:00:00",
                "last_irreversible_block_num": state.irreversible,
            })),
            "condenser_api.get_block" => {
                let height = params.get(0).and_then(Value::as_u64).unwrap_or_default();
                Ok(state.blocks.get(&height).cloned().unwrap_or(Value::Null))
            }
            other => Err(SteemError::Decode {
                method: other.to_string(),
                reason: "unsupported method".into(),
            }),
        }
    }
}
