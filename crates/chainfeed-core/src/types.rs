//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FeedError;

/// Operation kind that carries application payloads.
pub const CUSTOM_JSON: &str = "custom_json";

// ─── Block ────────────────────────────────────────────────────────────────────

/// A signed block as returned by `condenser_api.get_block`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block id (`0000000a…`); the first 8 hex chars encode the height.
    pub block_id: String,
    /// Id of the parent block.
    #[serde(default)]
    pub previous: String,
    /// Block production time (`2016-03-24T16:05:00`).
    #[serde(default)]
    pub timestamp: String,
    /// Producing witness account.
    #[serde(default)]
    pub witness: String,
    #[serde(default)]
    pub transaction_ids: Vec<String>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block at `height` with a synthetic id.
    pub fn new(height: u64, transactions: Vec<Transaction>) -> Self {
        Self {
            block_id: format!("{:08x}{}", height, "0".repeat(32)),
            previous: format!("{:08x}{}", height.saturating_sub(1), "0".repeat(32)),
            timestamp: String::new(),
            witness: String::new(),
            transaction_ids: Vec::new(),
            transactions,
        }
    }

    /// Height encoded in the block id.
    pub fn height(&self) -> Result<u64, FeedError> {
        height_from_block_id(&self.block_id)
    }

    /// Iterate over every `custom_json` operation in the block, in order,
    /// together with its `(tx_index, op_index)` position.
    pub fn custom_json_ops(&self) -> impl Iterator<Item = (usize, usize, &CustomJsonOperation)> {
        self.transactions.iter().enumerate().flat_map(|(ti, tx)| {
            tx.operations
                .iter()
                .enumerate()
                .filter_map(move |(oi, op)| op.as_custom_json().map(|cj| (ti, oi, cj)))
        })
    }
}

/// Decode the height from a block id: the first 4 bytes, big-endian hex.
pub fn height_from_block_id(block_id: &str) -> Result<u64, FeedError> {
    let invalid = || FeedError::InvalidBlockId {
        block_id: block_id.to_string(),
    };
    let prefix = block_id.get(..8).ok_or_else(invalid)?;
    u64::from_str_radix(prefix, 16).map_err(|_| invalid())
}

// ─── Transaction ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub ref_block_num: u32,
    #[serde(default)]
    pub ref_block_prefix: u64,
    #[serde(default)]
    pub expiration: String,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub signatures: Vec<String>,
}

impl Transaction {
    pub fn with_operations(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            ..Default::default()
        }
    }
}

// ─── Operation ────────────────────────────────────────────────────────────────

/// A single operation inside a transaction.
///
/// Only `custom_json` is decoded; every other kind is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawOperation", into = "RawOperation")]
pub enum Operation {
    CustomJson(CustomJsonOperation),
    Other { kind: String, value: Value },
}

impl Operation {
    /// A `custom_json` operation signed by one posting authority.
    pub fn custom_json(id: impl Into<String>, json: impl Into<String>, poster: &str) -> Self {
        Self::CustomJson(CustomJsonOperation {
            id: id.into(),
            json: json.into(),
            required_auths: Vec::new(),
            required_posting_auths: vec![poster.to_string()],
        })
    }

    /// Operation kind, e.g. `"vote"` or `"custom_json"`.
    pub fn kind(&self) -> &str {
        match self {
            Self::CustomJson(_) => CUSTOM_JSON,
            Self::Other { kind, .. } => kind,
        }
    }

    pub fn as_custom_json(&self) -> Option<&CustomJsonOperation> {
        match self {
            Self::CustomJson(op) => Some(op),
            Self::Other { .. } => None,
        }
    }
}

/// `custom_json` operation body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomJsonOperation {
    /// Application identifier (namespace prefix included).
    pub id: String,
    /// JSON payload, string-encoded.
    pub json: String,
    /// Accounts that signed with their active key.
    #[serde(default)]
    pub required_auths: Vec<String>,
    /// Accounts that signed with their posting key.
    #[serde(default)]
    pub required_posting_auths: Vec<String>,
}

impl CustomJsonOperation {
    /// The account that authorized the operation: the first posting
    /// authority, or the first active authority when no posting key signed.
    pub fn authorizer(&self) -> Option<&str> {
        self.required_posting_auths
            .first()
            .or_else(|| self.required_auths.first())
            .map(String::as_str)
    }

    /// Parse the string-encoded payload.
    pub fn payload(&self) -> Result<Value, FeedError> {
        serde_json::from_str(&self.json).map_err(|e| FeedError::PayloadDecode {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Wire shapes for an operation: legacy `["kind", {…}]` pairs, or the
/// appbase `{"type": "kind_operation", "value": {…}}` object.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawOperation {
    Pair(String, Value),
    Tagged {
        #[serde(rename = "type")]
        kind: String,
        value: Value,
    },
}

impl From<RawOperation> for Operation {
    fn from(raw: RawOperation) -> Self {
        let (kind, value) = match raw {
            RawOperation::Pair(kind, value) => (kind, value),
            RawOperation::Tagged { kind, value } => {
                let kind = kind.strip_suffix("_operation").unwrap_or(&kind).to_string();
                (kind, value)
            }
        };
        if kind == CUSTOM_JSON {
            match serde_json::from_value::<CustomJsonOperation>(value.clone()) {
                Ok(op) => return Self::CustomJson(op),
                Err(e) => {
                    tracing::warn!(error = %e, "custom_json operation with unexpected shape");
                }
            }
        }
        Self::Other { kind, value }
    }
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        match op {
            Operation::CustomJson(cj) => RawOperation::Pair(
                CUSTOM_JSON.to_string(),
                serde_json::to_value(cj).unwrap_or(Value::Null),
            ),
            Operation::Other { kind, value } => RawOperation::Pair(kind, value),
        }
    }
}

// ─── Dispatch context ─────────────────────────────────────────────────────────

/// The current phase of the engine when a block was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedPhase {
    /// Polling historical blocks.
    CatchUp,
    /// Consuming the live block stream.
    Streaming,
}

/// Context passed to operation handlers.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Height of the block carrying the operation.
    pub height: u64,
    /// Operation identifier with the namespace prefix removed.
    pub id: String,
    /// Authorizing account (first posting authority, else first active one).
    /// Empty if the operation lists no authorities.
    pub authorizer: String,
    /// Index of the transaction within the block.
    pub tx_index: usize,
    /// Index of the operation within the transaction.
    pub op_index: usize,
    pub phase: FeedPhase,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn height_from_id() {
        assert_eq!(height_from_block_id("0000000a8f3c2d1e").unwrap(), 10);
        assert_eq!(height_from_block_id("01312d00ffff").unwrap(), 20_000_000);
        assert!(height_from_block_id("00ab").is_err());
        assert!(height_from_block_id("zzzzzzzz00").is_err());
    }

    #[test]
    fn decodes_legacy_operation_pairs() {
        let tx: Transaction = serde_json::from_value(json!({
            "operations": [
                ["vote", {"voter": "bob", "weight": 10000}],
                ["custom_json", {
                    "id": "myapp_greet",
                    "json": "{\"msg\":\"hi\"}",
                    "required_auths": [],
                    "required_posting_auths": ["alice"]
                }]
            ]
        }))
        .unwrap();

        assert_eq!(tx.operations[0].kind(), "vote");
        let cj = tx.operations[1].as_custom_json().unwrap();
        assert_eq!(cj.id, "myapp_greet");
        assert_eq!(cj.authorizer(), Some("alice"));
        assert_eq!(cj.payload().unwrap(), json!({"msg": "hi"}));
    }

    #[test]
    fn decodes_appbase_operation_objects() {
        let op: Operation = serde_json::from_value(json!({
            "type": "custom_json_operation",
            "value": {"id": "x", "json": "[]", "required_auths": ["carol"], "required_posting_auths": []}
        }))
        .unwrap();
        let cj = op.as_custom_json().unwrap();
        assert_eq!(cj.authorizer(), Some("carol"));
    }

    #[test]
    fn malformed_custom_json_body_is_kept_opaque() {
        let op: Operation =
            serde_json::from_value(json!(["custom_json", {"unexpected": true}])).unwrap();
        assert_eq!(op.kind(), "custom_json");
        assert!(op.as_custom_json().is_none());
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let cj = CustomJsonOperation {
            id: "bad".into(),
            json: "{not json".into(),
            required_auths: vec![],
            required_posting_auths: vec![],
        };
        assert!(matches!(cj.payload(), Err(FeedError::PayloadDecode { .. })));
        assert_eq!(cj.authorizer(), None);
    }

    #[test]
    fn synthetic_block_id_encodes_height() {
        let b = Block::new(0x1312d00, vec![]);
        assert_eq!(b.height().unwrap(), 20_000_000);
        assert!(b.block_id.starts_with("01312d00"));
    }

    #[test]
    fn custom_json_ops_preserve_order() {
        let block: Block = serde_json::from_value(json!({
            "block_id": "00000002abcdef",
            "transactions": [
                {"operations": [["custom_json", {"id": "a", "json": "1"}]]},
                {"operations": [
                    ["transfer", {}],
                    ["custom_json", {"id": "b", "json": "2"}]
                ]}
            ]
        }))
        .unwrap();
        let ids: Vec<_> = block
            .custom_json_ops()
            .map(|(t, o, op)| (t, o, op.id.as_str()))
            .collect();
        assert_eq!(ids, vec![(0, 0, "a"), (1, 1, "b")]);
        assert_eq!(block.height().unwrap(), 2);
    }
}
