//! A Steem feed engine running against a scripted node.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use chainfeed_core::{Block, FeedState, Operation, RetryConfig, Transaction};
use chainfeed_steem::{BlockchainMode, ScriptedNode, SteemError, SteemFeedBuilder, SteemTransport};

fn greet_block(height: u64, who: &str) -> Block {
    Block::new(
        height,
        vec![Transaction::with_operations(vec![Operation::custom_json(
            "myapp_greet",
            format!(r#"{{"from":"{who}"}}"#),
            who,
        )])],
    )
}

fn builder() -> SteemFeedBuilder {
    SteemFeedBuilder::new()
        .prefix("myapp_")
        .catch_up_poll_interval_ms(1)
        .shutdown_grace_ms(0)
        .block_interval_ms(5)
        .retry(RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
        })
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn catches_up_then_follows_the_node() {
    let node = ScriptedNode::with_chain(5);
    node.insert(3, &greet_block(3, "alice"));

    let engine = builder().from_block(1).build_with(node.clone()).unwrap();

    let greetings = Arc::new(Mutex::new(Vec::new()));
    let sink = greetings.clone();
    engine.register_fn("greet", move |payload: &Value, who: &str| {
        sink.lock().unwrap().push((payload.clone(), who.to_string()));
    });
    let blocks = Arc::new(Mutex::new(Vec::new()));
    let seen = blocks.clone();
    engine.on_block_fn(move |height, _b| seen.lock().unwrap().push(height));

    engine.start().unwrap();
    wait_until(|| engine.cursor() == 6).await;
    assert_eq!(engine.state(), FeedState::Streaming);

    node.insert(6, &greet_block(6, "bob"));
    node.set_head(6, 6);
    wait_until(|| engine.cursor() == 7).await;

    engine.stop().await;

    assert_eq!(*blocks.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(
        *greetings.lock().unwrap(),
        vec![
            (json!({"from": "alice"}), "alice".to_string()),
            (json!({"from": "bob"}), "bob".to_string()),
        ]
    );
}

#[tokio::test]
async fn irreversible_mode_waits_for_finality() {
    let node = ScriptedNode::with_chain(8);
    node.set_head(8, 6);

    let engine = builder()
        .from_block(5)
        .mode(BlockchainMode::Irreversible)
        .build_with(node.clone())
        .unwrap();

    engine.start().unwrap();
    wait_until(|| engine.cursor() == 7).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(engine.cursor(), 7);

    node.set_head(8, 8);
    wait_until(|| engine.cursor() == 9).await;

    engine.stop().await;
}

#[tokio::test]
async fn node_outage_during_catch_up_is_retried() {
    let node = ScriptedNode::with_chain(3);
    node.fail_next(2);

    let engine = builder().from_block(1).build_with(node.clone()).unwrap();
    engine.start().unwrap();
    wait_until(|| engine.cursor() == 4).await;

    assert_eq!(engine.metrics().blocks_skipped, 0);
    assert_eq!(engine.metrics().blocks_processed, 3);

    engine.stop().await;
}

/// Produces blocks 6 and 7 exactly when the live feed first reads the head,
/// i.e. after catch-up has already declared itself caught up at 5.
struct HeadMovesAtHandoff {
    node: ScriptedNode,
    head_reads: AtomicU32,
}

#[async_trait]
impl SteemTransport for HeadMovesAtHandoff {
    async fn call(&self, method: &str, params: Value) -> Result<Value, SteemError> {
        if method == "condenser_api.get_dynamic_global_properties"
            && self.head_reads.fetch_add(1, Ordering::SeqCst) == 1
        {
            self.node.add_block(6);
            self.node.add_block(7);
            self.node.set_head(7, 7);
        }
        self.node.call(method, params).await
    }
}

#[tokio::test]
async fn blocks_produced_during_handoff_are_not_lost() {
    let transport = HeadMovesAtHandoff {
        node: ScriptedNode::with_chain(5),
        head_reads: AtomicU32::new(0),
    };
    let engine = builder().from_block(5).build_with(transport).unwrap();
    let blocks = Arc::new(Mutex::new(Vec::new()));
    let seen = blocks.clone();
    engine.on_block_fn(move |height, _b| seen.lock().unwrap().push(height));

    engine.start().unwrap();
    wait_until(|| engine.cursor() == 8).await;
    engine.stop().await;

    assert_eq!(*blocks.lock().unwrap(), vec![5, 6, 7]);
}
