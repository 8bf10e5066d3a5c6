//! Polling block stream.
//!
//! A spawned task reads the chain head every block interval and pushes each
//! new block, in height order, into a channel. The stream starts at the head
//! seen on the first poll; the engine fetches any heights between its cursor
//! and that first block itself. Dropping the returned stream ends the task at
//! its next send or poll.

use futures::channel::mpsc;
use futures::SinkExt;
use std::time::Duration;

use chainfeed_core::{Block, BlockStream, FeedError};

use crate::client::SteemClient;
use crate::transport::SteemTransport;

const CHANNEL_CAPACITY: usize = 64;

type Sender = mpsc::Sender<Result<Block, FeedError>>;

/// Spawn the polling task and return its receiving end.
pub fn poll_blocks<T: SteemTransport>(client: SteemClient<T>) -> BlockStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        run_poller(client, tx).await;
        tracing::debug!("block poller stopped");
    });

    Box::pin(rx)
}

async fn run_poller<T: SteemTransport>(client: SteemClient<T>, mut tx: Sender) {
    let interval = client.block_interval();
    let mut next: Option<u64> = None;

    loop {
        if tx.is_closed() {
            return;
        }

        match client.current_height().await {
            Ok(head) => {
                let from = *next.get_or_insert(head);
                tracing::trace!(from, head, "polling new blocks");
                match push_range(&client, &mut tx, from, head).await {
                    Some(reached) => next = Some(reached),
                    None => return,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "head poll failed");
                if tx.send(Err(FeedError::HeadQuery(e.to_string()))).await.is_err() {
                    return;
                }
            }
        }

        tokio::time::sleep(poll_delay(interval)).await;
    }
}

/// Push blocks `from..=head`. Returns the next height to request, or `None`
/// once the receiver is gone.
async fn push_range<T: SteemTransport>(
    client: &SteemClient<T>,
    tx: &mut Sender,
    from: u64,
    head: u64,
) -> Option<u64> {
    let mut height = from;
    while height <= head {
        let item = match client.block(height).await {
            Ok(Some(block)) => Ok(block),
            // Head moved past a block the node cannot serve yet; retry next poll.
            Ok(None) => break,
            Err(e) => Err(FeedError::BlockFetch {
                height,
                reason: e.to_string(),
            }),
        };
        let fetched = item.is_ok();
        if tx.send(item).await.is_err() {
            return None;
        }
        if !fetched {
            break;
        }
        height += 1;
    }
    Some(height)
}

fn poll_delay(interval: Duration) -> Duration {
    interval.max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNode;
    use futures::StreamExt;

    fn fast_client(node: ScriptedNode) -> SteemClient<ScriptedNode> {
        SteemClient::new(node).with_block_interval(Duration::from_millis(5))
    }

    async fn next_height(stream: &mut BlockStream) -> u64 {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no block in time")
            .expect("stream ended")
            .expect("stream error")
            .height()
            .unwrap()
    }

    #[tokio::test]
    async fn starts_at_head_and_follows_new_blocks() {
        let node = ScriptedNode::with_chain(10);
        let mut stream = poll_blocks(fast_client(node.clone()));

        assert_eq!(next_height(&mut stream).await, 10);

        node.add_block(11);
        node.add_block(12);
        node.set_head(12, 12);
        assert_eq!(next_height(&mut stream).await, 11);
        assert_eq!(next_height(&mut stream).await, 12);
    }

    #[tokio::test]
    async fn fetch_error_is_yielded_then_retried() {
        let node = ScriptedNode::with_chain(4);
        let mut stream = poll_blocks(fast_client(node.clone()));
        assert_eq!(next_height(&mut stream).await, 4);

        node.fail_next(1);
        node.add_block(5);
        node.set_head(5, 5);

        let mut saw_error = false;
        loop {
            let item = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap();
            match item {
                Err(_) => saw_error = true,
                Ok(block) => {
                    assert_eq!(block.height().unwrap(), 5);
                    break;
                }
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn dropping_stream_stops_polling() {
        let node = ScriptedNode::with_chain(3);
        let mut stream = poll_blocks(fast_client(node.clone()));
        assert_eq!(next_height(&mut stream).await, 3);
        drop(stream);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let calls = node.call_count();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(node.call_count(), calls);
    }
}
