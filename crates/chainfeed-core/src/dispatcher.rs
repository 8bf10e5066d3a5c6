//! Block dispatcher: routes a block's `custom_json` operations to handlers.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::FeedError;
use crate::handler::{BlockHandler, HandlerRegistry, OperationHandler};
use crate::types::{Block, FeedPhase, OperationContext};

/// Outcome of dispatching a single block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// `custom_json` operations found in the block.
    pub matched: u64,
    /// Operations delivered to a handler that returned `Ok`.
    pub handled: u64,
    /// Operations with no registered handler.
    pub unhandled: u64,
    /// Operations whose payload was not valid JSON.
    pub decode_errors: u64,
    /// Handler (block or operation) invocations that returned an error or panicked.
    pub handler_errors: u64,
}

/// Routes blocks through a shared [`HandlerRegistry`].
///
/// Handlers are looked up under a short read lock and awaited after it is
/// released, so registration can happen while blocks are being dispatched.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RwLock<HandlerRegistry>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RwLock<HandlerRegistry>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RwLock<HandlerRegistry>> {
        &self.registry
    }

    fn block_handler(&self) -> Arc<dyn BlockHandler> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .block_handler()
    }

    fn lookup(&self, namespaced_id: &str) -> Option<(Arc<dyn OperationHandler>, String)> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .handler_for(namespaced_id)
            .map(|h| (h, registry.local_id(namespaced_id).to_string()))
    }

    /// Dispatch `block` at `height`.
    ///
    /// The block callback always runs first. Errors from handlers and payload
    /// decoding are logged and counted; they never stop the remaining
    /// operations from being dispatched.
    pub async fn process(&self, block: &Block, height: u64, phase: FeedPhase) -> DispatchReport {
        let mut report = DispatchReport::default();

        let block_handler = self.block_handler();
        if let Err(e) = guarded("block", block_handler.handle_block(height, block)).await {
            tracing::error!(height, error = %e, "Block handler failed");
            report.handler_errors += 1;
        }

        for (tx_index, op_index, op) in block.custom_json_ops() {
            report.matched += 1;

            let Some((handler, local_id)) = self.lookup(&op.id) else {
                report.unhandled += 1;
                continue;
            };

            let payload = match op.payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(height, tx_index, op_index, error = %e, "Skipping operation");
                    report.decode_errors += 1;
                    continue;
                }
            };

            let ctx = OperationContext {
                height,
                id: local_id,
                authorizer: op.authorizer().unwrap_or_default().to_string(),
                tx_index,
                op_index,
                phase,
            };

            match guarded(&ctx.id, handler.handle(&payload, &ctx)).await {
                Ok(()) => report.handled += 1,
                Err(e) => {
                    tracing::error!(height, id = %op.id, error = %e, "Operation handler failed");
                    report.handler_errors += 1;
                }
            }
        }

        tracing::debug!(
            height,
            matched = report.matched,
            handled = report.handled,
            "Block dispatched"
        );
        report
    }
}

/// Await a handler, turning a panic into a [`FeedError::Handler`].
async fn guarded<F>(name: &str, fut: F) -> Result<(), FeedError>
where
    F: Future<Output = Result<(), FeedError>>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(FeedError::Handler {
                handler: name.to_string(),
                reason: format!("panicked: {}", panic_message(&*panic)),
            })
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
