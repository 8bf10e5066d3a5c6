//! Feed cursor: the next block height the engine will process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The engine's position in the chain.
///
/// Cheap to clone; all clones observe the same height. Only the engine's run
/// task writes to it, and every write goes through [`Cursor::advance_to`], so
/// the height never decreases.
#[derive(Debug, Clone)]
pub struct Cursor {
    next: Arc<AtomicU64>,
}

impl Cursor {
    /// Create a new cursor pointing at `height`.
    pub fn new(height: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(height)),
        }
    }

    /// Next height to process.
    pub fn get(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Move the cursor forward to `height`. Lower values are ignored.
    ///
    /// Returns the cursor value after the call.
    pub(crate) fn advance_to(&self, height: u64) -> u64 {
        let prev = self.next.fetch_max(height, Ordering::AcqRel);
        prev.max(height)
    }

    /// Returns `true` if a block at `height` has already been processed.
    pub fn is_behind(&self, height: u64) -> bool {
        height < self.get()
    }

    /// Returns `true` if the cursor has passed the chain head `head`.
    pub fn is_caught_up(&self, head: u64) -> bool {
        self.get() >= head
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advance() {
        let cursor = Cursor::new(100);
        assert_eq!(cursor.advance_to(101), 101);
        assert_eq!(cursor.get(), 101);
    }

    #[test]
    fn cursor_never_decreases() {
        let cursor = Cursor::new(9);
        assert_eq!(cursor.advance_to(8), 9);
        assert_eq!(cursor.get(), 9);
    }

    #[test]
    fn clones_share_position() {
        let cursor = Cursor::new(1);
        let reader = cursor.clone();
        cursor.advance_to(42);
        assert_eq!(reader.get(), 42);
    }

    #[test]
    fn caught_up_and_behind() {
        let cursor = Cursor::new(6);
        assert!(cursor.is_caught_up(5));
        assert!(cursor.is_caught_up(6));
        assert!(!cursor.is_caught_up(7));
        assert!(cursor.is_behind(5));
        assert!(!cursor.is_behind(6));
    }
}
