//! Latest-request-wins bookkeeping for read pipelines.

use std::collections::HashMap;
use std::hash::Hash;

/// Monotonic request number, unique within one tracker.
pub type Stamp = u64;

/// Hands out increasing stamps per pipeline and remembers the newest one.
///
/// A response is applied only if it carries the newest stamp of its pipeline.
/// Older requests are not aborted, their results are simply ignored.
#[derive(Debug)]
pub struct RequestStamps<K> {
    next: Stamp,
    latest: HashMap<K, Stamp>,
}

impl<K> Default for RequestStamps<K> {
    fn default() -> Self {
        Self {
            next: 0,
            latest: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy> RequestStamps<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, pipeline: K) -> Stamp {
        self.next += 1;
        self.latest.insert(pipeline, self.next);
        self.next
    }

    pub fn is_latest(&self, pipeline: K, stamp: Stamp) -> bool {
        self.latest.get(&pipeline) == Some(&stamp)
    }

    /// Forgets every outstanding request so that nothing in flight can land.
    pub fn reset(&mut self) {
        self.latest.clear();
    }
}
