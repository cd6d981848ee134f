use parking_lot::Mutex;
use rand::Rng;

use crate::mqtt::codec::ReqId;

/// Wrapping request ID counter
///
/// Starts at a random point in `[min, max]` and wraps back to `min`. IDs repeat
/// after `max - min + 1` requests; two requests in flight with the same ID
/// would both see the first response.
#[derive(Debug)]
pub struct ReqIdSequence {
    min: ReqId,
    max: ReqId,
    next: Mutex<ReqId>,
}

impl ReqIdSequence {
    pub fn new(min: ReqId, max: ReqId) -> Self {
        let (min, max) = (min.min(max), min.max(max));
        let seed = rand::thread_rng().gen_range(min..=max);
        Self::with_seed(min, max, seed)
    }

    pub fn with_seed(min: ReqId, max: ReqId, seed: ReqId) -> Self {
        Self {
            min,
            max,
            next: Mutex::new(seed.clamp(min, max)),
        }
    }

    pub fn next_id(&self) -> ReqId {
        let mut next = self.next.lock();
        let id = *next;
        *next = if id >= self.max { self.min } else { id + 1 };
        id
    }
}
