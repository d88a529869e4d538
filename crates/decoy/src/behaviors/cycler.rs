//! Per-stub response cursor.
//!
//! The cursor packs the response index and the repeat counter into a single
//! `AtomicU64`, so concurrent requests on the same stub each advance it
//! exactly once without taking a lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

fn split(v: u64) -> (u32, u32) {
    ((v >> 32) as u32, v as u32)
}

fn join(resp_idx: u32, repeat_idx: u32) -> u64 {
    (u64::from(resp_idx) << 32) | u64::from(repeat_idx)
}

fn advance(
    (mut resp_idx, mut repeat_idx): (u32, u32),
    response_count: u32,
    repeat_count: u32,
) -> (u32, u32) {
    repeat_idx = repeat_idx.saturating_add(1);
    if repeat_idx >= repeat_count {
        repeat_idx = 0;
        resp_idx += 1;
        if resp_idx >= response_count {
            resp_idx = 0;
        }
    }
    (resp_idx, repeat_idx)
}

/// Circular cursor over a stub's responses honouring `repeat`.
#[derive(Default)]
pub struct ResponseCursor(AtomicU64);

impl ResponseCursor {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Return the current response index and advance.
    ///
    /// `repeat_for` yields the `repeat` behavior of the response at an index.
    /// The returned index is always below `response_count` (or 0 when empty).
    pub fn next(
        &self,
        response_count: usize,
        mut repeat_for: impl FnMut(usize) -> Option<u32>,
    ) -> usize {
        if response_count == 0 {
            return 0;
        }
        let response_count = u32::try_from(response_count).unwrap_or(u32::MAX);
        let old_value = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                let (mut resp_idx, repeat_idx) = split(v);
                if resp_idx >= response_count {
                    resp_idx = response_count - 1;
                }
                let repeat_count = repeat_for(resp_idx as usize).unwrap_or(1).max(1);
                let (resp_idx, repeat_idx) =
                    advance((resp_idx, repeat_idx), response_count, repeat_count);
                Some(join(resp_idx, repeat_idx))
            })
            .unwrap_or_else(|e| e);
        let (resp_idx, _) = split(old_value);
        resp_idx.min(response_count - 1) as usize
    }
}

impl fmt::Debug for ResponseCursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (response_idx, repeat_idx) = split(self.0.load(Ordering::Relaxed));
        f.debug_struct("ResponseCursor")
            .field("response_idx", &response_idx)
            .field("repeat_idx", &repeat_idx)
            .finish()
    }
}

/// Types that carry a `repeat` behavior.
pub trait HasRepeatBehavior {
    fn repeat(&self) -> Option<u32>;
}

/// Dwell count of the response at `index`.
///
/// A response without its own `repeat` keeps the count of the closest earlier
/// response that has one, so `[{repeat: 2}, {}]` serves each response twice.
pub fn effective_repeat<T: HasRepeatBehavior>(responses: &[T], index: usize) -> Option<u32> {
    responses
        .get(..=index)?
        .iter()
        .rev()
        .find_map(HasRepeatBehavior::repeat)
}

impl ResponseCursor {
    /// [`ResponseCursor::next`] reading repeats from the responses themselves.
    pub fn next_for<T: HasRepeatBehavior>(&self, responses: &[T]) -> usize {
        self.next(responses.len(), |i| effective_repeat(responses, i))
    }
}
