//! Request and iterator id allocation.

use std::collections::HashMap;

/// Monotonic u32 id allocator with wraparound.
///
/// On reaching `u32::MAX` the counter wraps to zero. Ids still live in the
/// caller's map are skipped so a long-lived iterator cannot collide with a
/// burst of short requests after a wrap. Zero is a valid id.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next id not currently present in `live`.
    pub fn next_id<V>(&mut self, live: &HashMap<u32, V>) -> u32 {
        loop {
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            if !live.contains_key(&id) {
                return id;
            }
        }
    }
}
