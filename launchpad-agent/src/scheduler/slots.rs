//! Concurrency slots

use std::collections::HashSet;
use uuid::Uuid;

/// Pool of execution slots
///
/// Each admitted job holds exactly one slot until it is released. A pool
/// without capacity never runs out.
#[derive(Debug)]
pub struct SlotPool {
    capacity: Option<usize>,
    held: HashSet<Uuid>,
}

impl SlotPool {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            held: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn has_free(&self) -> bool {
        self.capacity.is_none_or(|cap| self.held.len() < cap)
    }

    /// Free slots, `None` when unbounded
    pub fn free(&self) -> Option<usize> {
        self.capacity.map(|cap| cap.saturating_sub(self.held.len()))
    }

    pub fn in_use(&self) -> usize {
        self.held.len()
    }

    /// Gives a slot to `job_id`; false when the pool is exhausted or the job already holds one
    pub fn acquire(&mut self, job_id: Uuid) -> bool {
        if !self.has_free() {
            return false;
        }
        self.held.insert(job_id)
    }

    /// Returns the job's slot; false when it held none
    pub fn release(&mut self, job_id: Uuid) -> bool {
        self.held.remove(&job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_pool() {
        let mut pool = SlotPool::new(Some(2));
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(pool.acquire(a));
        assert!(!pool.acquire(a), "one slot per job");
        assert!(pool.acquire(b));
        assert!(!pool.acquire(c));
        assert_eq!(pool.free(), Some(0));

        assert!(pool.release(a));
        assert!(!pool.release(a));
        assert!(pool.acquire(c));
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_unbounded_pool() {
        let mut pool = SlotPool::new(None);
        for _ in 0..100 {
            assert!(pool.acquire(Uuid::new_v4()));
        }
        assert!(pool.has_free());
        assert_eq!(pool.free(), None);
        assert_eq!(pool.in_use(), 100);
    }

    #[test]
    fn test_zero_capacity_admits_nothing() {
        let mut pool = SlotPool::new(Some(0));
        assert!(!pool.has_free());
        assert!(!pool.acquire(Uuid::new_v4()));
    }
}
