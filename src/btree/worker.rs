//! Optional fan-out for the bitset gather. Out of scope to provide a real
//! thread pool here; `SequentialWorkerPool` is the always-available
//! fallback, and any `rayon`-backed (or other) pool a caller wires in only
//! needs to satisfy this trait.

pub trait WorkerPool: Send + Sync {
    fn scoped_for_each<T: Send>(&self, items: Vec<T>, body: impl Fn(T) + Sync);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialWorkerPool;

impl WorkerPool for SequentialWorkerPool {
    fn scoped_for_each<T: Send>(&self, items: Vec<T>, body: impl Fn(T) + Sync) {
        for item in items {
            body(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sequential_pool_visits_every_item() {
        let pool = SequentialWorkerPool;
        let total = AtomicUsize::new(0);
        pool.scoped_for_each(vec![1, 2, 3, 4], |n| {
            total.fetch_add(n, Ordering::SeqCst);
        });
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }
}
