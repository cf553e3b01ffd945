//! Scheduling primitives named in spec.md §5: `parallel_for_each`,
//! `parallel_for_range`, and `parallel_sort`, backed by a single
//! process-wide `rayon::ThreadPool`.
//!
//! None of the core passes are cooperative (spec.md §5): a task runs to
//! completion without awaiting, so a synchronous work-stealing pool is
//! the right tool here instead of an async runtime.

use once_cell::sync::OnceCell;
use rayon::prelude::*;
use rayon::ThreadPool;

static POOL: OnceCell<ThreadPool> = OnceCell::new();

/// Initializes the global thread pool. Subsequent calls are no-ops;
/// the first caller's thread count wins, matching a process-wide singleton.
pub fn init_pool(num_threads: Option<usize>) {
    POOL.get_or_init(|| {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = num_threads {
            builder = builder.num_threads(n.max(1));
        }
        builder
            .thread_name(|i| format!("cold-worker-{i}"))
            .build()
            .expect("failed to build the linker's thread pool")
    });
}

fn pool() -> &'static ThreadPool {
    POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("cold-worker-{i}"))
            .build()
            .expect("failed to build the linker's thread pool")
    })
}

/// Runs `f` over every item of `items` in parallel on the global pool.
pub fn parallel_for_each<T, F>(items: &[T], f: F)
where
    T: Sync,
    F: Fn(&T) + Sync + Send,
{
    pool().install(|| {
        items.par_iter().for_each(|item| f(item));
    });
}

/// Runs `f` over every item of `items` in parallel, granting mutable access
/// to each item independently (disjoint borrows via `par_iter_mut`).
pub fn parallel_for_each_mut<T, F>(items: &mut [T], f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync + Send,
{
    pool().install(|| {
        items.par_iter_mut().for_each(|item| f(item));
    });
}

/// Runs `f(i)` for every `i` in `start..end` in parallel on the global pool.
pub fn parallel_for_range<F>(start: i64, end: i64, f: F)
where
    F: Fn(i64) + Sync + Send,
{
    if start >= end {
        return;
    }
    pool().install(|| {
        (start..end).into_par_iter().for_each(|i| f(i));
    });
}

/// Sorts `items` in parallel using `rayon`'s merge-sort, on the global pool.
pub fn parallel_sort<T, K, F>(items: &mut [T], key: F)
where
    T: Send,
    K: Ord,
    F: Fn(&T) -> K + Sync + Send,
{
    pool().install(|| {
        items.par_sort_by(|a, b| key(a).cmp(&key(b)));
    });
}

/// Runs every closure in `tasks` to completion, possibly concurrently. Used
/// where passes fork into a small, fixed number of independent sub-passes
/// (e.g. relaxation and thunk planning can proceed once symbol demand bits
/// are frozen).
pub fn parallel_invoke<F1, F2>(f1: F1, f2: F2)
where
    F1: FnOnce() + Send,
    F2: FnOnce() + Send,
{
    pool().install(|| rayon::join(f1, f2));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn for_each_visits_every_item() {
        let items: Vec<i32> = (0..1000).collect();
        let sum = AtomicUsize::new(0);
        parallel_for_each(&items, |x| {
            sum.fetch_add(*x as usize, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), (0..1000).sum::<i32>() as usize);
    }

    #[test]
    fn sort_is_stable_by_key() {
        let mut items = vec![(3, 'a'), (1, 'b'), (2, 'c'), (1, 'd')];
        parallel_sort(&mut items, |x| x.0);
        assert_eq!(items[0].0, 1);
        assert_eq!(items.last().unwrap().0, 3);
    }

    #[test]
    fn for_range_covers_all_indices() {
        let seen = std::sync::Mutex::new(vec![false; 100]);
        parallel_for_range(0, 100, |i| {
            seen.lock().unwrap()[i as usize] = true;
        });
        assert!(seen.lock().unwrap().iter().all(|&b| b));
    }
}
