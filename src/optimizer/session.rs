// src/optimizer/session.rs

use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::Result;

/// State owned by a single optimizer invocation: deadline, work counters and
/// the worker pool. Dropped on every exit path, which releases the pool.
pub struct SolverSession {
    started: Instant,
    deadline: Instant,
    nodes: AtomicU64,
    iterations: AtomicU64,
    timed_out: AtomicBool,
    pool: rayon::ThreadPool,
}

impl SolverSession {
    pub fn new(budget: Duration, thread_count: usize) -> Result<Self> {
        let threads = if thread_count == 0 { num_cpus::get() } else { thread_count };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("regionalize-solver-{}", i))
            .build()?;
        let started = Instant::now();
        debug!("Solver session opened: budget {:?}, {} threads", budget, threads);
        Ok(Self {
            started,
            deadline: started + budget,
            nodes: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            timed_out: AtomicBool::new(false),
            pool,
        })
    }

    /// True once the wall-clock budget is spent. Sticky: later calls stay true.
    pub fn expired(&self) -> bool {
        if self.timed_out.load(Ordering::Relaxed) {
            return true;
        }
        if Instant::now() >= self.deadline {
            self.timed_out.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn count_node(&self) -> u64 {
        self.nodes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn count_iteration(&self) -> u64 {
        self.iterations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl Drop for SolverSession {
    fn drop(&mut self) {
        debug!(
            "Solver session closed after {:?}: {} nodes, {} iterations{}",
            self.started.elapsed(),
            self.nodes(),
            self.iterations(),
            if self.timed_out() { " (budget exhausted)" } else { "" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_budget() {
        let session = SolverSession::new(Duration::from_millis(5), 1).unwrap();
        assert!(!session.timed_out());
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.expired());
        assert!(session.timed_out());
    }

    #[test]
    fn counters_accumulate() {
        let session = SolverSession::new(Duration::from_secs(5), 2).unwrap();
        session.count_node();
        session.count_node();
        session.count_iteration();
        assert_eq!(session.nodes(), 2);
        assert_eq!(session.iterations(), 1);
        assert_eq!(session.install(|| 3 + 4), 7);
    }
}
