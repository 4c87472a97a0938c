//! Thread budget
//!
//! Splits a core budget across the jobs of one batch.
//!
//! | mode | jobs vs cores | per-job share | pool parallelism |
//! |------|---------------|---------------|------------------|
//! | Performance | jobs >= cores | 1 | cores |
//! | Performance | jobs < cores | floor(cores/jobs), +1 for the first cores % jobs | cores |
//! | Low RAM | any | cores | 1 |

use crate::config::MultithreadingMode;

/// Share returned for an index outside the burst pool.
pub const FALLBACK_THREADS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBudget {
    total: usize,
    per_job: usize,
    burst: Vec<usize>,
    parallelism: usize,
}

impl ThreadBudget {
    pub fn new(mode: MultithreadingMode, jobs: usize, cores: usize) -> Self {
        let cores = cores.max(1);
        let budget = match mode {
            MultithreadingMode::Performance => Self {
                total: cores,
                per_job: 1,
                burst: burst_pool(jobs, cores),
                parallelism: cores,
            },
            MultithreadingMode::LowRam => Self {
                total: cores,
                per_job: cores,
                burst: Vec::new(),
                parallelism: 1,
            },
        };
        tracing::debug!(
            ?mode,
            jobs,
            cores,
            per_job = budget.per_job,
            burst = ?budget.burst,
            "Thread budget configured"
        );
        budget
    }

    /// Threads for the job at `index` (submission order). Never fails.
    pub fn threads_for(&self, index: usize) -> usize {
        if self.burst.is_empty() {
            return self.per_job;
        }
        match self.burst.get(index) {
            Some(&n) => n,
            None => {
                tracing::error!(index, len = self.burst.len(), "Job index outside burst pool");
                FALLBACK_THREADS
            }
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn burst(&self) -> &[usize] {
        &self.burst
    }
}

/// Spreads `cores` over `workers` when there are fewer workers than cores.
///
/// `(3, 6) -> [2, 2, 2]`, `(3, 5) -> [2, 2, 1]`, `(2, 5) -> [3, 2]`,
/// `(5, 5) -> []`.
pub fn burst_pool(workers: usize, cores: usize) -> Vec<usize> {
    if workers == 0 || cores == 0 || workers >= cores {
        return Vec::new();
    }
    let base = cores / workers;
    let extra = cores % workers;
    (0..workers).map(|i| base + usize::from(i < extra)).collect()
}

pub fn available_cores() -> usize {
    num_cpus::get().max(1)
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_many_jobs_get_one_core(cores in 1usize..128, extra in 0usize..64) {
            let jobs = cores + extra;
            let b = ThreadBudget::new(MultithreadingMode::Performance, jobs, cores);
            prop_assert!((0..jobs).all(|i| b.threads_for(i) == 1));
            // At most `parallelism` jobs run at once.
            prop_assert!(b.parallelism() * b.threads_for(0) <= cores);
        }

        #[test]
        fn prop_burst_pool_sums_to_cores(jobs in 1usize..64, cores in 2usize..256) {
            prop_assume!(jobs < cores);
            let pool = burst_pool(jobs, cores);
            let base = cores / jobs;
            let extra = cores % jobs;

            prop_assert_eq!(pool.len(), jobs);
            prop_assert_eq!(pool.iter().sum::<usize>(), cores);
            prop_assert!(pool.iter().all(|&n| n == base || n == base + 1));
            prop_assert_eq!(pool.iter().filter(|&&n| n == base + 1).count(), extra);
            prop_assert!(pool[..extra].iter().all(|&n| n == base + 1));
        }

        #[test]
        fn prop_out_of_range_never_panics(jobs in 0usize..32, cores in 1usize..64, index in 0usize..1024) {
            let b = ThreadBudget::new(MultithreadingMode::Performance, jobs, cores);
            let n = b.threads_for(index);
            prop_assert!(n >= 1 && n <= cores);
        }
    }
}
