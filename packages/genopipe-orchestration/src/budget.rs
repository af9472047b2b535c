use serde::{Deserialize, Serialize};
use tracing::warn;

/// Process-wide core allocation, computed once before any stage runs and
/// passed read-only into every command template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub pool_size: usize,
    pub total_cores: usize,
    pub cores_per_worker: usize,
    /// Set when the core count could not satisfy the pool size.
    pub warning: Option<String>,
}

impl ResourceBudget {
    /// Divide `total_cores` evenly across `pool_size` workers, flooring at
    /// one core per worker.
    pub fn compute(pool_size: usize, total_cores: usize) -> Self {
        let pool_size = pool_size.max(1);
        let total_cores = total_cores.max(1);

        let (cores_per_worker, warning) = if total_cores < pool_size {
            let msg = format!(
                "total cores ({total_cores}) below worker pool size ({pool_size}); \
                 allocating 1 core per worker"
            );
            warn!("{msg}");
            (1, Some(msg))
        } else {
            (total_cores / pool_size, None)
        };

        Self {
            pool_size,
            total_cores,
            cores_per_worker,
            warning,
        }
    }

    /// Budget sized from the machine's logical core count.
    pub fn detect(pool_size: usize) -> Self {
        Self::compute(pool_size, num_cpus::get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        let budget = ResourceBudget::compute(4, 18);
        assert_eq!(budget.cores_per_worker, 4);
        assert!(budget.warning.is_none());
    }

    #[test]
    fn test_undersized_core_count_floors_at_one() {
        let budget = ResourceBudget::compute(4, 3);
        assert_eq!(budget.cores_per_worker, 1);
        assert!(budget.warning.is_some());
    }

    #[test]
    fn test_exact_split() {
        let budget = ResourceBudget::compute(4, 4);
        assert_eq!(budget.cores_per_worker, 1);
        assert!(budget.warning.is_none());
    }

    #[test]
    fn test_zero_pool_is_clamped() {
        let budget = ResourceBudget::compute(0, 8);
        assert_eq!(budget.pool_size, 1);
        assert_eq!(budget.cores_per_worker, 8);
    }
}
