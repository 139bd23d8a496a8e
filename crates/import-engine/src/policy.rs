//! Memory-driven batch sizing and pacing.

use std::time::Duration;

use lapse_common::{DelayTable, ImportConfig, MemoryLevel};
use serde::Serialize;

/// Batch size and fetch concurrency for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub concurrency: usize,
}

/// Maps a memory level to a [`BatchPlan`].
///
/// Plans shrink as pressure rises and always stay within
/// `min_batch..=max_batch` with at least one concurrent fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    min_batch: usize,
    max_batch: usize,
    max_concurrency: usize,
}

impl BatchPolicy {
    pub fn new(min_batch: usize, max_batch: usize, max_concurrency: usize) -> Self {
        let min_batch = min_batch.max(1);
        Self {
            min_batch,
            max_batch: max_batch.max(min_batch),
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(
            config.min_batch_size,
            config.max_batch_size,
            config.max_concurrency,
        )
    }

    pub fn plan(&self, level: MemoryLevel) -> BatchPlan {
        match level {
            MemoryLevel::Normal => BatchPlan {
                batch_size: self.max_batch,
                concurrency: self.max_concurrency,
            },
            MemoryLevel::Warning => BatchPlan {
                batch_size: self.max_batch.saturating_sub(1).max(self.min_batch),
                concurrency: self.max_concurrency.saturating_sub(1).max(1),
            },
            MemoryLevel::Critical => BatchPlan {
                batch_size: self.min_batch,
                concurrency: 1,
            },
        }
    }

    pub fn min_batch(&self) -> usize {
        self.min_batch
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }
}

/// Which pass a pacing delay applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingKind {
    Import,
    Upgrade,
}

/// Delay inserted after a run of successes at the given memory level.
pub fn pacing_delay(delays: &DelayTable, level: MemoryLevel, kind: PacingKind) -> Duration {
    let ms = match (kind, level) {
        (PacingKind::Import, MemoryLevel::Normal) => delays.normal_ms,
        (PacingKind::Import, MemoryLevel::Warning) => delays.warning_ms,
        (PacingKind::Import, MemoryLevel::Critical) => delays.critical_ms,
        (PacingKind::Upgrade, MemoryLevel::Normal) => delays.upgrade_normal_ms,
        (PacingKind::Upgrade, MemoryLevel::Warning) => delays.upgrade_warning_ms,
        (PacingKind::Upgrade, MemoryLevel::Critical) => delays.upgrade_critical_ms,
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LEVELS: [MemoryLevel; 3] = [
        MemoryLevel::Normal,
        MemoryLevel::Warning,
        MemoryLevel::Critical,
    ];

    #[test]
    fn test_default_plans() {
        let policy = BatchPolicy::from_config(&ImportConfig::default());
        assert_eq!(
            policy.plan(MemoryLevel::Normal),
            BatchPlan {
                batch_size: 5,
                concurrency: 3
            }
        );
        assert_eq!(
            policy.plan(MemoryLevel::Warning),
            BatchPlan {
                batch_size: 4,
                concurrency: 2
            }
        );
        assert_eq!(
            policy.plan(MemoryLevel::Critical),
            BatchPlan {
                batch_size: 1,
                concurrency: 1
            }
        );
    }

    #[test]
    fn test_default_delays() {
        let delays = DelayTable::default();
        assert_eq!(
            pacing_delay(&delays, MemoryLevel::Warning, PacingKind::Import),
            Duration::from_millis(500)
        );
        assert_eq!(
            pacing_delay(&delays, MemoryLevel::Critical, PacingKind::Upgrade),
            Duration::from_secs(2)
        );
    }

    proptest! {
        #[test]
        fn prop_plans_stay_in_bounds(min in 0usize..10, extra in 0usize..10, conc in 0usize..8) {
            let policy = BatchPolicy::new(min, min + extra, conc);
            for level in LEVELS {
                let plan = policy.plan(level);
                prop_assert!(plan.batch_size >= policy.min_batch());
                prop_assert!(plan.batch_size <= policy.max_batch());
                prop_assert!(plan.concurrency >= 1);
                prop_assert!(plan.concurrency <= conc.max(1));
            }
        }

        #[test]
        fn prop_plans_shrink_with_pressure(min in 1usize..10, extra in 0usize..10, conc in 1usize..8) {
            let policy = BatchPolicy::new(min, min + extra, conc);
            let normal = policy.plan(MemoryLevel::Normal);
            let warning = policy.plan(MemoryLevel::Warning);
            let critical = policy.plan(MemoryLevel::Critical);
            prop_assert!(critical.batch_size <= warning.batch_size);
            prop_assert!(warning.batch_size <= normal.batch_size);
            prop_assert!(critical.concurrency <= warning.concurrency);
            prop_assert!(warning.concurrency <= normal.concurrency);
        }
    }
}
