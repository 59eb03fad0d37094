use parking_lot::RwLock;
use reqbench_core::{Stage, TimeoutsConfig};
use std::collections::BTreeMap;
use std::time::Duration;

/// Stage → timeout map. Read on every call, written only when a scenario
/// applies overrides.
#[derive(Debug)]
pub struct StageTimeouts {
    budgets: RwLock<BTreeMap<Stage, Duration>>,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::from_config(&TimeoutsConfig::default())
    }
}

impl StageTimeouts {
    pub fn from_config(config: &TimeoutsConfig) -> Self {
        let budgets = Stage::ALL
            .into_iter()
            .map(|stage| (stage, config.for_stage(stage)))
            .collect();
        Self {
            budgets: RwLock::new(budgets),
        }
    }

    pub fn get(&self, stage: Stage) -> Duration {
        self.budgets
            .read()
            .get(&stage)
            .copied()
            .unwrap_or_else(|| stage.default_timeout())
    }

    pub fn set(&self, stage: Stage, timeout: Duration) {
        self.budgets.write().insert(stage, timeout);
    }

    pub fn apply(&self, overrides: &BTreeMap<Stage, Duration>) {
        let mut budgets = self.budgets.write();
        for (stage, timeout) in overrides {
            budgets.insert(*stage, *timeout);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<Stage, Duration> {
        self.budgets.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_override() {
        let timeouts = StageTimeouts::default();
        assert_eq!(timeouts.get(Stage::Cleanup), Duration::from_secs(10));

        let mut overrides = BTreeMap::new();
        overrides.insert(Stage::Http, Duration::from_millis(1));
        timeouts.apply(&overrides);

        assert_eq!(timeouts.get(Stage::Http), Duration::from_millis(1));
        assert_eq!(timeouts.get(Stage::Database), Duration::from_secs(60));
        assert_eq!(timeouts.snapshot().len(), Stage::ALL.len());
    }
}
