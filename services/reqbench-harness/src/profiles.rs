//! Built-in scenario presets

use reqbench_core::{DatasetSize, HarnessError, HarnessResult, OpClass, Scenario, WorkloadShape};
use std::time::Duration;

/// Preset names with a one-line description, in listing order.
pub const PRESETS: &[(&str, &str)] = &[
    ("crud-smoke", "Create, read, update and delete epics one at a time"),
    ("read-heavy", "80/20 read/write mix over a medium dataset"),
    ("write-heavy", "20/80 read/write mix"),
    ("balanced", "50/50 read/write mix"),
    ("sustained", "Search and list traffic for a fixed duration"),
    ("burst", "Steady reads with periodic 30-request bursts"),
    ("duplicate-relationship", "The same relationship posted twice"),
];

const READS: [OpClass; 5] = [
    OpClass::ListEpics,
    OpClass::GetEpic,
    OpClass::ListRequirements,
    OpClass::GetRequirement,
    OpClass::ListUserStories,
];

const WRITES: [OpClass; 3] = [
    OpClass::CreateEpic,
    OpClass::PatchRequirement,
    OpClass::CreateComment,
];

fn ratio(read_ratio: f64) -> WorkloadShape {
    WorkloadShape::ReadWriteRatio {
        read_ratio,
        reads: READS.to_vec(),
        writes: WRITES.to_vec(),
    }
}

/// Resolves a preset by name.
pub fn preset(name: &str) -> HarnessResult<Scenario> {
    let scenario = match name {
        "crud-smoke" => Scenario::new(
            name,
            DatasetSize::Small,
            WorkloadShape::FixedMix {
                ops: vec![
                    OpClass::CreateEpic,
                    OpClass::GetEpic,
                    OpClass::UpdateEpic,
                    OpClass::DeleteEpic,
                ],
            },
        )
        .with_concurrency(1)
        .with_requests(20),

        "read-heavy" => Scenario::new(name, DatasetSize::Medium, ratio(0.8))
            .with_concurrency(15)
            .with_requests(500),

        "write-heavy" => Scenario::new(name, DatasetSize::Small, ratio(0.2))
            .with_concurrency(10)
            .with_requests(300),

        "balanced" => Scenario::new(name, DatasetSize::Small, ratio(0.5))
            .with_concurrency(10)
            .with_requests(300),

        "sustained" => Scenario::new(
            name,
            DatasetSize::Small,
            WorkloadShape::Sustained {
                ops: vec![
                    OpClass::SearchKeyword,
                    OpClass::SearchSuggestions,
                    OpClass::ListEpics,
                    OpClass::ListRequirements,
                ],
            },
        )
        .with_concurrency(20)
        .with_duration(Duration::from_secs(5)),

        "burst" => Scenario::new(
            name,
            DatasetSize::Small,
            WorkloadShape::BurstOverlay {
                steady: vec![OpClass::ListEpics, OpClass::GetEpic, OpClass::ListRequirements],
                burst_ops: vec![
                    OpClass::GetRequirement,
                    OpClass::ListComments,
                    OpClass::SearchKeyword,
                ],
                burst_size: 30,
                burst_delay: Duration::from_secs(1),
            },
        )
        .with_concurrency(5)
        .with_duration(Duration::from_secs(8)),

        "duplicate-relationship" => Scenario::new(
            name,
            DatasetSize::Small,
            WorkloadShape::FixedMix {
                ops: vec![OpClass::CreateRelationship],
            },
        )
        .with_concurrency(1)
        .with_requests(2),

        other => {
            let known: Vec<&str> = PRESETS.iter().map(|(name, _)| *name).collect();
            return Err(HarnessError::config(format!(
                "unknown preset `{other}` (known: {})",
                known.join(", ")
            )));
        }
    };

    scenario.validate()?;
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_preset_resolves() {
        for (name, _) in PRESETS {
            let scenario = preset(name).unwrap();
            assert_eq!(scenario.name, *name);
        }
    }

    #[test]
    fn test_unknown_preset_lists_known_names() {
        let err = preset("nope").unwrap_err();
        assert!(err.to_string().contains("crud-smoke"));
    }

    #[test]
    fn test_ratio_presets_are_count_driven() {
        for name in ["read-heavy", "write-heavy", "balanced"] {
            let scenario = preset(name).unwrap();
            assert!(!scenario.workload.is_duration_based());
            assert!(scenario.request_count > 0);
        }
    }
}
