//! Scenario descriptors and the TOML scenario-file loader.

use crate::error::{HarnessError, HarnessResult};
use crate::op::OpClass;
use crate::stage::{RetryPolicy, Stage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Named dataset profile seeded before the workload runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSize {
    Small,
    Medium,
    Large,
}

impl DatasetSize {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for DatasetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSize {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(HarnessError::config(format!("unknown dataset size `{other}`"))),
        }
    }
}

/// How requests are generated and dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadShape {
    /// Exactly `request_count` requests; slot `i` issues `ops[i mod K]`.
    FixedMix { ops: Vec<OpClass> },

    /// Slot `i` reads when `(i mod 100) / 100 < read_ratio`.
    ReadWriteRatio {
        read_ratio: f64,
        reads: Vec<OpClass>,
        writes: Vec<OpClass>,
    },

    /// Workers loop over a shuffled op set until the duration elapses.
    Sustained { ops: Vec<OpClass> },

    /// Sustained steady load plus periodic fan-out bursts.
    BurstOverlay {
        steady: Vec<OpClass>,
        burst_ops: Vec<OpClass>,
        burst_size: usize,
        burst_delay: Duration,
    },
}

impl WorkloadShape {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FixedMix { .. } => "fixed_mix",
            Self::ReadWriteRatio { .. } => "read_write_ratio",
            Self::Sustained { .. } => "sustained",
            Self::BurstOverlay { .. } => "burst_overlay",
        }
    }

    /// Duration-driven shapes ignore `request_count`.
    #[must_use]
    pub fn is_duration_based(&self) -> bool {
        matches!(self, Self::Sustained { .. } | Self::BurstOverlay { .. })
    }

    /// Every op class the workload may issue.
    #[must_use]
    pub fn operations(&self) -> Vec<OpClass> {
        match self {
            Self::FixedMix { ops } | Self::Sustained { ops } => ops.clone(),
            Self::ReadWriteRatio { reads, writes, .. } => {
                reads.iter().chain(writes.iter()).copied().collect()
            }
            Self::BurstOverlay {
                steady, burst_ops, ..
            } => steady.iter().chain(burst_ops.iter()).copied().collect(),
        }
    }
}

/// Identity the bearer token is minted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    /// Falls back to the seeded system user when absent.
    pub user_id: Option<Uuid>,
    pub username: String,
}

impl Default for AuthIdentity {
    fn default() -> Self {
        Self {
            user_id: None,
            username: "benchmark".to_string(),
        }
    }
}

/// Per-scenario stage timeout and retry overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReliabilityOverrides {
    pub timeouts: BTreeMap<Stage, Duration>,
    pub retry: Option<RetryPolicy>,
}

impl ReliabilityOverrides {
    #[must_use]
    pub fn with_timeout(mut self, stage: Stage, timeout: Duration) -> Self {
        self.timeouts.insert(stage, timeout);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// One complete benchmark run description.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub dataset_size: DatasetSize,
    pub workload: WorkloadShape,
    pub concurrency_target: usize,
    /// Required for sustained and burst workloads.
    pub duration: Option<Duration>,
    pub request_count: usize,
    pub auth_identity: AuthIdentity,
    pub reliability_overrides: ReliabilityOverrides,
    /// Seed for worker shuffles and generated payloads.
    pub seed: u64,
}

impl Scenario {
    #[must_use]
    pub fn new(name: impl Into<String>, dataset_size: DatasetSize, workload: WorkloadShape) -> Self {
        Self {
            name: name.into(),
            dataset_size,
            workload,
            concurrency_target: 1,
            duration: None,
            request_count: 0,
            auth_identity: AuthIdentity::default(),
            reliability_overrides: ReliabilityOverrides::default(),
            seed: 42,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency_target = concurrency;
        self
    }

    #[must_use]
    pub fn with_requests(mut self, count: usize) -> Self {
        self.request_count = count;
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: ReliabilityOverrides) -> Self {
        self.reliability_overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate the descriptor before any infrastructure is started.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.concurrency_target == 0 {
            return Err(HarnessError::config("concurrency_target must be >= 1"));
        }

        if self.workload.is_duration_based() && self.duration.is_none() {
            return Err(HarnessError::config(format!(
                "{} workload requires a duration",
                self.workload.name()
            )));
        }

        match &self.workload {
            WorkloadShape::FixedMix { ops } | WorkloadShape::Sustained { ops } => {
                if ops.is_empty() {
                    return Err(HarnessError::config("operation set must not be empty"));
                }
            }
            WorkloadShape::ReadWriteRatio {
                read_ratio,
                reads,
                writes,
            } => {
                if !(0.0..=1.0).contains(read_ratio) {
                    return Err(HarnessError::config("read_ratio must be within [0, 1]"));
                }
                if reads.is_empty() || writes.is_empty() {
                    return Err(HarnessError::config("read and write sets must not be empty"));
                }
                if let Some(op) = reads.iter().find(|op| !op.is_read()) {
                    return Err(HarnessError::config(format!("{op} is not a read operation")));
                }
                if let Some(op) = writes.iter().find(|op| op.is_read()) {
                    return Err(HarnessError::config(format!("{op} is not a write operation")));
                }
                let reads: HashSet<_> = reads.iter().collect();
                if writes.iter().any(|op| reads.contains(op)) {
                    return Err(HarnessError::config("read and write sets must be disjoint"));
                }
            }
            WorkloadShape::BurstOverlay {
                steady,
                burst_ops,
                burst_size,
                burst_delay,
            } => {
                if steady.is_empty() || burst_ops.is_empty() {
                    return Err(HarnessError::config("steady and burst sets must not be empty"));
                }
                if *burst_size == 0 || burst_delay.is_zero() {
                    return Err(HarnessError::config(
                        "burst_size and burst_delay must be > 0",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Load a scenario from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> HarnessResult<Self> {
        let file: ScenarioFile =
            toml::from_str(raw).map_err(|e| HarnessError::config(e.to_string()))?;
        let scenario = Scenario::try_from(file)?;
        scenario.validate()?;
        Ok(scenario)
    }
}

/// On-disk scenario layout; durations are milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioFile {
    pub name: String,
    #[serde(default = "default_dataset")]
    pub dataset_size: DatasetSize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub request_count: usize,
    pub duration_ms: Option<u64>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub workload: WorkloadFile,
    #[serde(default)]
    pub auth: Option<AuthIdentity>,
    /// Keyed by stage name, e.g. `http = 250`.
    #[serde(default)]
    pub timeouts_ms: BTreeMap<String, u64>,
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum WorkloadFile {
    FixedMix {
        ops: Vec<OpClass>,
    },
    ReadWriteRatio {
        read_ratio: f64,
        reads: Vec<OpClass>,
        writes: Vec<OpClass>,
    },
    Sustained {
        ops: Vec<OpClass>,
    },
    BurstOverlay {
        ops: Vec<OpClass>,
        burst_ops: Vec<OpClass>,
        burst_size: usize,
        burst_delay_ms: u64,
    },
}

fn default_dataset() -> DatasetSize {
    DatasetSize::Small
}

fn default_concurrency() -> usize {
    1
}

fn default_seed() -> u64 {
    42
}

impl From<WorkloadFile> for WorkloadShape {
    fn from(file: WorkloadFile) -> Self {
        match file {
            WorkloadFile::FixedMix { ops } => Self::FixedMix { ops },
            WorkloadFile::ReadWriteRatio {
                read_ratio,
                reads,
                writes,
            } => Self::ReadWriteRatio {
                read_ratio,
                reads,
                writes,
            },
            WorkloadFile::Sustained { ops } => Self::Sustained { ops },
            WorkloadFile::BurstOverlay {
                ops,
                burst_ops,
                burst_size,
                burst_delay_ms,
            } => Self::BurstOverlay {
                steady: ops,
                burst_ops,
                burst_size,
                burst_delay: Duration::from_millis(burst_delay_ms),
            },
        }
    }
}

impl TryFrom<ScenarioFile> for Scenario {
    type Error = HarnessError;

    fn try_from(file: ScenarioFile) -> Result<Self, Self::Error> {
        let mut timeouts = BTreeMap::new();
        for (stage, ms) in file.timeouts_ms {
            timeouts.insert(stage.parse::<Stage>()?, Duration::from_millis(ms));
        }

        Ok(Self {
            name: file.name,
            dataset_size: file.dataset_size,
            workload: file.workload.into(),
            concurrency_target: file.concurrency,
            duration: file.duration_ms.map(Duration::from_millis),
            request_count: file.request_count,
            auth_identity: file.auth.unwrap_or_default(),
            reliability_overrides: ReliabilityOverrides {
                timeouts,
                retry: file.retry,
            },
            seed: file.seed,
        })
    }
}
