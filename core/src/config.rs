use crate::types::Amount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Upper bound on worker connections materializing one obligation.
    /// Values above 1 only take effect on file-backed stores.
    pub parallelism: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Daily sweep time, UTC.
    pub sweep_hour: u32,
    pub sweep_minute: u32,
    /// Fire once immediately on the first scheduler tick.
    #[serde(default)]
    pub run_on_start: bool,
    /// How often the runner loop checks whether a sweep is due.
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Open the current week's collection for every church on each sweep.
    pub auto_open_weekly: bool,
    pub default_weekly_amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_path: String,
    pub busy_timeout_ms: u64,
    pub sweep: SweepConfig,
    pub schedule: ScheduleConfig,
    pub collections: CollectionConfig,
}

impl EngineConfig {
    /// Load from a JSON file (see data/engine.json).
    /// In tests, use EngineConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.sweep.parallelism == 0 {
            anyhow::bail!("sweep.parallelism must be at least 1");
        }
        if self.schedule.sweep_hour > 23 || self.schedule.sweep_minute > 59 {
            anyhow::bail!(
                "schedule time {:02}:{:02} is not a valid time of day",
                self.schedule.sweep_hour,
                self.schedule.sweep_minute
            );
        }
        if self.collections.default_weekly_amount < 0 {
            anyhow::bail!("collections.default_weekly_amount must not be negative");
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in tests.
    /// In-memory store, sequential sweeps, no automatic collections.
    pub fn default_test() -> Self {
        Self {
            database_path: ":memory:".into(),
            busy_timeout_ms: 5_000,
            sweep: SweepConfig { parallelism: 1 },
            schedule: ScheduleConfig {
                sweep_hour: 0,
                sweep_minute: 5,
                run_on_start: false,
                poll_interval_secs: 60,
            },
            collections: CollectionConfig {
                auto_open_weekly: false,
                default_weekly_amount: 10_000,
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "dues.db".into(),
            sweep: SweepConfig { parallelism: 4 },
            collections: CollectionConfig {
                auto_open_weekly: true,
                default_weekly_amount: 10_000,
            },
            ..Self::default_test()
        }
    }
}
