use crate::error::ReportCoordinatorError;
use kp_utils::parsers::parse_duration;
use kp_utils::serde::{deserialize_duration, serialize_duration};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long an upkeep stays blocked without any update to its blocking window.
pub const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(20 * 60);
/// How often expired cache entries are swept.
pub const DEFAULT_CACHE_CLEAN_INTERVAL: Duration = Duration::from_secs(30);
/// How long an accepted key is remembered, confirmed or not.
pub const DEFAULT_ACTIVE_KEY_RETENTION: Duration = Duration::from_secs(60 * 60);
/// Nominal delay between two reconciliation passes.
pub const DEFAULT_POLL_CADENCE: Duration = Duration::from_secs(1);

fn default_lockout_window() -> Duration {
    DEFAULT_LOCKOUT_WINDOW
}

fn default_cache_clean_interval() -> Duration {
    DEFAULT_CACHE_CLEAN_INTERVAL
}

fn default_active_key_retention() -> Duration {
    DEFAULT_ACTIVE_KEY_RETENTION
}

fn default_poll_cadence() -> Duration {
    DEFAULT_POLL_CADENCE
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCoordinatorConfig {
    #[serde(
        default = "default_lockout_window",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub lockout_window: Duration,

    #[serde(
        default = "default_cache_clean_interval",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub cache_clean_interval: Duration,

    #[serde(
        default = "default_active_key_retention",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub active_key_retention: Duration,

    #[serde(
        default = "default_poll_cadence",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_cadence: Duration,

    /// Confirmations a transmit log needs before it is acted upon. There is no safe
    /// default for this value, it depends on the reorg depth of the chain.
    pub min_confirmations: u64,
}

impl ReportCoordinatorConfig {
    /// Default timings with the given confirmation requirement.
    pub fn new(min_confirmations: u64) -> Self {
        Self {
            lockout_window: DEFAULT_LOCKOUT_WINDOW,
            cache_clean_interval: DEFAULT_CACHE_CLEAN_INTERVAL,
            active_key_retention: DEFAULT_ACTIVE_KEY_RETENTION,
            poll_cadence: DEFAULT_POLL_CADENCE,
            min_confirmations,
        }
    }

    pub fn validate(&self) -> Result<(), ReportCoordinatorError> {
        let durations = [
            ("lockout_window", self.lockout_window),
            ("cache_clean_interval", self.cache_clean_interval),
            ("active_key_retention", self.active_key_retention),
            ("poll_cadence", self.poll_cadence),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, duration)| duration.is_zero()) {
            return Err(ReportCoordinatorError::InvalidConfig(format!("{name} must be greater than zero")));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, clap::Args)]
pub struct ReportCoordinatorParams {
    /// Number of confirmations a perform or stale report log needs before the report
    /// coordinator acts on it.
    #[clap(env = "KEEPER_REPORT_MIN_CONFIRMATIONS", long, value_name = "BLOCKS")]
    pub report_min_confirmations: u64,

    /// How long an upkeep stays locked out without any new transmit information.
    #[clap(
        env = "KEEPER_REPORT_LOCKOUT_WINDOW",
        long,
        default_value = "20min",
        value_parser = parse_duration,
    )]
    pub report_lockout_window: Duration,

    /// Interval at which expired report coordinator entries are evicted.
    #[clap(
        env = "KEEPER_REPORT_CACHE_CLEAN_INTERVAL",
        long,
        default_value = "30s",
        value_parser = parse_duration,
    )]
    pub report_cache_clean_interval: Duration,

    /// How long accepted upkeep keys are remembered.
    #[clap(
        env = "KEEPER_REPORT_ACTIVE_KEY_RETENTION",
        long,
        default_value = "1h",
        value_parser = parse_duration,
    )]
    pub report_active_key_retention: Duration,

    /// Delay between two polls of the transmit logs.
    #[clap(
        env = "KEEPER_REPORT_POLL_CADENCE",
        long,
        default_value = "1s",
        value_parser = parse_duration,
    )]
    pub report_poll_cadence: Duration,
}

impl ReportCoordinatorParams {
    pub fn as_config(&self) -> ReportCoordinatorConfig {
        ReportCoordinatorConfig {
            lockout_window: self.report_lockout_window,
            cache_clean_interval: self.report_cache_clean_interval,
            active_key_retention: self.report_active_key_retention,
            poll_cadence: self.report_poll_cadence,
            min_confirmations: self.report_min_confirmations,
        }
    }
}
