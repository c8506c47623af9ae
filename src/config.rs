use crate::error::{PipelineError, Result};
use crate::policy::OverflowPolicy;
use crate::rate_limit::RateLimit;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serde helpers storing a `Duration` as whole milliseconds
pub(crate) mod millis {
    use serde::{ser, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).map_err(ser::Error::custom)?;
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Like [`millis`] for optional durations
pub(crate) mod opt_millis {
    use serde::{ser, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                let ms = u64::try_from(duration.as_millis()).map_err(ser::Error::custom)?;
                serializer.serialize_some(&ms)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

/// Overflow policy as named in external configuration; the capacity travels separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyKind {
    #[default]
    Unbounded,
    DropLatest,
    DropOldest,
    LatestOnly,
    ErrorOnOverflow,
}

/// Everything a caller supplies to describe one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub overflow_policy: PolicyKind,
    /// Required by the bounded policies, ignored otherwise
    pub capacity: Option<usize>,
    /// Number of items to emit; `None` emits until cancelled
    pub emit_count: Option<u64>,
    #[serde(rename = "emissionIntervalMs", with = "millis")]
    pub emission_interval: Duration,
    #[serde(rename = "processingDelayMs", with = "millis")]
    pub processing_delay: Duration,
    pub take_count: Option<u64>,
    pub window_size: Option<usize>,
    #[serde(rename = "sampleIntervalMs", with = "opt_millis")]
    pub sample_interval: Option<Duration>,
    pub rate_limit: Option<RateLimit>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            overflow_policy: PolicyKind::Unbounded,
            capacity: None,
            emit_count: None,
            emission_interval: Duration::from_millis(10),
            processing_delay: Duration::ZERO,
            take_count: None,
            window_size: None,
            sample_interval: None,
            rate_limit: None,
        }
    }
}

impl PipelineConfig {
    /// Parse a camelCase JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Combine the policy kind with its capacity
    pub fn overflow_policy(&self) -> Result<OverflowPolicy> {
        let capacity = || {
            self.capacity.ok_or_else(|| {
                PipelineError::ConfigError(format!(
                    "{:?} overflow policy requires a capacity",
                    self.overflow_policy
                ))
            })
        };
        let policy = match self.overflow_policy {
            PolicyKind::Unbounded => OverflowPolicy::Unbounded,
            PolicyKind::LatestOnly => OverflowPolicy::LatestOnly,
            PolicyKind::DropLatest => OverflowPolicy::DropLatest(capacity()?),
            PolicyKind::DropOldest => OverflowPolicy::DropOldest(capacity()?),
            PolicyKind::ErrorOnOverflow => OverflowPolicy::ErrorOnOverflow(capacity()?),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Store `policy` as kind plus capacity
    pub fn set_overflow_policy(&mut self, policy: OverflowPolicy) {
        let (kind, capacity) = match policy {
            OverflowPolicy::Unbounded => (PolicyKind::Unbounded, None),
            OverflowPolicy::LatestOnly => (PolicyKind::LatestOnly, None),
            OverflowPolicy::DropLatest(capacity) => (PolicyKind::DropLatest, Some(capacity)),
            OverflowPolicy::DropOldest(capacity) => (PolicyKind::DropOldest, Some(capacity)),
            OverflowPolicy::ErrorOnOverflow(capacity) => {
                (PolicyKind::ErrorOnOverflow, Some(capacity))
            }
        };
        self.overflow_policy = kind;
        self.capacity = capacity;
    }

    pub fn validate(&self) -> Result<()> {
        self.overflow_policy()?;
        if self.window_size == Some(0) {
            return Err(PipelineError::ConfigError(
                "window size must be at least 1".into(),
            ));
        }
        if self.sample_interval == Some(Duration::ZERO) {
            return Err(PipelineError::ConfigError(
                "sample interval must be non-zero".into(),
            ));
        }
        if let Some(limit) = &self.rate_limit {
            limit.validate()?;
        }
        Ok(())
    }
}
