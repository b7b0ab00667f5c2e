use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::collab::SettingsOracle;
use crate::error::{Error, Result};

/// Default batch ceiling: a margin below a 64 KiB transport frame.
pub const DEFAULT_BATCH_CEILING: usize = 60 * 1024;
pub const DEFAULT_MAX_DEPTH: usize = 256;
pub const DEFAULT_MAX_CONTAINER_LEN: usize = 4 * 1024 * 1024;

/// What to do with a host field that cannot be bound to the layout.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BindPolicy {
    /// Any unbound field fails the bind.
    #[default]
    Strict,
    /// Unbound fields are skipped with a warning and keep their default.
    Lenient,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    /// A saved memory image file.
    #[default]
    Image,
    /// A running process on this machine.
    Live,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum aggregate payload of one batched read
    pub batch_ceiling: usize,
    /// Maximum owning-pointer recursion depth
    pub max_depth: usize,
    /// Containers claiming more elements are treated as corrupt
    pub max_container_len: usize,
    pub policy: BindPolicy,
    pub transport: Transport,
    /// Optional snapshot deadline in milliseconds
    pub deadline_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_ceiling: DEFAULT_BATCH_CEILING,
            max_depth: DEFAULT_MAX_DEPTH,
            max_container_len: DEFAULT_MAX_CONTAINER_LEN,
            policy: BindPolicy::default(),
            transport: Transport::default(),
            deadline_ms: None,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load from a TOML file whose `[snapshot]` table holds the settings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            snapshot: EngineConfig,
        }
        let content = fs::read_to_string(path)?;
        let document: Document = toml::from_str(&content)?;
        document.snapshot.validated()
    }

    /// Read settings under `snapshot.*` from an oracle; absent keys keep
    /// their defaults.
    pub fn from_oracle(oracle: &dyn SettingsOracle) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(n) = read_count(oracle, "snapshot.batch_ceiling")? {
            builder = builder.batch_ceiling(n);
        }
        if let Some(n) = read_count(oracle, "snapshot.max_depth")? {
            builder = builder.max_depth(n);
        }
        if let Some(n) = read_count(oracle, "snapshot.max_container_len")? {
            builder = builder.max_container_len(n);
        }
        if let Some(strict) = oracle.get_bool("snapshot.strict") {
            builder = builder.policy(if strict {
                BindPolicy::Strict
            } else {
                BindPolicy::Lenient
            });
        }
        if let Some(text) = oracle.get_text("snapshot.policy") {
            builder = builder.policy(text.parse().map_err(|_| {
                Error::InvalidConfig(format!("unknown binding policy '{}'", text))
            })?);
        }
        if let Some(text) = oracle.get_text("snapshot.transport") {
            builder = builder.transport(text.parse().map_err(|_| {
                Error::InvalidConfig(format!("unknown transport '{}'", text))
            })?);
        }
        if let Some(n) = read_count(oracle, "snapshot.deadline_ms")? {
            builder = builder.deadline_ms(n as u64);
        }
        builder.build()
    }

    fn validated(self) -> Result<Self> {
        if self.batch_ceiling == 0 {
            return Err(Error::InvalidConfig(
                "batch_ceiling must be positive".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(Error::InvalidConfig("max_depth must be positive".to_string()));
        }
        Ok(self)
    }
}

fn read_count(oracle: &dyn SettingsOracle, key: &str) -> Result<Option<usize>> {
    match oracle.get_number(key) {
        None => Ok(None),
        Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= usize::MAX as f64 => Ok(Some(n as usize)),
        Some(n) => Err(Error::InvalidConfig(format!(
            "{} must be a non-negative integer, got {}",
            key, n
        ))),
    }
}

/// Builder for EngineConfig
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    batch_ceiling: Option<usize>,
    max_depth: Option<usize>,
    max_container_len: Option<usize>,
    policy: Option<BindPolicy>,
    transport: Option<Transport>,
    deadline_ms: Option<u64>,
}

impl EngineConfigBuilder {
    pub fn batch_ceiling(mut self, bytes: usize) -> Self {
        self.batch_ceiling = Some(bytes);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn max_container_len(mut self, len: usize) -> Self {
        self.max_container_len = Some(len);
        self
    }

    pub fn policy(mut self, policy: BindPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn deadline_ms(mut self, millis: u64) -> Self {
        self.deadline_ms = Some(millis);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<EngineConfig> {
        let default = EngineConfig::default();
        EngineConfig {
            batch_ceiling: self.batch_ceiling.unwrap_or(default.batch_ceiling),
            max_depth: self.max_depth.unwrap_or(default.max_depth),
            max_container_len: self.max_container_len.unwrap_or(default.max_container_len),
            policy: self.policy.unwrap_or(default.policy),
            transport: self.transport.unwrap_or(default.transport),
            deadline_ms: self.deadline_ms.or(default.deadline_ms),
        }
        .validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::TomlSettings;
    use tempfile::TempDir;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfig::builder().build().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.batch_ceiling, 60 * 1024);
        assert_eq!(config.policy, BindPolicy::Strict);
    }

    #[test]
    fn test_builder_rejects_zero_ceiling() {
        assert!(EngineConfig::builder().batch_ceiling(0).build().is_err());
    }

    #[test]
    fn test_from_oracle() {
        let settings = TomlSettings::parse(
            r#"
[snapshot]
batch_ceiling = 4096
strict = false
transport = "live"
deadline_ms = 1500
"#,
        )
        .unwrap();
        let config = EngineConfig::from_oracle(&settings).unwrap();
        assert_eq!(config.batch_ceiling, 4096);
        assert_eq!(config.policy, BindPolicy::Lenient);
        assert_eq!(config.transport, Transport::Live);
        assert_eq!(config.deadline_ms, Some(1500));
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_from_oracle_rejects_bad_values() {
        let settings = TomlSettings::parse("[snapshot]\nbatch_ceiling = -1\n").unwrap();
        assert!(EngineConfig::from_oracle(&settings).is_err());

        let settings = TomlSettings::parse("[snapshot]\ntransport = \"carrier-pigeon\"\n").unwrap();
        assert!(matches!(
            EngineConfig::from_oracle(&settings),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memsnap.toml");
        fs::write(
            &path,
            "[snapshot]\nbatch_ceiling = 1024\npolicy = \"lenient\"\n",
        )
        .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.batch_ceiling, 1024);
        assert_eq!(config.policy, BindPolicy::Lenient);
        assert_eq!(config.max_container_len, DEFAULT_MAX_CONTAINER_LEN);
    }
}
