//! Broker configuration.
//!
//! Loading flow:
//! 1. Start with [`BrokerConfig::default()`]
//! 2. If a JSON file is given and exists, deep-merge it over the defaults
//! 3. Apply `STUBHUB_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// How a roster entry is matched against a stub name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatching {
    /// Display name equals the stub name.
    #[default]
    Exact,
    /// Stub name is a regular expression the whole display name must match.
    Pattern,
}

/// How the real application is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub program: String,
    /// Arguments; `{locator}` is replaced by the descriptor's launch locator.
    pub args: Vec<String>,
    /// Prepended to `args` when `verbose` is set.
    pub verbose_args: Vec<String>,
    pub verbose: bool,
    pub timeout_ms: Option<u64>,
    pub output_buffer_lines: usize,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            program: "javaws".to_string(),
            args: vec!["-Xnosplash".to_string(), "{locator}".to_string()],
            verbose_args: vec!["-verbose".to_string()],
            verbose: false,
            timeout_ms: None,
            output_buffer_lines: 64,
        }
    }
}

impl LaunchConfig {
    pub const LOCATOR_PLACEHOLDER: &'static str = "{locator}";

    /// Full argument list for `locator`.
    pub fn command_args(&self, locator: &str) -> Vec<String> {
        let verbose: &[String] = if self.verbose { &self.verbose_args } else { &[] };
        verbose
            .iter()
            .chain(&self.args)
            .map(|arg| arg.replace(Self::LOCATOR_PLACEHOLDER, locator))
            .collect()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// End-to-end self-test settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfTestConfig {
    pub stub_name: String,
    pub mtype: String,
    pub timeout_ms: u64,
}

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self {
            stub_name: "AppLauncherTester".to_string(),
            mtype: "stubhub.selftest".to_string(),
            timeout_ms: 120_000,
        }
    }
}

impl SelfTestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub catalog_path: PathBuf,
    /// Only these applications get a stub; `None` means all of them.
    pub selected_applications: Option<Vec<String>>,
    pub default_prelaunch_delay_ms: u64,
    pub await_poll_interval_ms: u64,
    pub name_matching: NameMatching,
    pub launch: LaunchConfig,
    pub self_test: SelfTestConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("applications.json"),
            selected_applications: None,
            default_prelaunch_delay_ms: 0,
            await_poll_interval_ms: 100,
            name_matching: NameMatching::Exact,
            launch: LaunchConfig::default(),
            self_test: SelfTestConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn default_prelaunch_delay(&self) -> Duration {
        Duration::from_millis(self.default_prelaunch_delay_ms)
    }

    pub fn await_poll_interval(&self) -> Duration {
        Duration::from_millis(self.await_poll_interval_ms)
    }

    /// Load from `path` (if any) with environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults deep-merged with `path`; a missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let defaults = serde_json::to_value(Self::default())?;
        let merged = if path.exists() {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        } else {
            debug!(?path, "config file not found, using defaults");
            defaults
        };
        Ok(serde_json::from_value(merged)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.launch.program.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "launch.program must not be empty".to_string(),
            ));
        }
        if self.await_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "await_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.self_test.stub_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "self_test.stub_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `STUBHUB_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(config: &mut BrokerConfig, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = read("STUBHUB_CATALOG") {
        config.catalog_path = PathBuf::from(v);
    }
    if let Some(v) = read("STUBHUB_PRELAUNCH_DELAY_MS") {
        match parse_u64_range(&v, 0, 600_000) {
            Some(ms) => config.default_prelaunch_delay_ms = ms,
            None => warn!(key = "STUBHUB_PRELAUNCH_DELAY_MS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("STUBHUB_LAUNCH_PROGRAM") {
        config.launch.program = v;
    }
    if let Some(v) = read("STUBHUB_LAUNCH_VERBOSE") {
        match parse_bool(&v) {
            Some(b) => config.launch.verbose = b,
            None => warn!(key = "STUBHUB_LAUNCH_VERBOSE", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("STUBHUB_LAUNCH_TIMEOUT_MS") {
        match parse_u64_range(&v, 1, 3_600_000) {
            Some(ms) => config.launch.timeout_ms = Some(ms),
            None => warn!(key = "STUBHUB_LAUNCH_TIMEOUT_MS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("STUBHUB_SELF_TEST_TIMEOUT_MS") {
        match parse_u64_range(&v, 1, 3_600_000) {
            Some(ms) => config.self_test.timeout_ms = ms,
            None => warn!(key = "STUBHUB_SELF_TEST_TIMEOUT_MS", value = %v, "invalid env var, ignoring"),
        }
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_launch_javaws_without_splash() {
        let config = BrokerConfig::default();
        assert_eq!(
            config.launch.command_args("http://host/app.jnlp"),
            vec!["-Xnosplash", "http://host/app.jnlp"]
        );
        assert_eq!(config.self_test.stub_name, "AppLauncherTester");
        assert_eq!(config.self_test.timeout(), Duration::from_secs(120));
        assert_eq!(config.await_poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn verbose_args_come_first() {
        let launch = LaunchConfig {
            verbose: true,
            ..LaunchConfig::default()
        };
        assert_eq!(
            launch.command_args("x.jnlp"),
            vec!["-verbose", "-Xnosplash", "x.jnlp"]
        );
    }

    #[test]
    fn deep_merge_keeps_unset_nested_keys() {
        let merged = deep_merge(
            json!({ "launch": { "program": "javaws", "verbose": false }, "n": 1 }),
            json!({ "launch": { "verbose": true }, "n": null }),
        );
        assert_eq!(
            merged,
            json!({ "launch": { "program": "javaws", "verbose": true }, "n": 1 })
        );
    }

    #[test]
    fn file_overrides_defaults_partially() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "default_prelaunch_delay_ms": 2500, "launch": {{ "program": "open" }} }}"#
        )
        .unwrap();

        let config = BrokerConfig::load_file(file.path()).unwrap();
        assert_eq!(config.default_prelaunch_delay(), Duration::from_millis(2500));
        assert_eq!(config.launch.program, "open");
        assert_eq!(config.launch.output_buffer_lines, 64);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BrokerConfig::load_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, BrokerConfig::default());
    }

    #[test]
    fn malformed_file_is_a_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = BrokerConfig::load_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STUBHUB_CATALOG", "/etc/stubhub/apps.json"),
            ("STUBHUB_PRELAUNCH_DELAY_MS", "not-a-number"),
            ("STUBHUB_LAUNCH_VERBOSE", "yes"),
            ("STUBHUB_LAUNCH_TIMEOUT_MS", "30000"),
        ]);
        let mut config = BrokerConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.catalog_path, PathBuf::from("/etc/stubhub/apps.json"));
        assert_eq!(config.default_prelaunch_delay_ms, 0);
        assert!(config.launch.verbose);
        assert_eq!(config.launch.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn empty_program_is_rejected() {
        let mut config = BrokerConfig::default();
        config.launch.program = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[rstest]
    #[case("true", Some(true))]
    #[case("OFF", Some(false))]
    #[case("1", Some(true))]
    #[case("maybe", None)]
    fn parses_bools(#[case] input: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_bool(input), expected);
    }

    #[test]
    fn name_matching_deserializes_snake_case() {
        let m: NameMatching = serde_json::from_value(json!("pattern")).unwrap();
        assert_eq!(m, NameMatching::Pattern);
    }
}
