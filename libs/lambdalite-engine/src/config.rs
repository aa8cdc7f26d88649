// Engine configuration: defaults, optional JSON file, environment overrides
use lambdalite_common::types::RuntimeSelector;
use lambdalite_common::{FaasError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_PATH_VAR: &str = "LAMBDALITE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root holding `{language}/Dockerfile` build recipes
    pub recipe_dir: PathBuf,
    /// Idle environments started per (language, runtime) at prewarm time
    pub pool_size: usize,
    /// Upper bound on idle environments kept per key
    pub max_idle: usize,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    /// Docker runtime names behind each selector
    pub standard_runtime: String,
    pub sandboxed_runtime: String,
    pub network_disabled: bool,
    /// Working directory inside execution containers
    pub work_dir: String,
    /// Host directory for cold-start staging; system temp dir when unset
    pub staging_dir: Option<PathBuf>,
    /// Top a pool key back up after one of its environments was discarded
    pub replenish_on_discard: bool,
    pub redis_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recipe_dir: PathBuf::from("dockerfiles"),
            pool_size: 2,
            max_idle: 2,
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            standard_runtime: "runc".to_string(),
            sandboxed_runtime: "runsc".to_string(),
            network_disabled: false,
            work_dir: "/app".to_string(),
            staging_dir: None,
            replenish_on_discard: true,
            redis_url: None,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| FaasError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        serde_json::from_str(&content)
            .map_err(|e| FaasError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Defaults, then `LAMBDALITE_CONFIG` if set, then individual env overrides
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("LAMBDALITE_RECIPE_DIR") {
            self.recipe_dir = PathBuf::from(dir);
        }
        if let Some(size) = parse_var(&lookup, "LAMBDALITE_POOL_SIZE")? {
            self.pool_size = size;
            self.max_idle = self.max_idle.max(size);
        }
        if let Some(max_idle) = parse_var(&lookup, "LAMBDALITE_MAX_IDLE")? {
            self.max_idle = max_idle;
        }
        if let Some(memory) = parse_var(&lookup, "LAMBDALITE_MEMORY_LIMIT_MB")? {
            self.memory_limit_mb = memory;
        }
        if let Some(cpu) = parse_var(&lookup, "LAMBDALITE_CPU_LIMIT")? {
            self.cpu_limit = cpu;
        }
        if let Some(runtime) = lookup("LAMBDALITE_STANDARD_RUNTIME") {
            self.standard_runtime = runtime;
        }
        if let Some(runtime) = lookup("LAMBDALITE_SANDBOXED_RUNTIME") {
            self.sandboxed_runtime = runtime;
        }
        if let Some(disabled) = parse_var(&lookup, "LAMBDALITE_NETWORK_DISABLED")? {
            self.network_disabled = disabled;
        }
        if let Some(dir) = lookup("LAMBDALITE_STAGING_DIR") {
            self.staging_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.redis_url = Some(url);
        }

        // NaN fails every comparison, so test for the valid range
        if !(self.cpu_limit > 0.0 && self.cpu_limit.is_finite()) {
            return Err(FaasError::Config(format!("cpu limit must be positive, got {}", self.cpu_limit)));
        }
        if self.memory_limit_mb == 0 {
            return Err(FaasError::Config("memory limit must be positive".to_string()));
        }
        Ok(())
    }

    /// Docker runtime name for a selector
    pub fn runtime_name(&self, selector: RuntimeSelector) -> &str {
        match selector {
            RuntimeSelector::Standard => &self.standard_runtime,
            RuntimeSelector::Sandboxed => &self.sandboxed_runtime,
        }
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| FaasError::Config(format!("invalid value for {}: {:?}", key, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.runtime_name(RuntimeSelector::Standard), "runc");
        assert_eq!(config.runtime_name(RuntimeSelector::Sandboxed), "runsc");
        assert_eq!(config.memory_limit_bytes(), 256 * 1024 * 1024);
        assert_eq!(config.nano_cpus(), 500_000_000);
        assert_eq!(config.recipe_dir, PathBuf::from("dockerfiles"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("LAMBDALITE_POOL_SIZE", "4"),
                ("LAMBDALITE_SANDBOXED_RUNTIME", "kata"),
                ("LAMBDALITE_NETWORK_DISABLED", "true"),
                ("REDIS_URL", "redis://cache:6379"),
            ]))
            .unwrap();

        assert_eq!(config.pool_size, 4);
        assert_eq!(config.max_idle, 4);
        assert_eq!(config.runtime_name(RuntimeSelector::Sandboxed), "kata");
        assert!(config.network_disabled);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("LAMBDALITE_CPU_LIMIT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, FaasError::Config(_)));

        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("LAMBDALITE_CPU_LIMIT", "0")]))
            .unwrap_err();
        assert!(matches!(err, FaasError::Config(_)));
    }

    #[test]
    fn test_non_finite_cpu_limit_rejected() {
        for raw in ["NaN", "inf", "-inf"] {
            let mut config = EngineConfig::default();
            let err = config
                .apply_overrides(lookup_from(&[("LAMBDALITE_CPU_LIMIT", raw)]))
                .unwrap_err();
            assert!(matches!(err, FaasError::Config(_)), "{} accepted", raw);
        }
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{ "pool_size": 1, "memory_limit_mb": 128 }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.memory_limit_mb, 128);
        assert_eq!(config.work_dir, "/app");
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/engine.json")).unwrap_err();
        assert!(matches!(err, FaasError::Config(_)));
    }
}
