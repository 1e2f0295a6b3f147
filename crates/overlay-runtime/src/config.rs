use crate::error::RuntimeError;
use overlay_utils::NativeAddress;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

pub const EVICTION_DELAY_ENV: &str = "OVERLAY_EVICTION_DELAY_MS";
pub const MODULE_BASE_ENV: &str = "OVERLAY_MODULE_BASE";
pub const LIBRARY_ENV: &str = "OVERLAY_LIBRARY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long an unreferenced wrapped handle stays cached.
    pub eviction_delay_ms: u64,
    /// Base for module-relative entry points.
    pub module_base: NativeAddress,
    /// Library whose exports back symbol resolution.
    pub library: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            eviction_delay_ms: 5000,
            module_base: NativeAddress::NULL,
            library: None,
        }
    }
}

impl RuntimeConfig {
    pub fn eviction_delay(&self) -> Duration {
        Duration::from_millis(self.eviction_delay_ms)
    }

    pub fn from_json(text: &str) -> Result<Self, RuntimeError> {
        serde_json::from_str(text).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Defaults overridden by any `OVERLAY_*` variables that are set.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, RuntimeError> {
        let mut config = Self::default();
        if let Some(delay) = var(EVICTION_DELAY_ENV) {
            config.eviction_delay_ms = delay.trim().parse().map_err(|_| {
                RuntimeError::Config(format!("{EVICTION_DELAY_ENV}: '{delay}' is not a number"))
            })?;
        }
        if let Some(base) = var(MODULE_BASE_ENV) {
            config.module_base = NativeAddress::parse(&base).ok_or_else(|| {
                RuntimeError::Config(format!("{MODULE_BASE_ENV}: '{base}' is not an address"))
            })?;
        }
        if let Some(library) = var(LIBRARY_ENV) {
            config.library = Some(PathBuf::from(library));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.eviction_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides() {
        let config = RuntimeConfig::from_vars(vars(&[
            (EVICTION_DELAY_ENV, "250"),
            (MODULE_BASE_ENV, "0x140000000"),
            (LIBRARY_ENV, "/opt/game/libgame.so"),
        ]))
        .unwrap();
        assert_eq!(config.eviction_delay_ms, 250);
        assert_eq!(config.module_base, NativeAddress(0x1_4000_0000));
        assert_eq!(config.library, Some(PathBuf::from("/opt/game/libgame.so")));
    }

    #[test]
    fn test_bad_values_are_reported() {
        assert!(matches!(
            RuntimeConfig::from_vars(vars(&[(EVICTION_DELAY_ENV, "soon")])),
            Err(RuntimeError::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_vars(vars(&[(MODULE_BASE_ENV, "0xZZ")])),
            Err(RuntimeError::Config(_))
        ));
    }

    #[test]
    fn test_json_with_partial_fields() {
        let config = RuntimeConfig::from_json(r#"{ "module_base": 4096 }"#).unwrap();
        assert_eq!(config.module_base, NativeAddress(0x1000));
        assert_eq!(config.eviction_delay_ms, 5000);
    }
}
