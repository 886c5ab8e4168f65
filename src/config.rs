//! Runtime configuration

use serde::{Deserialize, Serialize};

use crate::driver::DeviceOrdinal;

/// Environment variable selecting the device ordinal
pub const ENV_DEVICE: &str = "NVJIT_DEVICE";
/// Environment variable selecting the target architecture (e.g. `sm_80`)
pub const ENV_ARCH: &str = "NVJIT_ARCH";
/// Environment variable with whitespace-separated default compiler options
pub const ENV_OPTIONS: &str = "NVJIT_OPTIONS";
/// Environment variable naming programs whose source carries no name line
pub const ENV_PROGRAM_NAME: &str = "NVJIT_PROGRAM_NAME";

/// Settings applied to every compilation and to device selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Device opened at startup
    pub device: DeviceOrdinal,
    /// Target architecture passed as `--gpu-architecture`, if set
    pub arch: Option<String>,
    /// Options prepended to every compilation
    pub options: Vec<String>,
    /// Name used when the source has no leading name line
    pub default_program_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device: 0,
            arch: None,
            options: Vec::new(),
            default_program_name: "program".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `NVJIT_*` environment variables
    ///
    /// Malformed values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `NVJIT_*` key
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(device) = lookup(ENV_DEVICE) {
            match device.trim().parse() {
                Ok(ordinal) => config.device = ordinal,
                Err(_) => tracing::warn!(value = %device, "ignoring malformed {ENV_DEVICE}"),
            }
        }
        if let Some(arch) = lookup(ENV_ARCH).filter(|a| !a.trim().is_empty()) {
            config.arch = Some(arch.trim().to_string());
        }
        if let Some(options) = lookup(ENV_OPTIONS) {
            config.options = options.split_whitespace().map(str::to_string).collect();
        }
        if let Some(name) = lookup(ENV_PROGRAM_NAME).filter(|n| !n.trim().is_empty()) {
            config.default_program_name = name.trim().to_string();
        }
        config
    }

    /// Set the device ordinal
    #[must_use]
    pub fn with_device(mut self, device: DeviceOrdinal) -> Self {
        self.device = device;
        self
    }

    /// Set the target architecture
    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    /// Add a default compiler option
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Set the fallback program name
    #[must_use]
    pub fn with_default_program_name(mut self, name: impl Into<String>) -> Self {
        self.default_program_name = name.into();
        self
    }

    /// Options for one compilation: defaults, architecture, then `extra`
    #[must_use]
    pub fn compile_options<S: AsRef<str>>(&self, extra: &[S]) -> Vec<String> {
        let mut options = self.options.clone();
        if let Some(arch) = &self.arch {
            options.push(format!("--gpu-architecture={arch}"));
        }
        options.extend(extra.iter().map(|o| o.as_ref().to_string()));
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.device, 0);
        assert!(config.arch.is_none());
        assert!(config.options.is_empty());
        assert_eq!(config.default_program_name, "program");
    }

    #[test]
    fn test_from_lookup() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("NVJIT_DEVICE", "1"),
            ("NVJIT_ARCH", "sm_80"),
            ("NVJIT_OPTIONS", "-std=c++17  -lineinfo"),
            ("NVJIT_PROGRAM_NAME", "jit"),
        ]));
        assert_eq!(config.device, 1);
        assert_eq!(config.arch.as_deref(), Some("sm_80"));
        assert_eq!(config.options, vec!["-std=c++17", "-lineinfo"]);
        assert_eq!(config.default_program_name, "jit");
    }

    #[test]
    fn test_from_lookup_ignores_malformed() {
        let pairs = [("NVJIT_DEVICE", "gpu0"), ("NVJIT_ARCH", " ")];
        let config = RuntimeConfig::from_lookup(lookup(&pairs));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_compile_options_order() {
        let config = RuntimeConfig::default()
            .with_option("-std=c++14")
            .with_arch("sm_75");
        assert_eq!(
            config.compile_options(&["-lcudadevrt"]),
            vec!["-std=c++14", "--gpu-architecture=sm_75", "-lcudadevrt"]
        );
    }

    #[test]
    fn test_serde_partial() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"device": 2}"#).unwrap();
        assert_eq!(config.device, 2);
        assert_eq!(config.default_program_name, "program");
    }
}
