//! Runner configuration.

use crate::error::{ClError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

/// Device class to select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Gpu,
    Cpu,
    Accelerator,
    Default,
    All,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Gpu => "gpu",
            DeviceKind::Cpu => "cpu",
            DeviceKind::Accelerator => "accelerator",
            DeviceKind::Default => "default",
            DeviceKind::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceKind {
    type Err = ClError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gpu" => Ok(DeviceKind::Gpu),
            "cpu" => Ok(DeviceKind::Cpu),
            "accelerator" => Ok(DeviceKind::Accelerator),
            "default" => Ok(DeviceKind::Default),
            "all" | "any" => Ok(DeviceKind::All),
            other => Err(ClError::Config(format!("unknown device type `{other}`"))),
        }
    }
}

/// Which platform and device a [`DeviceContext`](crate::DeviceContext) binds to.
///
/// The default is the first platform and its first GPU. There is no fallback:
/// if the selected device does not exist, acquisition fails.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSelection {
    /// Index into the platform list.
    #[serde(default)]
    pub platform_index: usize,

    /// Device class on that platform.
    #[serde(default)]
    pub device_type: DeviceKind,

    /// Index among the platform's devices of `device_type`.
    #[serde(default)]
    pub device_index: usize,
}

impl DeviceSelection {
    /// First platform, first GPU.
    pub fn first_gpu() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, index: usize) -> Self {
        self.platform_index = index;
        self
    }

    pub fn with_device_type(mut self, kind: DeviceKind) -> Self {
        self.device_type = kind;
        self
    }

    pub fn with_device(mut self, index: usize) -> Self {
        self.device_index = index;
        self
    }
}

/// Engine and device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Device selection strategy
    #[serde(default)]
    pub device: DeviceSelection,

    /// Options passed to the kernel compiler
    #[serde(default)]
    pub build_options: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelection::default(),
            build_options: String::new(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            ClError::Config(format!("failed to open {}: {}", path.display(), e))
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| {
            ClError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_selects_first_gpu() {
        let config = EngineConfig::default();
        assert_eq!(config.device, DeviceSelection::first_gpu());
        assert_eq!(config.device.platform_index, 0);
        assert_eq!(config.device.device_type, DeviceKind::Gpu);
        assert_eq!(config.device.device_index, 0);
        assert!(config.build_options.is_empty());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "device": {{ "device_type": "cpu", "device_index": 1 }}, "build_options": "-cl-fast-relaxed-math" }}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.device.platform_index, 0);
        assert_eq!(config.device.device_type, DeviceKind::Cpu);
        assert_eq!(config.device.device_index, 1);
        assert_eq!(config.build_options, "-cl-fast-relaxed-math");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ClError::Config(_)));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"device\": 3 }}").unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ClError::Config(_))
        ));
    }

    #[test]
    fn test_device_kind_parse() {
        assert_eq!("GPU".parse::<DeviceKind>().unwrap(), DeviceKind::Gpu);
        assert_eq!("any".parse::<DeviceKind>().unwrap(), DeviceKind::All);
        assert!("fpga".parse::<DeviceKind>().is_err());
        assert_eq!(DeviceKind::Accelerator.to_string(), "accelerator");
    }
}
