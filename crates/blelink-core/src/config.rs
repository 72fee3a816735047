//! Provider 配置和持久化
//!
//! 协议标识（目标名称、服务与特征 UUID）是编译期常量，不在这里配置。

use log::{debug, warn};

use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认扫描时长（秒）
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// 每个扫描周期的时长
    pub scan_duration_secs: u64,
    /// 使用第几个主机蓝牙适配器
    pub adapter_index: usize,
    /// 默认日志级别
    pub log_level: LogLevel,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
            adapter_index: 0,
            log_level: LogLevel::Info,
        }
    }
}

impl ProviderSettings {
    /// 配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blelink")
            .join("settings.toml")
    }

    /// 加载设置（文件不存在或无法解析时使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("blelink-test-{}-{}", std::process::id(), name))
            .join("settings.toml")
    }

    #[test]
    fn test_default_settings() {
        let settings = ProviderSettings::default();
        assert_eq!(settings.scan_duration(), Duration::from_secs(10));
        assert_eq!(settings.adapter_index, 0);
        assert_eq!(settings.log_level, LogLevel::Info);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let settings = ProviderSettings {
            scan_duration_secs: 4,
            adapter_index: 1,
            log_level: LogLevel::Debug,
        };
        settings.save_to(&path).unwrap();

        assert_eq!(ProviderSettings::load_from(&path), settings);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = temp_path("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "scan_duration_secs = 3\n").unwrap();

        let settings = ProviderSettings::load_from(&path);
        assert_eq!(settings.scan_duration_secs, 3);
        assert_eq!(settings.adapter_index, 0);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let path = temp_path("invalid");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "scan_duration_secs = \"soon\"").unwrap();

        assert_eq!(ProviderSettings::load_from(&path), ProviderSettings::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let path = temp_path("missing");
        assert_eq!(ProviderSettings::load_from(&path), ProviderSettings::default());
    }
}
