//! 客户端设置
//!
//! 设置以 JSON 保存在 `<config_dir>/gomoku-client/settings.json`，
//! 命令行参数可以覆盖文件中的值。

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{
    TransportType, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_SERVER_URL, MAX_SUBSCRIBERS_PER_SUBJECT,
    WS_SUBPROTOCOL,
};
use serde::{Deserialize, Serialize};

use crate::network::RpcConfig;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// EnvFilter 指令中使用的级别名
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// 本工作区各 crate 的 EnvFilter 指令
    pub fn directives(&self) -> Vec<String> {
        ["gomoku_client", "protocol"]
            .iter()
            .map(|target| format!("{}={}", target, self.as_directive()))
            .collect()
    }
}

/// 客户端设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    // === 网络设置 ===
    /// 服务器地址
    pub server_address: String,
    /// 传输协议
    pub transport: TransportType,
    /// WebSocket 子协议，None 表示不协商
    pub subprotocol: Option<String>,

    // === 调用设置 ===
    /// 调用默认超时（毫秒）
    pub call_timeout_ms: u64,
    /// 每个主题的订阅者上限
    pub max_subscribers_per_subject: usize,

    // === 高级设置 ===
    /// 日志级别
    pub log_level: LogLevel,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_URL.to_string(),
            transport: TransportType::default(),
            subprotocol: Some(WS_SUBPROTOCOL.to_string()),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            max_subscribers_per_subject: MAX_SUBSCRIBERS_PER_SUBJECT,
            log_level: LogLevel::default(),
        }
    }
}

impl ClientSettings {
    /// 获取设置文件路径
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("gomoku-client");
            path.push("settings.json");
            path
        })
    }

    /// 从默认位置加载设置，失败时使用默认设置
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            tracing::warn!("无法获取配置目录，使用默认设置");
            return Self::default();
        };

        if !path.exists() {
            tracing::info!("设置文件不存在，使用默认设置");
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(settings) => {
                tracing::info!("已加载设置: {:?}", path);
                settings
            }
            Err(e) => {
                tracing::warn!("{:#}，使用默认设置", e);
                Self::default()
            }
        }
    }

    /// 从指定文件加载设置
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取设置文件 {}", path.display()))?;
        let settings = serde_json::from_str(&content)
            .with_context(|| format!("设置文件格式无效 {}", path.display()))?;
        Ok(settings)
    }

    /// 保存设置到默认位置
    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path().context("无法获取配置目录")?;
        self.save_to(&path)
    }

    /// 保存设置到指定文件，必要时创建目录
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建配置目录 {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self).context("序列化设置失败")?;
        std::fs::write(path, content)
            .with_context(|| format!("写入设置文件失败 {}", path.display()))?;

        tracing::info!("设置已保存: {:?}", path);
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// 转换为关联引擎配置
    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig::new(self.server_address.clone())
            .with_call_timeout(self.call_timeout())
            .with_max_subscribers(self.max_subscribers_per_subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ClientSettings::default();
        assert_eq!(settings.server_address, "ws://localhost:8000");
        assert_eq!(settings.transport, TransportType::WebSocket);
        assert_eq!(settings.subprotocol.as_deref(), Some("rust-websocket"));
        assert_eq!(settings.call_timeout(), Duration::from_secs(120));
        assert_eq!(settings.log_level, LogLevel::Info);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = ClientSettings {
            server_address: "tcp://127.0.0.1:9000".to_string(),
            transport: TransportType::Tcp,
            subprotocol: None,
            call_timeout_ms: 500,
            max_subscribers_per_subject: 4,
            log_level: LogLevel::Debug,
        };
        settings.save_to(&path).unwrap();

        let loaded = ClientSettings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"call_timeout_ms": 1000}"#).unwrap();

        let loaded = ClientSettings::load_from(&path).unwrap();
        assert_eq!(loaded.call_timeout_ms, 1000);
        assert_eq!(loaded.server_address, DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(ClientSettings::load_from(&path).is_err());
        assert!(ClientSettings::load_from(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_rpc_config() {
        let settings = ClientSettings {
            call_timeout_ms: 250,
            max_subscribers_per_subject: 3,
            ..ClientSettings::default()
        };
        let config = settings.rpc_config();
        assert_eq!(config.server_address, DEFAULT_SERVER_URL);
        assert_eq!(config.call_timeout, Duration::from_millis(250));
        assert_eq!(config.max_subscribers_per_subject, 3);
    }

    #[test]
    fn test_log_level_directive() {
        assert_eq!(LogLevel::Trace.as_directive(), "trace");
        assert_eq!(LogLevel::default().as_directive(), "info");
        assert_eq!(
            LogLevel::Debug.directives(),
            vec!["gomoku_client=debug", "protocol=debug"]
        );
    }
}
