//! 连接配置
//!
//! 一组互斥的传输描述，按固定优先级选出实际使用的传输。
//!
//! ## 功能
//! - `ConnectionConfig`：YAML 中的 `winRM` / `ssh` / `localhost` 描述
//! - `TransportConfig`：选中的传输描述
//! - 从 YAML 加载主机列表

use std::fmt;
use std::path::Path;

use hostlink_infra::local::{LOCAL_ADDRESS, LOCAL_PROTOCOL};
use hostlink_infra::ssh::SSH_PROTOCOL;
use hostlink_infra::winrm::WINRM_PROTOCOL;
use hostlink_infra::{LocalhostConfig, SshConfig, WinRmConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML 解析失败: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// 选中的传输
// ============================================================================

/// 选中的传输描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    WinRm(WinRmConfig),
    Localhost(LocalhostConfig),
    Ssh(SshConfig),
}

impl TransportConfig {
    pub fn protocol(&self) -> &'static str {
        match self {
            Self::WinRm(_) => WINRM_PROTOCOL,
            Self::Localhost(_) => LOCAL_PROTOCOL,
            Self::Ssh(_) => SSH_PROTOCOL,
        }
    }

    pub fn address(&self) -> String {
        match self {
            Self::WinRm(config) => config.address.clone(),
            Self::Localhost(_) => LOCAL_ADDRESS.to_string(),
            Self::Ssh(config) => config.address.clone(),
        }
    }

    /// 未连接时根据描述推断目标是否为 Windows
    pub fn is_windows_hint(&self) -> bool {
        match self {
            Self::WinRm(_) => true,
            Self::Localhost(_) => cfg!(windows),
            Self::Ssh(_) => false,
        }
    }

    pub fn apply_defaults(&mut self) {
        match self {
            Self::WinRm(config) => config.apply_defaults(),
            Self::Localhost(config) => config.apply_defaults(),
            Self::Ssh(config) => config.apply_defaults(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::WinRm(config) => config.validate(),
            Self::Localhost(config) => config.validate(),
            Self::Ssh(config) => config.validate(),
        }
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.protocol(), self.address())
    }
}

// ============================================================================
// 连接配置
// ============================================================================

/// 连接配置
///
/// 三种描述按约定互斥；同时配置多个时按 WinRM > Localhost > SSH 取第一个。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(rename = "winRM", default, skip_serializing_if = "Option::is_none")]
    pub winrm: Option<WinRmConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localhost: Option<LocalhostConfig>,
}

impl ConnectionConfig {
    pub fn ssh(config: SshConfig) -> Self {
        Self {
            ssh: Some(config),
            ..Default::default()
        }
    }

    pub fn winrm(config: WinRmConfig) -> Self {
        Self {
            winrm: Some(config),
            ..Default::default()
        }
    }

    pub fn localhost() -> Self {
        Self {
            localhost: Some(LocalhostConfig::default()),
            ..Default::default()
        }
    }

    /// 按优先级选择传输，均未配置时使用本地执行
    pub fn select_transport(&self) -> TransportConfig {
        if let Some(config) = &self.winrm {
            return TransportConfig::WinRm(config.clone());
        }
        if let Some(config) = &self.localhost {
            return TransportConfig::Localhost(config.clone());
        }
        if let Some(config) = &self.ssh {
            return TransportConfig::Ssh(config.clone());
        }
        TransportConfig::Localhost(LocalhostConfig::default())
    }

    /// 解析单个连接配置
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

// ============================================================================
// 主机列表
// ============================================================================

/// 主机列表中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    #[serde(default)]
    pub connection: ConnectionConfig,
}

#[derive(Debug, Deserialize)]
struct HostsDocument {
    #[serde(default)]
    hosts: Vec<HostEntry>,
}

/// 解析 `hosts:` 列表
pub fn load_hosts(yaml: &str) -> Result<Vec<ConnectionConfig>, ConfigError> {
    let document: HostsDocument = serde_yaml::from_str(yaml)?;
    Ok(document
        .hosts
        .into_iter()
        .map(|entry| entry.connection)
        .collect())
}

/// 从文件加载 `hosts:` 列表
pub fn load_hosts_file(path: impl AsRef<Path>) -> Result<Vec<ConnectionConfig>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_hosts(&content)
}
