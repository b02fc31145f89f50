//! 传输描述配置
//!
//! 每种传输一个描述结构，字段名与 YAML 配置保持一致。
//!
//! ## 功能
//! - serde 反序列化时填充默认值
//! - `apply_defaults` 为代码构造的描述补齐默认值
//! - `validate` 校验必填字段

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 默认 SSH 端口
pub const DEFAULT_SSH_PORT: u16 = 22;

/// 默认 SSH 用户
pub const DEFAULT_SSH_USER: &str = "root";

/// 默认 SSH 连接超时（秒）
pub const DEFAULT_SSH_CONNECT_TIMEOUT: u64 = 10;

/// 默认 WinRM HTTP 端口
pub const DEFAULT_WINRM_PORT: u16 = 5985;

/// 默认 WinRM HTTPS 端口
pub const DEFAULT_WINRM_HTTPS_PORT: u16 = 5986;

/// 默认 WinRM 用户
pub const DEFAULT_WINRM_USER: &str = "Administrator";

/// 默认 WinRM 请求超时（秒）
pub const DEFAULT_WINRM_TIMEOUT: u64 = 60;

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_ssh_connect_timeout() -> u64 {
    DEFAULT_SSH_CONNECT_TIMEOUT
}

fn default_winrm_user() -> String {
    DEFAULT_WINRM_USER.to_string()
}

fn default_winrm_timeout() -> u64 {
    DEFAULT_WINRM_TIMEOUT
}

fn default_true() -> bool {
    true
}

// ============================================================================
// SSH
// ============================================================================

/// SSH 连接描述
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    /// 主机名或 IP 地址
    pub address: String,
    /// 用户名
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// 端口
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// 私钥文件路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// 密码（不序列化）
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// TCP 连接超时（秒）
    #[serde(default = "default_ssh_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl SshConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: default_ssh_user(),
            port: DEFAULT_SSH_PORT,
            key_path: None,
            password: None,
            connect_timeout_secs: DEFAULT_SSH_CONNECT_TIMEOUT,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_key_path(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn apply_defaults(&mut self) {
        if self.user.is_empty() {
            self.user = default_ssh_user();
        }
        if self.port == 0 {
            self.port = DEFAULT_SSH_PORT;
        }
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = DEFAULT_SSH_CONNECT_TIMEOUT;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.address.trim().is_empty() {
            return Err("ssh: 地址不能为空".to_string());
        }
        if self.port == 0 {
            return Err("ssh: 端口不能为 0".to_string());
        }
        if self.user.is_empty() {
            return Err("ssh: 用户名不能为空".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("key_path", &self.key_path)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

// ============================================================================
// WinRM
// ============================================================================

/// WinRM 连接描述
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinRmConfig {
    /// 主机名或 IP 地址
    pub address: String,
    /// 用户名
    #[serde(default = "default_winrm_user")]
    pub user: String,
    /// 端口，0 表示按 `use_https` 取默认值
    #[serde(default)]
    pub port: u16,
    /// 密码（不序列化）
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// 使用 HTTPS
    #[serde(default, rename = "useHTTPS")]
    pub use_https: bool,
    /// 跳过证书校验
    #[serde(default)]
    pub insecure: bool,
    /// 单次请求超时（秒）
    #[serde(default = "default_winrm_timeout")]
    pub timeout_secs: u64,
}

impl WinRmConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: default_winrm_user(),
            port: 0,
            password: None,
            use_https: false,
            insecure: false,
            timeout_secs: DEFAULT_WINRM_TIMEOUT,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    pub fn apply_defaults(&mut self) {
        if self.user.is_empty() {
            self.user = default_winrm_user();
        }
        if self.port == 0 {
            self.port = if self.use_https {
                DEFAULT_WINRM_HTTPS_PORT
            } else {
                DEFAULT_WINRM_PORT
            };
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = DEFAULT_WINRM_TIMEOUT;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.address.trim().is_empty() {
            return Err("winRM: 地址不能为空".to_string());
        }
        if self.port == 0 {
            return Err("winRM: 端口不能为 0".to_string());
        }
        if self.user.is_empty() {
            return Err("winRM: 用户名不能为空".to_string());
        }
        Ok(())
    }

    /// WS-Management 端点 URL
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{}://{}:{}/wsman", scheme, self.address, self.port)
    }
}

impl fmt::Debug for WinRmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WinRmConfig")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("use_https", &self.use_https)
            .field("insecure", &self.insecure)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ============================================================================
// Localhost
// ============================================================================

/// 本地执行描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalhostConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LocalhostConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl LocalhostConfig {
    pub fn apply_defaults(&mut self) {}

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Err("localhost: 未启用".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_defaults() {
        let mut config = SshConfig::new("10.0.0.1").with_user("").with_port(0);
        config.connect_timeout_secs = 0;
        config.apply_defaults();
        assert_eq!(config.user, "root");
        assert_eq!(config.port, 22);
        assert_eq!(config.connect_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ssh_empty_address_invalid() {
        let config = SshConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ssh_debug_hides_password() {
        let config = SshConfig::new("host").with_password("hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_winrm_port_follows_https() {
        let mut http = WinRmConfig::new("win01");
        http.apply_defaults();
        assert_eq!(http.port, DEFAULT_WINRM_PORT);
        assert_eq!(http.endpoint_url(), "http://win01:5985/wsman");

        let mut https = WinRmConfig::new("win01").with_https(true);
        https.apply_defaults();
        assert_eq!(https.port, DEFAULT_WINRM_HTTPS_PORT);
        assert_eq!(https.endpoint_url(), "https://win01:5986/wsman");
    }

    #[test]
    fn test_winrm_unset_port_invalid_before_defaults() {
        let config = WinRmConfig::new("win01");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_localhost_disabled_invalid() {
        assert!(LocalhostConfig::default().validate().is_ok());
        assert!(LocalhostConfig { enabled: false }.validate().is_err());
    }
}
