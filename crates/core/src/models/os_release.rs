//! 目标主机操作系统标识

use serde::{Deserialize, Serialize};
use std::fmt;

/// 操作系统标识
///
/// 连接建立后解析一次，之后只读。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    /// 简短标识，如 "ubuntu"、"windows"、"darwin"
    pub id: String,
    /// 系统家族提示，如 "debian"
    pub id_like: String,
    /// 版本字符串
    pub version: String,
    /// 可读名称
    pub name: String,
}

impl OsRelease {
    pub fn new(
        id: impl Into<String>,
        id_like: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            id_like: id_like.into(),
            version: version.into(),
            name: name.into(),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.id == "windows"
    }

    /// 转换为 JSON 值（用于日志）
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::json!({}))
    }
}

impl fmt::Display for OsRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{} {}", self.id, self.version)
        } else {
            write!(f, "{}", self.name)
        }
    }
}
