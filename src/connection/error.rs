//! 连接层错误类型
//!
//! ## 功能
//! - `ConnectionError`：连接层对外暴露的错误
//! - `ErrorKind`：不关心载荷时用于匹配的错误类别
//! - 序列化支持

use hostlink_infra::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConnected,
    CommandFailed,
    UploadFailed,
    SudoRequired,
    ValidationFailed,
}

/// 连接层错误
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// 没有可用的传输
    #[error("未连接")]
    NotConnected,

    /// 传输连接失败
    #[error("连接失败: {0}")]
    ConnectFailed(#[source] TransportError),

    /// 命令执行失败
    #[error("命令执行失败: {0}")]
    CommandFailed(#[source] TransportError),

    /// 文件上传失败
    #[error("文件上传失败: {0}")]
    UploadFailed(#[source] TransportError),

    /// 未解析到可用的提权方式
    #[error("用户不是管理员，且未配置免密提权")]
    SudoRequired,

    /// 连接描述校验失败
    #[error("配置无效: {0}")]
    ValidationFailed(String),
}

impl ConnectionError {
    /// 错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected | Self::ConnectFailed(_) => ErrorKind::NotConnected,
            Self::CommandFailed(_) => ErrorKind::CommandFailed,
            Self::UploadFailed(_) => ErrorKind::UploadFailed,
            Self::SudoRequired => ErrorKind::SudoRequired,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
        }
    }

    /// 远程命令的退出码（仅命令以非零状态退出时存在）
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed(TransportError::CommandFailed { exit_code, .. }) => {
                Some(*exit_code)
            }
            _ => None,
        }
    }
}

impl From<ConnectionError> for String {
    fn from(err: ConnectionError) -> Self {
        err.to_string()
    }
}

impl Serialize for ConnectionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
