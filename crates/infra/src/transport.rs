//! 传输层抽象
//!
//! 定义统一的传输接口，SSH、WinRM、本地执行三种实现都必须实现此 trait。
//!
//! ## 功能
//! - 定义 Transport trait 接口
//! - 定义 TransportError 错误类型

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use hostlink_core::ExecOptions;
use thiserror::Error;

/// 传输层错误类型
#[derive(Debug, Error)]
pub enum TransportError {
    /// 连接建立失败
    #[error("连接失败: {0}")]
    ConnectionFailed(String),

    /// 认证失败
    #[error("认证失败: {0}")]
    AuthFailed(String),

    /// 主机密钥验证失败
    #[error("主机密钥验证失败: {0}")]
    HostKeyVerificationFailed(String),

    /// 远程命令以非零状态退出
    #[error("命令退出码 {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// 文件传输失败
    #[error("文件传输失败: {0}")]
    TransferFailed(String),

    /// 传输尚未连接
    #[error("传输未连接")]
    NotConnected,

    /// 协议层错误（SOAP 响应异常等）
    #[error("协议错误: {0}")]
    Protocol(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl TransportError {
    /// 命令以指定退出码失败
    pub fn command_failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            exit_code,
            stderr: stderr.into(),
        }
    }
}

/// 传输接口
///
/// 实现方负责具体协议；连接层只通过此接口与目标交互，不检查实现内部。
/// `Display` 输出形如 `[ssh] 10.0.0.1:22`。
#[async_trait]
pub trait Transport: Send + Sync + fmt::Display {
    /// 建立连接
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// 断开连接，重复调用无副作用
    async fn disconnect(&mut self);

    /// 上传本地文件到目标路径
    async fn upload(
        &self,
        src: &Path,
        dst: &str,
        opts: &ExecOptions,
    ) -> Result<(), TransportError>;

    /// 目标是否为 Windows
    fn is_windows(&self) -> bool;

    /// 执行命令
    ///
    /// 仅在 `opts.capture_output` 为真时返回标准输出，否则返回空字符串。
    async fn exec(&self, cmd: &str, opts: &ExecOptions) -> Result<String, TransportError>;

    /// 交互式执行命令，本地标准输入输出与远程进程相连
    async fn exec_interactive(&self, cmd: &str) -> Result<(), TransportError>;

    /// 协议名称，如 "SSH"
    fn protocol(&self) -> &'static str;

    /// 目标地址
    fn address(&self) -> String;

    /// 传输是否自认为处于连接状态
    fn is_connected(&self) -> bool;
}
