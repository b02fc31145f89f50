//! 基础设施模块
//!
//! 包含与目标主机通信的传输实现，不依赖连接层逻辑：
//! - transport: 传输接口与错误类型
//! - config: 各传输的连接描述
//! - local: 本地执行
//! - ssh: SSH 远程执行
//! - winrm: WinRM 远程执行
//! - powershell: PowerShell 命令编码

pub mod config;
pub mod local;
pub mod powershell;
pub mod ssh;
pub mod transport;
pub mod winrm;

// 重新导出常用类型
pub use config::{LocalhostConfig, SshConfig, WinRmConfig};
pub use local::LocalTransport;
pub use ssh::SshTransport;
pub use transport::{Transport, TransportError};
pub use winrm::WinRmTransport;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
