//! hostlink
//!
//! 通过一个连接句柄在远程或本地主机上执行命令、上传文件，底层传输可以是 SSH、WinRM 或本地执行。
//!
//! ## 模块结构
//! - `config` - 连接配置与 YAML 加载
//! - `connection` - 连接句柄、系统识别、提权策略、命令模板

pub mod config;
pub mod connection;

// 重新导出常用类型
pub use config::{load_hosts, load_hosts_file, ConfigError, ConnectionConfig, TransportConfig};
pub use connection::{
    group_params, sprintf, Connection, ConnectionError, DefaultTransportFactory, Elevation,
    ErrorKind, OsFamily, Param, Runner, TransportFactory,
};
pub use hostlink_core::{init_logging, ExecOption, ExecOptions, LogConfig, OsRelease};
pub use hostlink_infra::{
    LocalhostConfig, SshConfig, Transport, TransportError, WinRmConfig,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
