//! 连接模块
//!
//! 将 SSH、WinRM、本地执行统一为一个连接句柄。
//!
//! ## 模块结构
//! - `handle` - 连接句柄
//! - `factory` - 传输工厂
//! - `resolver` - 目标系统识别
//! - `elevation` - 提权策略
//! - `params` - 命令模板参数
//! - `runner` - 命令执行接口
//! - `error` - 错误类型定义

pub mod elevation;
pub mod error;
pub mod factory;
pub mod handle;
pub mod params;
pub mod resolver;
pub mod runner;

#[cfg(test)]
mod mock_transport;

// 重新导出常用类型
pub use elevation::Elevation;
pub use error::{ConnectionError, ErrorKind};
pub use factory::{DefaultTransportFactory, TransportFactory};
pub use handle::Connection;
pub use params::{group_params, sprintf, Param};
pub use resolver::OsFamily;
pub use runner::Runner;
