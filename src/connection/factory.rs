//! 传输工厂
//!
//! 根据选中的传输描述创建传输实例。连接层只依赖此 trait，测试时替换为脚本化实现。

use hostlink_infra::{LocalTransport, SshTransport, Transport, WinRmTransport};

use crate::config::TransportConfig;

/// 传输工厂
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &TransportConfig) -> Box<dyn Transport>;
}

/// 默认工厂：创建真实传输
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &TransportConfig) -> Box<dyn Transport> {
        tracing::debug!("[TransportFactory] 创建传输: {}", config);
        match config {
            TransportConfig::WinRm(config) => Box::new(WinRmTransport::new(config.clone())),
            TransportConfig::Localhost(config) => Box::new(LocalTransport::new(config.clone())),
            TransportConfig::Ssh(config) => Box::new(SshTransport::new(config.clone())),
        }
    }
}
