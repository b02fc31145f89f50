//! 连接句柄
//!
//! 持有一组传输描述与至多一个活动传输，负责建立会话并对外提供命令执行与文件上传。
//!
//! ## 功能
//! - 构造时选择传输、补全默认值并校验
//! - 连接流程：传输握手 → 识别系统 → 探测提权方式
//! - 命令执行、模板命令、交互式执行、文件上传
//! - 按已解析的提权方式改写命令
//!
//! ## 使用示例
//! ```ignore
//! use hostlink::{Connection, ConnectionConfig, SshConfig};
//!
//! let mut conn = Connection::new(ConnectionConfig::ssh(SshConfig::new("10.0.0.1")))?;
//! conn.connect().await?;
//! let kernel = conn.exec_output("uname -r", &[]).await?;
//! conn.disconnect().await;
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hostlink_core::{ExecOption, ExecOptions, OsRelease};
use hostlink_infra::Transport;

use super::elevation::Elevation;
use super::error::ConnectionError;
use super::factory::{DefaultTransportFactory, TransportFactory};
use super::params::{group_params, sprintf, Param};
use super::resolver;
use super::runner::Runner;
use crate::config::{ConnectionConfig, TransportConfig};

/// 连接句柄
pub struct Connection {
    config: ConnectionConfig,
    selected: TransportConfig,
    factory: Arc<dyn TransportFactory>,
    client: Option<Box<dyn Transport>>,
    os_release: Option<OsRelease>,
    elevation: Option<Elevation>,
}

impl Connection {
    /// 使用真实传输创建连接
    pub fn new(config: ConnectionConfig) -> Result<Self, ConnectionError> {
        Self::with_factory(config, Arc::new(DefaultTransportFactory))
    }

    /// 使用指定的传输工厂创建连接
    pub fn with_factory(
        config: ConnectionConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, ConnectionError> {
        let mut selected = config.select_transport();
        selected.apply_defaults();
        selected
            .validate()
            .map_err(ConnectionError::ValidationFailed)?;

        tracing::debug!("[Connection] 选择传输: {}", selected);

        Ok(Self {
            config,
            selected,
            factory,
            client: None,
            os_release: None,
            elevation: None,
        })
    }

    // ========================================================================
    // 访问器
    // ========================================================================

    /// 构造时使用的传输描述
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// 选中并补全默认值后的传输描述
    pub fn selected(&self) -> &TransportConfig {
        &self.selected
    }

    pub fn protocol(&self) -> &'static str {
        match &self.client {
            Some(client) => client.protocol(),
            None => self.selected.protocol(),
        }
    }

    pub fn address(&self) -> String {
        match &self.client {
            Some(client) => client.address(),
            None => self.selected.address(),
        }
    }

    /// 已识别的系统信息，断开后仍保留
    pub fn os_release(&self) -> Option<&OsRelease> {
        self.os_release.as_ref()
    }

    /// 已解析的提权方式
    pub fn elevation(&self) -> Option<Elevation> {
        self.elevation
    }

    /// 存在传输实例且传输自认为在线
    pub fn is_connected(&self) -> bool {
        self.client
            .as_ref()
            .map(|client| client.is_connected())
            .unwrap_or(false)
    }

    /// 目标是否为 Windows
    ///
    /// 未连接时根据选中的描述推断，不创建传输。
    pub fn is_windows(&self) -> bool {
        match &self.client {
            Some(client) if client.is_connected() => client.is_windows(),
            _ => self.selected.is_windows_hint(),
        }
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 建立连接
    ///
    /// 握手失败时丢弃传输实例，下次调用重新创建。系统信息只在首次连接时识别；
    /// 提权探测失败不影响连接结果。
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.client.is_none() {
            self.client = Some(self.factory.create(&self.selected));
        }

        if let Some(client) = self.client.as_mut() {
            tracing::info!("[Connection] 正在连接: {}", client);
            if let Err(e) = client.connect().await {
                tracing::warn!("[Connection] 连接失败 {}: {}", client, e);
                self.client = None;
                return Err(ConnectionError::ConnectFailed(e));
            }
        }

        if self.os_release.is_none() {
            let release = resolver::resolve(&*self).await?;
            tracing::info!("[Connection] {} 系统: {}", self, release);
            tracing::debug!("[Connection] {} 系统详情: {}", self, release.to_value());
            self.os_release = Some(release);
        }

        let windows = self
            .os_release
            .as_ref()
            .map(|release| release.is_windows())
            .unwrap_or(false)
            || self.is_windows();
        self.elevation = Elevation::probe(&*self, windows).await;
        match self.elevation {
            Some(elevation) => tracing::debug!("[Connection] {} 提权方式: {}", self, elevation),
            None => tracing::debug!("[Connection] {} 未找到可用的提权方式", self),
        }

        tracing::info!("[Connection] 已连接: {}", self);
        Ok(())
    }

    /// 断开连接，重复调用无副作用
    pub async fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.disconnect().await;
            tracing::info!("[Connection] 已断开: {}", client);
        }
        self.elevation = None;
    }

    // ========================================================================
    // 命令执行
    // ========================================================================

    fn live_client(&self) -> Result<&dyn Transport, ConnectionError> {
        match &self.client {
            Some(client) if client.is_connected() => Ok(client.as_ref()),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    async fn run(&self, cmd: &str, opts: ExecOptions) -> Result<String, ConnectionError> {
        let client = self.live_client()?;
        let cmd = if opts.sudo {
            self.sudo(cmd)?
        } else {
            cmd.to_string()
        };
        client
            .exec(&cmd, &opts)
            .await
            .map_err(ConnectionError::CommandFailed)
    }

    /// 执行命令
    pub async fn exec(&self, cmd: &str, opts: &[ExecOption]) -> Result<(), ConnectionError> {
        self.run(cmd, opts.iter().collect()).await.map(|_| ())
    }

    /// 执行命令并返回去除首尾空白的标准输出
    pub async fn exec_output(
        &self,
        cmd: &str,
        opts: &[ExecOption],
    ) -> Result<String, ConnectionError> {
        let mut opts: ExecOptions = opts.iter().collect();
        opts.capture_output = true;
        let output = self.run(cmd, opts).await?;
        Ok(output.trim().to_string())
    }

    /// 按模板执行命令，参数中的执行选项与格式化参数自动拆分
    pub async fn execf(&self, template: &str, params: Vec<Param>) -> Result<(), ConnectionError> {
        let (opts, args) = group_params(params);
        self.exec(&sprintf(template, &args), &opts).await
    }

    /// 按模板执行命令并返回输出
    pub async fn exec_outputf(
        &self,
        template: &str,
        params: Vec<Param>,
    ) -> Result<String, ConnectionError> {
        let (opts, args) = group_params(params);
        self.exec_output(&sprintf(template, &args), &opts).await
    }

    /// 交互式执行，命令为空时打开登录 shell
    pub async fn exec_interactive(&self, cmd: &str) -> Result<(), ConnectionError> {
        let client = self.live_client()?;
        client
            .exec_interactive(cmd)
            .await
            .map_err(ConnectionError::CommandFailed)
    }

    /// 上传本地文件
    pub async fn upload(
        &self,
        src: impl AsRef<Path>,
        dst: &str,
        opts: &[ExecOption],
    ) -> Result<(), ConnectionError> {
        let client = self.live_client()?;
        let opts: ExecOptions = opts.iter().collect();
        client
            .upload(src.as_ref(), dst, &opts)
            .await
            .map_err(ConnectionError::UploadFailed)
    }

    /// 按已解析的提权方式改写命令
    pub fn sudo(&self, cmd: &str) -> Result<String, ConnectionError> {
        self.elevation
            .map(|elevation| elevation.format(cmd))
            .ok_or(ConnectionError::SudoRequired)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client {
            Some(client) => write!(f, "{}", client),
            None => write!(f, "{}", self.selected),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("selected", &self.selected)
            .field("connected", &self.is_connected())
            .field("os_release", &self.os_release)
            .field("elevation", &self.elevation)
            .finish()
    }
}

#[async_trait]
impl Runner for Connection {
    fn is_windows(&self) -> bool {
        Connection::is_windows(self)
    }

    async fn exec(&self, cmd: &str, opts: &[ExecOption]) -> Result<(), ConnectionError> {
        Connection::exec(self, cmd, opts).await
    }

    async fn exec_output(&self, cmd: &str, opts: &[ExecOption]) -> Result<String, ConnectionError> {
        Connection::exec_output(self, cmd, opts).await
    }
}
