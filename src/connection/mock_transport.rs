//! 脚本化传输（仅测试）
//!
//! 按完整命令文本应答，记录收到的每条命令；未登记的命令以退出码 127 失败。

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hostlink_core::ExecOptions;
use hostlink_infra::{Transport, TransportError};
use parking_lot::Mutex;

use super::factory::TransportFactory;
use crate::config::TransportConfig;

#[derive(Default)]
struct MockState {
    responses: HashMap<String, Result<String, i32>>,
    commands: Vec<String>,
    stdin: Vec<Option<String>>,
    connect_failures: usize,
    windows: bool,
    fail_uploads: bool,
    uploads: Vec<(PathBuf, String)>,
    connects: usize,
    disconnects: usize,
}

/// 共享的应答脚本
#[derive(Clone, Default)]
pub struct MockScript(Arc<Mutex<MockState>>);

impl MockScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命令成功并输出 `stdout`
    pub fn respond(&self, cmd: impl Into<String>, stdout: impl Into<String>) -> &Self {
        self.0.lock().responses.insert(cmd.into(), Ok(stdout.into()));
        self
    }

    /// 命令以 `exit_code` 失败
    pub fn fail(&self, cmd: impl Into<String>, exit_code: i32) -> &Self {
        self.0.lock().responses.insert(cmd.into(), Err(exit_code));
        self
    }

    /// 接下来 `n` 次握手失败
    pub fn fail_connects(&self, n: usize) -> &Self {
        self.0.lock().connect_failures = n;
        self
    }

    pub fn windows(&self, windows: bool) -> &Self {
        self.0.lock().windows = windows;
        self
    }

    pub fn fail_uploads(&self) -> &Self {
        self.0.lock().fail_uploads = true;
        self
    }

    /// 按顺序收到的命令
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().commands.clone()
    }

    /// 每条命令附带的标准输入
    pub fn stdin(&self) -> Vec<Option<String>> {
        self.0.lock().stdin.clone()
    }

    pub fn count(&self, cmd: &str) -> usize {
        self.0.lock().commands.iter().filter(|c| *c == cmd).count()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.0.lock().uploads.clone()
    }

    pub fn connects(&self) -> usize {
        self.0.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.0.lock().disconnects
    }
}

/// 脚本化传输
pub struct MockTransport {
    script: MockScript,
    address: String,
    connected: bool,
}

impl MockTransport {
    pub fn new(script: MockScript, address: impl Into<String>) -> Self {
        Self {
            script,
            address: address.into(),
            connected: false,
        }
    }
}

impl fmt::Display for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[mock] {}", self.address)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.script.0.lock();
        state.connects += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransportError::ConnectionFailed("connection refused".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.script.0.lock().disconnects += 1;
        self.connected = false;
    }

    async fn upload(
        &self,
        src: &Path,
        dst: &str,
        _opts: &ExecOptions,
    ) -> Result<(), TransportError> {
        let mut state = self.script.0.lock();
        if state.fail_uploads {
            return Err(TransportError::TransferFailed("disk full".into()));
        }
        state.uploads.push((src.to_path_buf(), dst.to_string()));
        Ok(())
    }

    fn is_windows(&self) -> bool {
        self.script.0.lock().windows
    }

    async fn exec(&self, cmd: &str, opts: &ExecOptions) -> Result<String, TransportError> {
        let mut state = self.script.0.lock();
        state.commands.push(cmd.to_string());
        state.stdin.push(opts.stdin.clone());
        match state.responses.get(cmd) {
            Some(Ok(stdout)) if opts.capture_output => Ok(stdout.clone()),
            Some(Ok(_)) => Ok(String::new()),
            Some(Err(code)) => Err(TransportError::command_failed(*code, "failed")),
            None => Err(TransportError::command_failed(127, "command not found")),
        }
    }

    async fn exec_interactive(&self, cmd: &str) -> Result<(), TransportError> {
        self.script.0.lock().commands.push(cmd.to_string());
        Ok(())
    }

    fn protocol(&self) -> &'static str {
        "Mock"
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// 创建脚本化传输的工厂，记录创建次数
#[derive(Default)]
pub struct MockFactory {
    pub script: MockScript,
    created: AtomicUsize,
}

impl MockFactory {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            created: AtomicUsize::new(0),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, config: &TransportConfig) -> Box<dyn Transport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockTransport::new(self.script.clone(), config.address()))
    }
}
