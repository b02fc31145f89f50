//! SSH 传输
//!
//! 基于 ssh2 的远程命令执行。ssh2 为阻塞 API，所有会话操作都放到
//! `tokio::task::spawn_blocking` 中执行。
//!
//! ## 功能
//! - TCP 连接（带超时）与 SSH 握手
//! - known_hosts 主机密钥验证（不匹配拒绝，未知则记录）
//! - 多种认证方式：指定私钥、SSH Agent、默认身份文件、密码
//! - 连接后探测目标是否为 Windows
//! - 命令执行（非阻塞交替收发 stdin、stdout、stderr）、交互式 PTY、SCP 上传

use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use async_trait::async_trait;
use hostlink_core::{sanitize_log_message, ExecOptions};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ssh2::Session;

use crate::config::SshConfig;
use crate::transport::{Transport, TransportError};

/// SSH 协议名称
pub const SSH_PROTOCOL: &str = "SSH";

/// 交互式会话使用的终端类型
const PTY_TERM: &str = "xterm-256color";

/// Windows 探测命令
const WINDOWS_PROBE: &str = "cmd.exe /c exit 0";

/// 本地标准输入
///
/// 进程内只有一个阻塞读取线程，首次交互式执行时启动，所有交互会话共用。
/// 会话结束后键入的内容留在队列中，由下一个交互会话接收，不会被已结束的会话吞掉。
/// 同一时刻只有一个交互会话持有队列。
static LOCAL_INPUT: Lazy<Mutex<Receiver<Vec<u8>>>> = Lazy::new(|| {
    let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buffer = [0u8; 1024];
        loop {
            match stdin.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if input_tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    Mutex::new(input_rx)
});

// ============================================================================
// 认证方式
// ============================================================================

/// SSH 认证方式
#[derive(Clone, PartialEq, Eq)]
pub enum SshAuthMethod {
    /// 私钥文件
    PublicKey(PathBuf),
    /// SSH Agent
    Agent,
    /// 密码
    Password(String),
}

impl fmt::Debug for SshAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublicKey(path) => write!(f, "PublicKey({})", path.display()),
            Self::Agent => write!(f, "Agent"),
            Self::Password(_) => write!(f, "Password(***)"),
        }
    }
}

/// 获取默认身份文件列表
pub fn default_identity_files() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let ssh_dir = home.join(".ssh");

    ["id_ed25519", "id_ecdsa", "id_rsa", "id_dsa"]
        .iter()
        .map(|key| ssh_dir.join(key))
        .filter(|path| path.exists())
        .collect()
}

/// 检查 SSH Agent 是否可用
pub fn is_ssh_agent_available() -> bool {
    std::env::var("SSH_AUTH_SOCK").is_ok()
}

/// 按顺序构建认证方式列表
///
/// 顺序：指定私钥 > SSH Agent > 默认身份文件 > 密码
pub fn build_auth_methods(
    config: &SshConfig,
    agent_available: bool,
    identity_files: Vec<PathBuf>,
) -> Vec<SshAuthMethod> {
    let mut methods = Vec::new();

    if let Some(key_path) = &config.key_path {
        methods.push(SshAuthMethod::PublicKey(key_path.clone()));
    }

    if agent_available {
        methods.push(SshAuthMethod::Agent);
    }

    for path in identity_files {
        if config.key_path.as_ref() != Some(&path) {
            methods.push(SshAuthMethod::PublicKey(path));
        }
    }

    if let Some(password) = &config.password {
        methods.push(SshAuthMethod::Password(password.clone()));
    }

    methods
}

// ============================================================================
// 主机密钥
// ============================================================================

/// known_hosts 检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
enum KnownHostsCheckResult {
    Match,
    NotFound,
    Mismatch,
    Error(String),
}

/// 计算密钥指纹
fn compute_fingerprint(key: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD_NO_PAD as BASE64, Engine};
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(key);
    format!("SHA256:{}", BASE64.encode(hasher.finalize()))
}

fn known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// known_hosts 中的主机名写法，非默认端口使用 `[host]:port`
fn known_hosts_name(host: &str, port: u16) -> String {
    if port == crate::config::DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn check_known_hosts(session: &Session, host: &str, port: u16, key: &[u8]) -> KnownHostsCheckResult {
    let mut known_hosts = match session.known_hosts() {
        Ok(kh) => kh,
        Err(e) => return KnownHostsCheckResult::Error(e.to_string()),
    };

    if let Some(path) = known_hosts_path() {
        if path.exists() {
            if let Err(e) = known_hosts.read_file(&path, ssh2::KnownHostFileKind::OpenSSH) {
                tracing::warn!("[SshTransport] 读取 known_hosts 失败: {}", e);
            }
        }
    }

    match known_hosts.check_port(host, port, key) {
        ssh2::CheckResult::Match => KnownHostsCheckResult::Match,
        ssh2::CheckResult::NotFound => KnownHostsCheckResult::NotFound,
        ssh2::CheckResult::Mismatch => KnownHostsCheckResult::Mismatch,
        ssh2::CheckResult::Failure => {
            KnownHostsCheckResult::Error("known_hosts 检查失败".to_string())
        }
    }
}

fn add_to_known_hosts(
    session: &Session,
    host: &str,
    port: u16,
    key: &[u8],
    key_type: ssh2::HostKeyType,
) -> Result<(), TransportError> {
    if matches!(key_type, ssh2::HostKeyType::Unknown) {
        return Err(TransportError::HostKeyVerificationFailed(
            "未知的密钥类型".to_string(),
        ));
    }
    let format: ssh2::KnownHostKeyFormat = key_type.into();

    let path = known_hosts_path().ok_or_else(|| {
        TransportError::HostKeyVerificationFailed("无法获取 known_hosts 路径".to_string())
    })?;

    let mut known_hosts = session.known_hosts().map_err(|e| {
        TransportError::HostKeyVerificationFailed(format!("获取 known_hosts 失败: {}", e))
    })?;
    if path.exists() {
        let _ = known_hosts.read_file(&path, ssh2::KnownHostFileKind::OpenSSH);
    }

    let name = known_hosts_name(host, port);
    known_hosts.add(&name, key, "", format).map_err(|e| {
        TransportError::HostKeyVerificationFailed(format!("添加主机密钥失败: {}", e))
    })?;

    if let Some(ssh_dir) = path.parent() {
        std::fs::create_dir_all(ssh_dir)?;
    }
    known_hosts
        .write_file(&path, ssh2::KnownHostFileKind::OpenSSH)
        .map_err(|e| {
            TransportError::HostKeyVerificationFailed(format!("写入 known_hosts 失败: {}", e))
        })?;

    tracing::info!("[SshTransport] 已添加主机密钥到 known_hosts: {}", name);
    Ok(())
}

/// 验证远程主机密钥
///
/// 不匹配时拒绝连接；未知主机记录到 known_hosts 后继续，记录失败只告警。
fn verify_host_key(session: &Session, host: &str, port: u16) -> Result<(), TransportError> {
    let (key, key_type) = session.host_key().ok_or_else(|| {
        TransportError::HostKeyVerificationFailed("无法获取主机密钥".to_string())
    })?;
    let fingerprint = compute_fingerprint(key);

    match check_known_hosts(session, host, port, key) {
        KnownHostsCheckResult::Match => {
            tracing::debug!("[SshTransport] 主机密钥验证成功: {}", fingerprint);
            Ok(())
        }
        KnownHostsCheckResult::NotFound => {
            tracing::warn!(
                "[SshTransport] 主机密钥未知，已接受: host={}, fingerprint={}",
                host,
                fingerprint
            );
            if let Err(e) = add_to_known_hosts(session, host, port, key, key_type) {
                tracing::warn!("[SshTransport] 记录主机密钥失败: {}", e);
            }
            Ok(())
        }
        KnownHostsCheckResult::Mismatch => {
            tracing::error!("[SshTransport] 主机密钥不匹配！可能存在中间人攻击");
            Err(TransportError::HostKeyVerificationFailed(format!(
                "{} 的主机密钥与 known_hosts 不一致 ({})",
                host, fingerprint
            )))
        }
        KnownHostsCheckResult::Error(e) => Err(TransportError::HostKeyVerificationFailed(e)),
    }
}

// ============================================================================
// 认证
// ============================================================================

fn try_auth(session: &Session, user: &str, method: &SshAuthMethod) -> Result<(), TransportError> {
    match method {
        SshAuthMethod::PublicKey(key_path) => {
            tracing::debug!("[SshTransport] 尝试公钥认证: {}", key_path.display());
            session
                .userauth_pubkey_file(user, None, key_path, None)
                .map_err(|e| TransportError::AuthFailed(e.to_string()))?;
        }
        SshAuthMethod::Agent => {
            tracing::debug!("[SshTransport] 尝试 SSH Agent 认证");
            let mut agent = session
                .agent()
                .map_err(|e| TransportError::AuthFailed(format!("获取 SSH Agent 失败: {}", e)))?;
            agent
                .connect()
                .map_err(|e| TransportError::AuthFailed(format!("连接 SSH Agent 失败: {}", e)))?;
            agent
                .list_identities()
                .map_err(|e| TransportError::AuthFailed(format!("列出身份失败: {}", e)))?;
            let identities = agent
                .identities()
                .map_err(|e| TransportError::AuthFailed(format!("获取身份列表失败: {}", e)))?;

            if !identities
                .iter()
                .any(|identity| agent.userauth(user, identity).is_ok())
            {
                return Err(TransportError::AuthFailed(
                    "SSH Agent 中没有有效的身份".to_string(),
                ));
            }
        }
        SshAuthMethod::Password(password) => {
            tracing::debug!("[SshTransport] 尝试密码认证");
            session
                .userauth_password(user, password)
                .map_err(|e| TransportError::AuthFailed(e.to_string()))?;
        }
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(TransportError::AuthFailed("认证未完成".to_string()))
    }
}

fn authenticate(session: &Session, config: &SshConfig) -> Result<(), TransportError> {
    let methods = build_auth_methods(config, is_ssh_agent_available(), default_identity_files());
    tracing::debug!("[SshTransport] 开始认证，用户: {}", config.user);

    for method in &methods {
        match try_auth(session, &config.user, method) {
            Ok(()) => {
                tracing::debug!("[SshTransport] 认证成功: {:?}", method);
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(
                    "[SshTransport] 认证方式失败: {:?}, 错误: {}",
                    method,
                    sanitize_log_message(&e.to_string())
                );
            }
        }
    }

    Err(TransportError::AuthFailed(format!(
        "{} 的所有认证方式均失败（共 {} 种）",
        config.user,
        methods.len()
    )))
}

// ============================================================================
// 阻塞辅助函数
// ============================================================================

/// 阻塞连接：TCP、握手、主机密钥、认证
fn open_session(config: &SshConfig) -> Result<Session, TransportError> {
    let addr = format!("{}:{}", config.address, config.port);
    tracing::info!("[SshTransport] 正在连接到 {}", addr);

    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| TransportError::ConnectionFailed(format!("解析地址 {} 失败: {}", addr, e)))?
        .next()
        .ok_or_else(|| TransportError::ConnectionFailed(format!("无法解析地址: {}", addr)))?;

    let tcp = TcpStream::connect_timeout(
        &socket_addr,
        Duration::from_secs(config.connect_timeout_secs),
    )
    .map_err(|e| TransportError::ConnectionFailed(format!("TCP 连接失败: {}", e)))?;

    let mut session = Session::new()
        .map_err(|e| TransportError::ConnectionFailed(format!("创建 SSH 会话失败: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(config.connect_timeout_secs.saturating_mul(1000) as u32);
    session
        .handshake()
        .map_err(|e| TransportError::ConnectionFailed(format!("SSH 握手失败: {}", e)))?;
    session.set_timeout(0);
    tracing::debug!("[SshTransport] SSH 握手成功");

    verify_host_key(&session, &config.address, config.port)?;
    authenticate(&session, config)?;

    Ok(session)
}

/// 单次命令执行结果
struct ChannelOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

fn channel_err(context: &str) -> impl Fn(ssh2::Error) -> TransportError + '_ {
    move |e| TransportError::ConnectionFailed(format!("{}: {}", context, e))
}

fn run_command(
    session: &Session,
    cmd: &str,
    stdin: Option<&str>,
) -> Result<ChannelOutput, TransportError> {
    let mut channel = session
        .channel_session()
        .map_err(channel_err("创建 SSH Channel 失败"))?;
    channel.exec(cmd).map_err(channel_err("执行远程命令失败"))?;

    session.set_blocking(false);
    let pumped = pump_channel(&mut channel, stdin.unwrap_or_default().as_bytes());
    session.set_blocking(true);
    let (stdout, stderr) = pumped?;

    channel
        .wait_close()
        .map_err(channel_err("等待 Channel 关闭失败"))?;
    let exit_code = channel
        .exit_status()
        .map_err(channel_err("获取退出码失败"))?;

    Ok(ChannelOutput {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        exit_code,
    })
}

/// 每轮写入的标准输入上限
const STDIN_CHUNK_SIZE: usize = 32 * 1024;

/// 非阻塞模式下的命令通道
///
/// 未就绪的操作返回 `WouldBlock`。
trait ExecChannel {
    fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<usize>;
    fn close_stdin(&mut self) -> std::io::Result<()>;
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn remote_eof(&self) -> bool;
}

impl ExecChannel for ssh2::Channel {
    fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<usize> {
        Write::write(self, data)
    }

    fn close_stdin(&mut self) -> std::io::Result<()> {
        ssh2::Channel::send_eof(self).map_err(std::io::Error::from)
    }

    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Read::read(self, buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stderr().read(buf)
    }

    fn remote_eof(&self) -> bool {
        self.eof()
    }
}

/// 交替写入标准输入、读取 stdout 与 stderr，直到远端 EOF
///
/// 任何一个方向阻塞时都继续处理其它方向，远端窗口写满不会卡住。
fn pump_channel<C: ExecChannel + ?Sized>(
    channel: &mut C,
    input: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), TransportError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buffer = [0u8; 16 * 1024];
    let mut written = 0;
    let mut stdin_closed = false;

    loop {
        let mut progressed = false;

        if written < input.len() {
            let end = (written + STDIN_CHUNK_SIZE).min(input.len());
            match channel.write_stdin(&input[written..end]) {
                Ok(n) => {
                    written += n;
                    progressed |= n > 0;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        } else if !stdin_closed {
            match channel.close_stdin() {
                Ok(()) => {
                    stdin_closed = true;
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        progressed |= drain(|buf| channel.read_stdout(buf), &mut buffer, &mut stdout)?;
        progressed |= drain(|buf| channel.read_stderr(buf), &mut buffer, &mut stderr)?;

        if channel.remote_eof() {
            drain(|buf| channel.read_stdout(buf), &mut buffer, &mut stdout)?;
            drain(|buf| channel.read_stderr(buf), &mut buffer, &mut stderr)?;
            return Ok((stdout, stderr));
        }

        if !progressed {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// 读取当前可用的全部数据，返回是否读到内容
fn drain(
    mut read: impl FnMut(&mut [u8]) -> std::io::Result<usize>,
    buffer: &mut [u8],
    out: &mut Vec<u8>,
) -> Result<bool, TransportError> {
    let mut progressed = false;
    loop {
        match read(buffer) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                out.extend_from_slice(&buffer[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(progressed),
            Err(e) => return Err(e.into()),
        }
    }
}

/// 交互式执行：请求 PTY，转发本地输入，输出写到本地 stdout
fn run_interactive(session: &Session, cmd: &str) -> Result<i32, TransportError> {
    let mut channel = session
        .channel_session()
        .map_err(channel_err("创建 SSH Channel 失败"))?;
    channel
        .request_pty(PTY_TERM, None, Some((80, 24, 0, 0)))
        .map_err(channel_err("请求远程 PTY 失败"))?;

    if cmd.is_empty() {
        channel.shell().map_err(channel_err("启动远程 Shell 失败"))?;
    } else {
        channel.exec(cmd).map_err(channel_err("执行远程命令失败"))?;
    }

    let input_rx = LOCAL_INPUT.lock();
    session.set_blocking(false);
    let result = relay_interactive(&mut channel, &input_rx);
    session.set_blocking(true);
    result?;

    channel
        .wait_close()
        .map_err(channel_err("等待 Channel 关闭失败"))?;
    channel
        .exit_status()
        .map_err(channel_err("获取退出码失败"))
}

fn relay_interactive(
    channel: &mut ssh2::Channel,
    input_rx: &Receiver<Vec<u8>>,
) -> Result<(), TransportError> {
    let mut stdout = std::io::stdout();
    let mut buffer = [0u8; 4096];

    loop {
        while let Ok(data) = input_rx.try_recv() {
            match channel.write_all(&data) {
                Ok(()) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        match channel.read(&mut buffer) {
            Ok(0) => {
                if channel.eof() {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(n) => {
                stdout.write_all(&buffer[..n])?;
                stdout.flush()?;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if channel.eof() {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn scp_upload(session: &Session, src: &Path, dst: &str) -> Result<(), TransportError> {
    let metadata = std::fs::metadata(src)
        .map_err(|e| TransportError::TransferFailed(format!("{}: {}", src.display(), e)))?;
    let mode = file_mode(&metadata);

    let mut file = std::fs::File::open(src)
        .map_err(|e| TransportError::TransferFailed(format!("{}: {}", src.display(), e)))?;
    let mut remote = session
        .scp_send(Path::new(dst), mode, metadata.len(), None)
        .map_err(|e| TransportError::TransferFailed(format!("SCP 发送失败: {}", e)))?;

    std::io::copy(&mut file, &mut remote)
        .map_err(|e| TransportError::TransferFailed(format!("写入 {} 失败: {}", dst, e)))?;

    let close_err = |e: ssh2::Error| TransportError::TransferFailed(format!("关闭 SCP 通道失败: {}", e));
    remote.send_eof().map_err(close_err)?;
    remote.wait_eof().map_err(close_err)?;
    remote.close().map_err(close_err)?;
    remote.wait_close().map_err(close_err)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> i32 {
    use std::os::unix::fs::PermissionsExt;
    (metadata.permissions().mode() & 0o777) as i32
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> i32 {
    0o644
}

async fn blocking<T, F>(f: F) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Internal(format!("阻塞任务失败: {}", e)))?
}

// ============================================================================
// SshTransport
// ============================================================================

/// SSH 传输
pub struct SshTransport {
    config: SshConfig,
    session: Option<Session>,
    windows: bool,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            session: None,
            windows: false,
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn live_session(&self) -> Result<Session, TransportError> {
        self.session.clone().ok_or(TransportError::NotConnected)
    }
}

impl fmt::Display for SshTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ssh] {}:{}", self.config.address, self.config.port)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let config = self.config.clone();
        let session = blocking(move || open_session(&config)).await?;

        let probe_session = session.clone();
        let windows = blocking(move || run_command(&probe_session, WINDOWS_PROBE, None))
            .await
            .map(|out| out.exit_code == 0)
            .unwrap_or(false);

        tracing::info!(
            "[SshTransport] 已连接: {} (windows={})",
            self,
            windows
        );
        self.session = Some(session);
        self.windows = windows;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!("[SshTransport] 断开连接: {}", self);
            let _ = blocking(move || {
                let _ = session.disconnect(None, "Connection closed", None);
                Ok(())
            })
            .await;
        }
    }

    async fn upload(
        &self,
        src: &Path,
        dst: &str,
        _opts: &ExecOptions,
    ) -> Result<(), TransportError> {
        let session = self.live_session()?;
        tracing::debug!("[SshTransport] 上传文件: {} -> {}", src.display(), dst);

        let src = src.to_path_buf();
        let dst = dst.to_string();
        blocking(move || scp_upload(&session, &src, &dst)).await
    }

    fn is_windows(&self) -> bool {
        self.windows
    }

    async fn exec(&self, cmd: &str, opts: &ExecOptions) -> Result<String, TransportError> {
        let session = self.live_session()?;
        tracing::debug!("[SshTransport] 执行: {}", opts.log_command(cmd));

        let command = cmd.to_string();
        let stdin = opts.stdin.clone();
        let output =
            blocking(move || run_command(&session, &command, stdin.as_deref())).await?;

        if let Some(logged) = opts.log_output(&output.stdout) {
            if !logged.is_empty() {
                tracing::trace!("[SshTransport] stdout: {}", logged);
            }
        }
        if let Some(logged) = opts.log_output(&output.stderr) {
            if !logged.is_empty() {
                tracing::trace!("[SshTransport] stderr: {}", logged);
            }
        }

        if output.exit_code != 0 {
            return Err(TransportError::command_failed(
                output.exit_code,
                output.stderr.trim(),
            ));
        }
        if self.windows && !opts.allow_win_stderr && !output.stderr.trim().is_empty() {
            return Err(TransportError::command_failed(0, output.stderr.trim()));
        }

        Ok(if opts.capture_output {
            output.stdout
        } else {
            String::new()
        })
    }

    async fn exec_interactive(&self, cmd: &str) -> Result<(), TransportError> {
        let session = self.live_session()?;
        tracing::debug!("[SshTransport] 交互式执行: {}", cmd);

        let command = cmd.to_string();
        let exit_code = blocking(move || run_interactive(&session, &command)).await?;
        if exit_code != 0 {
            return Err(TransportError::command_failed(exit_code, String::new()));
        }
        Ok(())
    }

    fn protocol(&self) -> &'static str {
        SSH_PROTOCOL
    }

    fn address(&self) -> String {
        self.config.address.clone()
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_auth_order() {
        let config = SshConfig::new("host")
            .with_key_path("/keys/deploy")
            .with_password("pw");
        let methods = build_auth_methods(
            &config,
            true,
            vec![PathBuf::from("/home/u/.ssh/id_ed25519")],
        );
        assert_eq!(
            methods,
            vec![
                SshAuthMethod::PublicKey(PathBuf::from("/keys/deploy")),
                SshAuthMethod::Agent,
                SshAuthMethod::PublicKey(PathBuf::from("/home/u/.ssh/id_ed25519")),
                SshAuthMethod::Password("pw".to_string()),
            ]
        );
    }

    #[test]
    fn test_auth_skips_duplicate_key_and_missing_agent() {
        let key = PathBuf::from("/home/u/.ssh/id_rsa");
        let config = SshConfig::new("host").with_key_path(key.clone());
        let methods = build_auth_methods(&config, false, vec![key.clone()]);
        assert_eq!(methods, vec![SshAuthMethod::PublicKey(key)]);
    }

    #[test]
    fn test_auth_method_debug_hides_password() {
        let debug = format!("{:?}", SshAuthMethod::Password("hunter2".to_string()));
        assert_eq!(debug, "Password(***)");
    }

    #[test]
    fn test_fingerprint_format() {
        let fingerprint = compute_fingerprint(b"key");
        assert!(fingerprint.starts_with("SHA256:"));
        assert!(!fingerprint.ends_with('='));
    }

    #[test]
    fn test_known_hosts_name() {
        assert_eq!(known_hosts_name("example.com", 22), "example.com");
        assert_eq!(known_hosts_name("example.com", 2222), "[example.com]:2222");
    }

    #[test]
    fn test_display_and_identity() {
        let transport = SshTransport::new(SshConfig::new("10.0.0.5").with_port(2222));
        assert_eq!(transport.to_string(), "[ssh] 10.0.0.5:2222");
        assert_eq!(transport.protocol(), "SSH");
        assert_eq!(transport.address(), "10.0.0.5");
        assert!(!transport.is_connected());
        assert!(!transport.is_windows());
    }

    /// 模拟远端 `cat`：先输出一段 stderr，stderr 未读完前 stdout 不可读；
    /// 未读的 stdout 超过窗口后拒绝继续接收输入
    struct FakeCatChannel {
        window: usize,
        backlog: VecDeque<u8>,
        stderr_left: VecDeque<u8>,
        stdin_closed: bool,
    }

    impl FakeCatChannel {
        fn new(window: usize, stderr_len: usize) -> Self {
            Self {
                window,
                backlog: VecDeque::new(),
                stderr_left: std::iter::repeat(b'e').take(stderr_len).collect(),
                stdin_closed: false,
            }
        }

        fn would_block() -> std::io::Error {
            std::io::Error::from(std::io::ErrorKind::WouldBlock)
        }
    }

    impl ExecChannel for FakeCatChannel {
        fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<usize> {
            assert!(!self.stdin_closed, "write after EOF");
            let room = self.window.saturating_sub(self.backlog.len());
            if room == 0 {
                return Err(Self::would_block());
            }
            let n = room.min(data.len());
            self.backlog.extend(&data[..n]);
            Ok(n)
        }

        fn close_stdin(&mut self) -> std::io::Result<()> {
            self.stdin_closed = true;
            Ok(())
        }

        fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.stderr_left.is_empty() {
                return Err(Self::would_block());
            }
            if self.backlog.is_empty() {
                return if self.stdin_closed { Ok(0) } else { Err(Self::would_block()) };
            }
            let n = buf.len().min(self.backlog.len());
            for (slot, byte) in buf.iter_mut().zip(self.backlog.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.stderr_left.is_empty() {
                return if self.stdin_closed { Ok(0) } else { Err(Self::would_block()) };
            }
            let n = buf.len().min(4096).min(self.stderr_left.len());
            for (slot, byte) in buf.iter_mut().zip(self.stderr_left.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn remote_eof(&self) -> bool {
            self.stdin_closed && self.backlog.is_empty() && self.stderr_left.is_empty()
        }
    }

    #[test]
    fn test_pump_large_stdin_and_stderr() {
        let input: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        let mut channel = FakeCatChannel::new(64 * 1024, 256 * 1024);

        let (stdout, stderr) = pump_channel(&mut channel, &input).unwrap();
        assert_eq!(stdout.len(), input.len());
        assert_eq!(stdout, input);
        assert_eq!(stderr.len(), 256 * 1024);
        assert!(stderr.iter().all(|b| *b == b'e'));
        assert!(channel.stdin_closed);
    }

    #[test]
    fn test_pump_without_stdin_sends_eof() {
        let mut channel = FakeCatChannel::new(1024, 10);
        let (stdout, stderr) = pump_channel(&mut channel, &[]).unwrap();
        assert!(stdout.is_empty());
        assert_eq!(stderr, b"eeeeeeeeee");
        assert!(channel.stdin_closed);
    }

    #[test]
    fn test_pump_propagates_channel_error() {
        struct Broken;
        impl ExecChannel for Broken {
            fn write_stdin(&mut self, _data: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }
            fn close_stdin(&mut self) -> std::io::Result<()> {
                Ok(())
            }
            fn read_stdout(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn read_stderr(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn remote_eof(&self) -> bool {
                false
            }
        }

        assert!(pump_channel(&mut Broken, b"data").is_err());
    }

    #[test]
    fn test_local_input_shared_queue() {
        let first = LOCAL_INPUT.lock();
        assert!(LOCAL_INPUT.try_lock().is_none());
        drop(first);
        assert!(LOCAL_INPUT.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_exec_without_session() {
        let transport = SshTransport::new(SshConfig::new("10.0.0.5"));
        let result = transport.exec("uname", &ExecOptions::new()).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let mut transport = SshTransport::new(SshConfig::new("10.0.0.5"));
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.is_connected());
    }
}
