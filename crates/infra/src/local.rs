//! 本地执行传输
//!
//! 在当前机器上通过系统 shell 执行命令，不需要网络连接。
//!
//! ## 功能
//! - Unix 使用 `sh -c`，Windows 使用 `cmd.exe /C`
//! - 标准输入注入
//! - 交互式执行（继承当前进程的标准输入输出）
//! - 文件"上传"即本地复制

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use hostlink_core::ExecOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::LocalhostConfig;
use crate::transport::{Transport, TransportError};

/// 本地协议名称
pub const LOCAL_PROTOCOL: &str = "Local";

/// 本地地址
pub const LOCAL_ADDRESS: &str = "127.0.0.1";

/// 本地执行传输
pub struct LocalTransport {
    config: LocalhostConfig,
    connected: bool,
}

impl LocalTransport {
    pub fn new(config: LocalhostConfig) -> Self {
        Self {
            config,
            connected: false,
        }
    }

    pub fn config(&self) -> &LocalhostConfig {
        &self.config
    }

    /// 构建系统 shell 命令
    fn shell_command(cmd: &str) -> Command {
        if cfg!(windows) {
            let mut command = Command::new("cmd.exe");
            command.arg("/C").arg(cmd);
            command
        } else {
            let mut command = Command::new("sh");
            command.arg("-c").arg(cmd);
            command
        }
    }
}

impl fmt::Display for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[local] {}", LOCAL_ADDRESS)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if !self.config.enabled {
            return Err(TransportError::ConnectionFailed(
                "本地执行未启用".to_string(),
            ));
        }
        self.connected = true;
        tracing::debug!("[LocalTransport] 已就绪");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn upload(
        &self,
        src: &Path,
        dst: &str,
        _opts: &ExecOptions,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        tracing::debug!("[LocalTransport] 复制文件: {} -> {}", src.display(), dst);
        tokio::fs::copy(src, dst)
            .await
            .map_err(|e| TransportError::TransferFailed(format!("{}: {}", src.display(), e)))?;
        Ok(())
    }

    fn is_windows(&self) -> bool {
        cfg!(windows)
    }

    async fn exec(&self, cmd: &str, opts: &ExecOptions) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        tracing::debug!("[LocalTransport] 执行: {}", opts.log_command(cmd));

        let mut command = Self::shell_command(cmd);
        command
            .stdin(if opts.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;

        // 输入在独立任务中写入，与读取输出并行，避免输出管道写满后互相等待
        let feeder = match (child.stdin.take(), opts.stdin.clone()) {
            (Some(mut stdin), Some(data)) => Some(tokio::spawn(async move {
                stdin.write_all(data.as_bytes()).await?;
                stdin.shutdown().await
            })),
            _ => None,
        };

        let output = child.wait_with_output().await?;

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                // 进程未读完输入就退出
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!("[LocalTransport] 标准输入未被完全读取: {}", e);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => {
                    return Err(TransportError::Internal(format!("写入标准输入任务失败: {}", e)))
                }
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if let Some(logged) = opts.log_output(&stdout) {
            if !logged.is_empty() {
                tracing::trace!("[LocalTransport] stdout: {}", logged);
            }
        }
        if let Some(logged) = opts.log_output(&stderr) {
            if !logged.is_empty() {
                tracing::trace!("[LocalTransport] stderr: {}", logged);
            }
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(TransportError::command_failed(exit_code, stderr.trim()));
        }

        Ok(if opts.capture_output { stdout } else { String::new() })
    }

    async fn exec_interactive(&self, cmd: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let status = if cmd.is_empty() {
            let shell = if cfg!(windows) {
                "cmd.exe".to_string()
            } else {
                std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string())
            };
            Command::new(shell)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await?
        } else {
            Self::shell_command(cmd)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await?
        };

        if !status.success() {
            return Err(TransportError::command_failed(
                status.code().unwrap_or(-1),
                String::new(),
            ));
        }
        Ok(())
    }

    fn protocol(&self) -> &'static str {
        LOCAL_PROTOCOL
    }

    fn address(&self) -> String {
        LOCAL_ADDRESS.to_string()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn connected() -> LocalTransport {
        let mut transport = LocalTransport::new(LocalhostConfig::default());
        transport.connect().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_exec_requires_connect() {
        let transport = LocalTransport::new(LocalhostConfig::default());
        let result = transport.exec("echo hi", &ExecOptions::new()).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disabled_connect_fails() {
        let mut transport = LocalTransport::new(LocalhostConfig { enabled: false });
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_display_and_identity() {
        let transport = connected().await;
        assert_eq!(transport.protocol(), "Local");
        assert_eq!(transport.address(), "127.0.0.1");
        assert_eq!(transport.to_string(), "[local] 127.0.0.1");
        assert!(transport.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_capture() {
        let transport = connected().await;
        let out = transport
            .exec("echo hello", &ExecOptions::new().with_capture())
            .await
            .unwrap();
        assert_eq!(out, "hello\n");

        let silent = transport.exec("echo hello", &ExecOptions::new()).await.unwrap();
        assert!(silent.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_stdin() {
        let transport = connected().await;
        let opts = ExecOptions::new().with_stdin("piped data").with_capture();
        let out = transport.exec("cat", &opts).await.unwrap();
        assert_eq!(out, "piped data");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_large_stdin_through_cat() {
        let transport = connected().await;
        let data = "0123456789abcdef".repeat(64 * 1024);
        let opts = ExecOptions::new().with_stdin(data.clone()).with_capture();

        let out = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            transport.exec("cat", &opts),
        )
        .await
        .expect("exec with 1 MiB stdin must not stall")
        .unwrap();
        assert_eq!(out.len(), data.len());
        assert_eq!(out, data);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_stdin_not_consumed() {
        let transport = connected().await;
        let opts = ExecOptions::new()
            .with_stdin("x".repeat(1024 * 1024))
            .with_capture();
        let out = transport.exec("echo done", &opts).await.unwrap();
        assert_eq!(out, "done\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_nonzero_exit() {
        let transport = connected().await;
        let result = transport
            .exec("echo oops >&2; exit 3", &ExecOptions::new())
            .await;
        match result {
            Err(TransportError::CommandFailed { exit_code, stderr }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_copies_file() {
        let transport = connected().await;
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        let mut file = std::fs::File::create(&src).unwrap();
        file.write_all(b"payload").unwrap();

        transport
            .upload(&src, dst.to_str().unwrap(), &ExecOptions::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_upload_missing_source() {
        let transport = connected().await;
        let dir = tempfile::tempdir().unwrap();
        let result = transport
            .upload(
                &dir.path().join("missing"),
                dir.path().join("dst").to_str().unwrap(),
                &ExecOptions::new(),
            )
            .await;
        assert!(matches!(result, Err(TransportError::TransferFailed(_))));
    }
}
