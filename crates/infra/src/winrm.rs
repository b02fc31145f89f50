//! WinRM 传输
//!
//! 通过 WS-Management SOAP 协议在 Windows 目标上执行命令，HTTP Basic 认证。
//!
//! ## 功能
//! - Identify 请求验证连通性与凭据
//! - 命令执行：创建 Shell → 执行命令 → 循环接收输出 → 终止信号 → 删除 Shell
//! - 标准输入通过 Send 请求发送
//! - 文件上传：Base64 分块经 PowerShell 写入目标路径

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hostlink_core::{sanitize_log_message, ExecOptions};
use reqwest::Client;
use uuid::Uuid;

use crate::config::WinRmConfig;
use crate::powershell;
use crate::transport::{Transport, TransportError};

/// WinRM 协议名称
pub const WINRM_PROTOCOL: &str = "WinRM";

const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const WSMID_NS: &str = "http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity.xsd";
const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ANONYMOUS_ADDRESS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SEND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Send";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// Receive 在 OperationTimeout 内无输出时返回的 WSManFault 代码
const OPERATION_TIMEOUT_FAULT: &str = "2150858793";

const MAX_ENVELOPE_SIZE: u32 = 153_600;

/// 上传分块大小（原始字节）
///
/// 编码后的 PowerShell 命令行需低于 Windows 32767 字符的命令行上限。
const UPLOAD_CHUNK_SIZE: usize = 6000;

// ============================================================================
// SOAP 报文
// ============================================================================

/// XML 文本转义
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn identify_envelope() -> String {
    format!(
        r#"<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:wsmid="{WSMID_NS}"><s:Header/><s:Body><wsmid:Identify/></s:Body></s:Envelope>"#
    )
}

/// 构建 Shell 资源上的请求报文
fn shell_envelope(
    endpoint: &str,
    action: &str,
    shell_id: Option<&str>,
    operation_timeout_secs: u64,
    extra_headers: &str,
    body: &str,
) -> String {
    let selector = shell_id
        .map(|id| {
            format!(
                r#"<w:SelectorSet><w:Selector Name="ShellId">{}</w:Selector></w:SelectorSet>"#,
                id
            )
        })
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:a="{WSA_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  <s:Header>
    <a:To>{endpoint}</a:To>
    <w:ResourceURI s:mustUnderstand="true">{SHELL_RESOURCE_URI}</w:ResourceURI>
    <a:ReplyTo><a:Address s:mustUnderstand="true">{ANONYMOUS_ADDRESS}</a:Address></a:ReplyTo>
    <a:Action s:mustUnderstand="true">{action}</a:Action>
    <a:MessageID>uuid:{message_id}</a:MessageID>
    <w:MaxEnvelopeSize s:mustUnderstand="true">{MAX_ENVELOPE_SIZE}</w:MaxEnvelopeSize>
    <w:OperationTimeout>PT{operation_timeout_secs}S</w:OperationTimeout>
    {selector}{extra_headers}
  </s:Header>
  <s:Body>{body}</s:Body>
</s:Envelope>"#,
        message_id = Uuid::new_v4(),
    )
}

/// 取出第一个 `<tag>...</tag>` 之间的文本，允许标签带属性
fn extract_element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);

    let mut from = 0;
    while let Some(pos) = xml[from..].find(&open) {
        let tag_start = from + pos;
        let after_name = tag_start + open.len();
        // 防止 <rsp:Shell 匹配 <rsp:ShellId
        match xml[after_name..].chars().next() {
            Some('>') | Some(' ') | Some('/') => {}
            _ => {
                from = after_name;
                continue;
            }
        }
        let tag_end = after_name + xml[after_name..].find('>')?;
        if xml[..tag_end].ends_with('/') {
            return Some("");
        }
        let content_start = tag_end + 1;
        let content_end = content_start + xml[content_start..].find(&close)?;
        return Some(&xml[content_start..content_end]);
    }
    None
}

fn extract_shell_id(response: &str) -> Option<String> {
    extract_element(response, "rsp:ShellId")
        .or_else(|| {
            let marker = r#"<w:Selector Name="ShellId">"#;
            let start = response.find(marker)? + marker.len();
            let end = start + response[start..].find("</w:Selector>")?;
            Some(&response[start..end])
        })
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn extract_command_id(response: &str) -> Option<String> {
    extract_element(response, "rsp:CommandId")
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// SOAP Fault 的可读描述，凭据写法已屏蔽
fn fault_message(response: &str) -> String {
    let message = extract_element(response, "f:Message")
        .or_else(|| extract_element(response, "s:Text"))
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|| response.chars().take(200).collect());
    sanitize_log_message(&message)
}

/// 一次 Receive 响应中的输出片段
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub done: bool,
}

/// 解析 Receive 响应
pub fn parse_receive(response: &str) -> ReceiveChunk {
    let mut chunk = ReceiveChunk {
        done: response.contains("CommandState/Done"),
        ..Default::default()
    };

    let open = "<rsp:Stream ";
    let mut from = 0;
    while let Some(pos) = response[from..].find(open) {
        let tag_start = from + pos;
        let Some(tag_len) = response[tag_start..].find('>') else {
            break;
        };
        let tag = &response[tag_start..tag_start + tag_len];
        let content_start = tag_start + tag_len + 1;
        from = content_start;

        if tag.ends_with('/') {
            continue;
        }
        let Some(content_len) = response[content_start..].find("</rsp:Stream>") else {
            break;
        };
        let content = response[content_start..content_start + content_len].trim();
        from = content_start + content_len;

        if content.is_empty() {
            continue;
        }
        let Ok(decoded) = BASE64.decode(content) else {
            tracing::warn!("[WinRmTransport] 输出流 Base64 解码失败");
            continue;
        };
        if tag.contains(r#"Name="stderr""#) {
            chunk.stderr.extend_from_slice(&decoded);
        } else if tag.contains(r#"Name="stdout""#) {
            chunk.stdout.extend_from_slice(&decoded);
        }
    }

    if let Some(code) = extract_element(response, "rsp:ExitCode") {
        chunk.exit_code = code.trim().parse().ok();
    }

    chunk
}

// ============================================================================
// WinRmTransport
// ============================================================================

/// 命令执行结果
struct CommandOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// WinRM 传输
pub struct WinRmTransport {
    config: WinRmConfig,
    client: Option<Client>,
}

impl WinRmTransport {
    pub fn new(config: WinRmConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn config(&self) -> &WinRmConfig {
        &self.config
    }

    fn client(&self) -> Result<&Client, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotConnected)
    }

    fn build_client(&self) -> Result<Client, TransportError> {
        Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .danger_accept_invalid_certs(self.config.insecure)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(format!("创建 HTTP 客户端失败: {}", e)))
    }

    /// 发送报文，返回 HTTP 状态与响应正文
    async fn post(
        &self,
        client: &Client,
        body: String,
    ) -> Result<(reqwest::StatusCode, String), TransportError> {
        let response = client
            .post(self.config.endpoint_url())
            .basic_auth(&self.config.user, self.config.password.as_deref())
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("HTTP 请求失败: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Protocol(format!("读取响应失败: {}", e)))?;
        Ok((status, text))
    }

    /// 发送报文，非 2xx 视为错误
    async fn request(&self, client: &Client, body: String) -> Result<String, TransportError> {
        let (status, text) = self.post(client, body).await?;
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TransportError::AuthFailed(format!(
                "{} 拒绝了用户 {} 的凭据",
                self.config.address, self.config.user
            )));
        }
        if !status.is_success() {
            return Err(TransportError::Protocol(format!(
                "{}: {}",
                status,
                fault_message(&text)
            )));
        }
        Ok(text)
    }

    fn envelope(&self, action: &str, shell_id: Option<&str>, headers: &str, body: &str) -> String {
        shell_envelope(
            &self.config.endpoint_url(),
            action,
            shell_id,
            self.config.timeout_secs.saturating_sub(5).max(1),
            headers,
            body,
        )
    }

    async fn create_shell(&self, client: &Client) -> Result<String, TransportError> {
        let headers = r#"<w:OptionSet><w:Option Name="WINRS_NOPROFILE">TRUE</w:Option><w:Option Name="WINRS_CODEPAGE">65001</w:Option></w:OptionSet>"#;
        let body = "<rsp:Shell><rsp:InputStreams>stdin</rsp:InputStreams><rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>";
        let response = self
            .request(client, self.envelope(ACTION_CREATE, None, headers, body))
            .await?;
        let shell_id = extract_shell_id(&response)
            .ok_or_else(|| TransportError::Protocol("响应中缺少 ShellId".to_string()))?;
        tracing::trace!("[WinRmTransport] 创建 Shell: {}", shell_id);
        Ok(shell_id)
    }

    async fn start_command(
        &self,
        client: &Client,
        shell_id: &str,
        cmd: &str,
    ) -> Result<String, TransportError> {
        let headers = r#"<w:OptionSet><w:Option Name="WINRS_CONSOLEMODE_STDIN">TRUE</w:Option><w:Option Name="WINRS_SKIP_CMD_SHELL">FALSE</w:Option></w:OptionSet>"#;
        let body = format!(
            "<rsp:CommandLine><rsp:Command>{}</rsp:Command></rsp:CommandLine>",
            xml_escape(cmd)
        );
        let response = self
            .request(client, self.envelope(ACTION_COMMAND, Some(shell_id), headers, &body))
            .await?;
        extract_command_id(&response)
            .ok_or_else(|| TransportError::Protocol("响应中缺少 CommandId".to_string()))
    }

    async fn send_stdin(
        &self,
        client: &Client,
        shell_id: &str,
        command_id: &str,
        data: &str,
    ) -> Result<(), TransportError> {
        let body = format!(
            r#"<rsp:Send><rsp:Stream Name="stdin" CommandId="{}" End="true">{}</rsp:Stream></rsp:Send>"#,
            command_id,
            BASE64.encode(data.as_bytes())
        );
        self.request(client, self.envelope(ACTION_SEND, Some(shell_id), "", &body))
            .await?;
        Ok(())
    }

    /// 循环接收输出直到命令结束，`relay` 为真时同时写到本地 stdout
    async fn receive_all(
        &self,
        client: &Client,
        shell_id: &str,
        command_id: &str,
        relay: bool,
    ) -> Result<CommandOutput, TransportError> {
        let body = format!(
            r#"<rsp:Receive><rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream></rsp:Receive>"#,
            command_id
        );
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0;

        loop {
            let (status, response) = self
                .post(client, self.envelope(ACTION_RECEIVE, Some(shell_id), "", &body))
                .await?;
            if !status.is_success() {
                if response.contains(OPERATION_TIMEOUT_FAULT) {
                    continue;
                }
                return Err(TransportError::Protocol(format!(
                    "{}: {}",
                    status,
                    fault_message(&response)
                )));
            }

            let chunk = parse_receive(&response);
            if relay {
                let mut out = std::io::stdout();
                out.write_all(&chunk.stdout)?;
                out.flush()?;
                let mut err = std::io::stderr();
                err.write_all(&chunk.stderr)?;
                err.flush()?;
            }
            stdout.extend_from_slice(&chunk.stdout);
            stderr.extend_from_slice(&chunk.stderr);
            if let Some(code) = chunk.exit_code {
                exit_code = code;
            }
            if chunk.done {
                break;
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code,
        })
    }

    async fn cleanup(&self, client: &Client, shell_id: &str, command_id: Option<&str>) {
        if let Some(command_id) = command_id {
            let body = format!(
                r#"<rsp:Signal CommandId="{}"><rsp:Code>{}</rsp:Code></rsp:Signal>"#,
                command_id, SIGNAL_TERMINATE
            );
            if let Err(e) = self
                .request(client, self.envelope(ACTION_SIGNAL, Some(shell_id), "", &body))
                .await
            {
                tracing::debug!("[WinRmTransport] 终止信号失败: {}", e);
            }
        }
        if let Err(e) = self
            .request(client, self.envelope(ACTION_DELETE, Some(shell_id), "", ""))
            .await
        {
            tracing::warn!("[WinRmTransport] 删除 Shell 失败: {}", e);
        }
    }

    /// 完整执行一条命令，无论成功与否都清理 Shell
    async fn run(
        &self,
        cmd: &str,
        stdin: Option<&str>,
        relay: bool,
    ) -> Result<CommandOutput, TransportError> {
        let client = self.client()?;
        let shell_id = self.create_shell(client).await?;

        let command_id = match self.start_command(client, &shell_id, cmd).await {
            Ok(id) => id,
            Err(e) => {
                self.cleanup(client, &shell_id, None).await;
                return Err(e);
            }
        };

        let result = self
            .drive(client, &shell_id, &command_id, stdin, relay)
            .await;

        self.cleanup(client, &shell_id, Some(&command_id)).await;
        result
    }

    async fn drive(
        &self,
        client: &Client,
        shell_id: &str,
        command_id: &str,
        stdin: Option<&str>,
        relay: bool,
    ) -> Result<CommandOutput, TransportError> {
        if let Some(data) = stdin {
            self.send_stdin(client, shell_id, command_id, data).await?;
        }
        self.receive_all(client, shell_id, command_id, relay).await
    }
}

impl fmt::Display for WinRmTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[winrm] {}:{}", self.config.address, self.config.port)
    }
}

#[async_trait]
impl Transport for WinRmTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        tracing::info!("[WinRmTransport] 正在连接到 {}", self.config.endpoint_url());
        let client = self.build_client()?;
        self.request(&client, identify_envelope()).await?;
        self.client = Some(client);
        tracing::info!("[WinRmTransport] 已连接: {}", self);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            tracing::info!("[WinRmTransport] 断开连接: {}", self);
        }
    }

    async fn upload(
        &self,
        src: &Path,
        dst: &str,
        opts: &ExecOptions,
    ) -> Result<(), TransportError> {
        self.client()?;
        let content = tokio::fs::read(src)
            .await
            .map_err(|e| TransportError::TransferFailed(format!("{}: {}", src.display(), e)))?;
        tracing::debug!(
            "[WinRmTransport] 上传文件: {} -> {} ({} 字节)",
            src.display(),
            dst,
            content.len()
        );

        let target = powershell::single_quote(dst);
        let chunks: Vec<&[u8]> = if content.is_empty() {
            vec![content.as_slice()]
        } else {
            content.chunks(UPLOAD_CHUNK_SIZE).collect()
        };

        for (index, chunk) in chunks.iter().enumerate() {
            let mode = if index == 0 { "Create" } else { "Append" };
            let script = format!(
                "$b=[System.Convert]::FromBase64String('{}');$f=[System.IO.File]::Open({},[System.IO.FileMode]::{});try{{$f.Write($b,0,$b.Length)}}finally{{$f.Close()}}",
                BASE64.encode(chunk),
                target,
                mode
            );
            let output = self
                .run(&powershell::cmd(&script), None, false)
                .await
                .map_err(|e| TransportError::TransferFailed(e.to_string()))?;
            if output.exit_code != 0 || (!opts.allow_win_stderr && !output.stderr.trim().is_empty())
            {
                return Err(TransportError::TransferFailed(format!(
                    "写入 {} 失败: {}",
                    dst,
                    output.stderr.trim()
                )));
            }
        }
        Ok(())
    }

    fn is_windows(&self) -> bool {
        true
    }

    async fn exec(&self, cmd: &str, opts: &ExecOptions) -> Result<String, TransportError> {
        tracing::debug!("[WinRmTransport] 执行: {}", opts.log_command(cmd));
        let output = self.run(cmd, opts.stdin.as_deref(), false).await?;

        if let Some(logged) = opts.log_output(&output.stdout) {
            if !logged.is_empty() {
                tracing::trace!("[WinRmTransport] stdout: {}", logged);
            }
        }
        if let Some(logged) = opts.log_output(&output.stderr) {
            if !logged.is_empty() {
                tracing::trace!("[WinRmTransport] stderr: {}", logged);
            }
        }

        if output.exit_code != 0 {
            return Err(TransportError::command_failed(
                output.exit_code,
                output.stderr.trim(),
            ));
        }
        if !opts.allow_win_stderr && !output.stderr.trim().is_empty() {
            return Err(TransportError::command_failed(0, output.stderr.trim()));
        }

        Ok(if opts.capture_output {
            output.stdout
        } else {
            String::new()
        })
    }

    async fn exec_interactive(&self, cmd: &str) -> Result<(), TransportError> {
        let cmd = if cmd.is_empty() { "cmd.exe" } else { cmd };
        tracing::debug!("[WinRmTransport] 交互式执行: {}", cmd);
        let output = self.run(cmd, None, true).await?;
        if output.exit_code != 0 {
            return Err(TransportError::command_failed(
                output.exit_code,
                output.stderr.trim(),
            ));
        }
        Ok(())
    }

    fn protocol(&self) -> &'static str {
        WINRM_PROTOCOL
    }

    fn address(&self) -> String {
        self.config.address.clone()
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}
