//! 命令执行选项
//!
//! 调用方以 `ExecOption` 列表的形式传入选项，传输层只看到折叠后的 `ExecOptions`。
//!
//! ## 功能
//! - 标准输入注入
//! - 输出捕获（`Connection::exec_output` 使用的保留选项）
//! - 提权执行标记
//! - 日志隐藏与敏感信息脱敏

use serde::{Deserialize, Serialize};

use crate::logger::{redact, sanitize_log_message};

/// 单个执行选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOption {
    /// 写入远程进程标准输入的数据
    Stdin(String),
    /// 通过已解析的提权策略包装命令
    Sudo,
    /// 捕获标准输出并返回给调用方
    CaptureOutput,
    /// 不在日志中记录命令本身
    HideCommand,
    /// 不在日志中记录命令输出
    HideOutput,
    /// 日志中需要脱敏的字符串
    Redact(String),
    /// Windows 目标上写入 stderr 但退出码为 0 时不视为失败
    AllowWinStderr,
}

/// 折叠后的执行选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOptions {
    /// 标准输入
    pub stdin: Option<String>,
    /// 是否提权
    pub sudo: bool,
    /// 是否捕获输出
    pub capture_output: bool,
    /// 是否隐藏命令
    pub hide_command: bool,
    /// 是否隐藏输出
    pub hide_output: bool,
    /// 脱敏字符串列表
    pub redact: Vec<String>,
    /// 是否容忍 Windows stderr 输出
    pub allow_win_stderr: bool,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用单个选项
    pub fn apply(&mut self, option: &ExecOption) {
        match option {
            ExecOption::Stdin(data) => self.stdin = Some(data.clone()),
            ExecOption::Sudo => self.sudo = true,
            ExecOption::CaptureOutput => self.capture_output = true,
            ExecOption::HideCommand => self.hide_command = true,
            ExecOption::HideOutput => self.hide_output = true,
            ExecOption::Redact(secret) => {
                if !secret.is_empty() {
                    self.redact.push(secret.clone());
                }
            }
            ExecOption::AllowWinStderr => self.allow_win_stderr = true,
        }
    }

    /// 设置标准输入
    pub fn with_stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// 开启输出捕获
    pub fn with_capture(mut self) -> Self {
        self.capture_output = true;
        self
    }

    /// 追加脱敏字符串
    pub fn with_redact(mut self, secret: impl Into<String>) -> Self {
        self.apply(&ExecOption::Redact(secret.into()));
        self
    }

    /// 用于日志输出的命令文本
    ///
    /// 开启 `hide_command` 时返回占位符，否则返回脱敏后的命令。
    /// 除显式登记的敏感字符串外，常见凭据写法也会被屏蔽。
    pub fn log_command(&self, cmd: &str) -> String {
        if self.hide_command {
            return "[HIDDEN]".to_string();
        }
        sanitize_log_message(&redact(cmd, &self.redact))
    }

    /// 用于日志输出的命令输出
    pub fn log_output(&self, output: &str) -> Option<String> {
        if self.hide_output {
            return None;
        }
        Some(sanitize_log_message(&redact(output, &self.redact)))
    }
}

impl<'a> FromIterator<&'a ExecOption> for ExecOptions {
    fn from_iter<I: IntoIterator<Item = &'a ExecOption>>(iter: I) -> Self {
        let mut opts = ExecOptions::default();
        for option in iter {
            opts.apply(option);
        }
        opts
    }
}

impl FromIterator<ExecOption> for ExecOptions {
    fn from_iter<I: IntoIterator<Item = ExecOption>>(iter: I) -> Self {
        let mut opts = ExecOptions::default();
        for option in iter {
            opts.apply(&option);
        }
        opts
    }
}
