//! PowerShell 命令构造
//!
//! 脚本以 UTF-16LE + Base64 形式通过 `-EncodedCommand` 传递，避免多层引号转义。

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// PowerShell 可执行文件及固定参数
const POWERSHELL_PREFIX: &str =
    "powershell.exe -NonInteractive -ExecutionPolicy Bypass -NoProfile -EncodedCommand";

/// 将脚本编码为 `-EncodedCommand` 参数值
pub fn encode(script: &str) -> String {
    let bytes: Vec<u8> = script
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    BASE64.encode(bytes)
}

/// 构造执行脚本的完整命令行
pub fn cmd(script: &str) -> String {
    format!("{} {}", POWERSHELL_PREFIX, encode(script))
}

/// 转义为单引号字符串字面量（包含外层引号）
pub fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
