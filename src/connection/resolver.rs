//! 目标系统识别
//!
//! 通过在目标上执行探测命令得到 `OsRelease`。
//!
//! ## 功能
//! - Windows：PowerShell 查询注册表
//! - Darwin：`sw_vers` 获取版本，尽力从许可协议中取产品名
//! - Linux：解析 `/etc/os-release`

use std::fmt;

use hostlink_core::OsRelease;
use hostlink_infra::powershell;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::ConnectionError;
use super::runner::Runner;

/// Darwin 探测命令
pub const DARWIN_PROBE: &str = "uname | grep -q Darwin";

/// Linux 发行版信息
pub const LINUX_OS_RELEASE: &str = "cat /etc/os-release || cat /usr/lib/os-release";

const WINDOWS_VERSION_KEY: &str = r"HKLM:\SOFTWARE\Microsoft\Windows NT\CurrentVersion";

const DARWIN_VERSION: &str = "sw_vers -productVersion";

pub(crate) const DARWIN_LICENSE_SCRAPE: &str = r#"grep "SOFTWARE LICENSE AGREEMENT FOR " "/System/Library/CoreServices/Setup Assistant.app/Contents/Resources/en.lproj/OSXSoftwareLicense.rtf""#;

static DARWIN_PRODUCT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"SOFTWARE LICENSE AGREEMENT FOR (.+?)\\?\s*$").ok());

/// 系统家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
    Darwin,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::Windows => write!(f, "windows"),
            OsFamily::Darwin => write!(f, "darwin"),
        }
    }
}

impl OsFamily {
    /// 判断系统家族
    ///
    /// 目标自报为 Windows 时不再发出 `uname` 探测。
    pub async fn detect<R: Runner + ?Sized>(runner: &R) -> OsFamily {
        if runner.is_windows() {
            return OsFamily::Windows;
        }
        if runner.exec(DARWIN_PROBE, &[]).await.is_ok() {
            return OsFamily::Darwin;
        }
        OsFamily::Linux
    }

    /// 使用对应策略获取系统信息
    pub async fn resolve<R: Runner + ?Sized>(
        &self,
        runner: &R,
    ) -> Result<OsRelease, ConnectionError> {
        match self {
            OsFamily::Linux => {
                let output = runner.exec_output(LINUX_OS_RELEASE, &[]).await?;
                Ok(parse_os_release(&output))
            }
            OsFamily::Windows => resolve_windows(runner).await,
            OsFamily::Darwin => resolve_darwin(runner).await,
        }
    }
}

/// 识别目标系统
pub async fn resolve<R: Runner + ?Sized>(runner: &R) -> Result<OsRelease, ConnectionError> {
    let family = OsFamily::detect(runner).await;
    tracing::debug!("[Resolver] 系统家族: {}", family);
    family.resolve(runner).await
}

// ============================================================================
// Linux
// ============================================================================

/// 解析 os-release 内容
///
/// 只识别 `ID`、`ID_LIKE`、`VERSION_ID`、`PRETTY_NAME`，其余键与格式错误的行忽略。
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let target = match key.trim() {
            "ID" => &mut release.id,
            "ID_LIKE" => &mut release.id_like,
            "VERSION_ID" => &mut release.version,
            "PRETTY_NAME" => &mut release.name,
            _ => continue,
        };
        *target = unquote(value);
    }

    release
}

/// 按 shell 规则去掉引号，无法解析时保留原值
fn unquote(value: &str) -> String {
    match shell_words::split(value) {
        Ok(words) if words.len() == 1 => words.into_iter().next().unwrap_or_default(),
        _ => value.to_string(),
    }
}

// ============================================================================
// Windows
// ============================================================================

pub(crate) fn registry_query(property: &str) -> String {
    powershell::cmd(&format!(
        r#"(Get-ItemProperty "{}").{}"#,
        WINDOWS_VERSION_KEY, property
    ))
}

async fn resolve_windows<R: Runner + ?Sized>(runner: &R) -> Result<OsRelease, ConnectionError> {
    let name = runner.exec_output(&registry_query("ProductName"), &[]).await?;
    let major = runner
        .exec_output(&registry_query("CurrentMajorVersionNumber"), &[])
        .await?;
    let minor = runner
        .exec_output(&registry_query("CurrentMinorVersionNumber"), &[])
        .await?;
    let build = runner
        .exec_output(&registry_query("CurrentBuild"), &[])
        .await?;

    Ok(OsRelease::new(
        "windows",
        "windows",
        format!("{}.{}.{}", major, minor, build),
        name,
    ))
}

// ============================================================================
// Darwin
// ============================================================================

/// 从许可协议行中取产品名
pub fn parse_darwin_product(line: &str) -> Option<String> {
    let regex = DARWIN_PRODUCT.as_ref()?;
    regex
        .captures(line.lines().next()?)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|product| !product.is_empty())
}

async fn resolve_darwin<R: Runner + ?Sized>(runner: &R) -> Result<OsRelease, ConnectionError> {
    let version = runner.exec_output(DARWIN_VERSION, &[]).await?;

    let name = match runner.exec_output(DARWIN_LICENSE_SCRAPE, &[]).await {
        Ok(line) => parse_darwin_product(&line)
            .map(|product| format!("{} {}", product, version))
            .unwrap_or_default(),
        Err(e) => {
            tracing::debug!("[Resolver] 未能获取 macOS 产品名: {}", e);
            String::new()
        }
    };

    Ok(OsRelease::new("darwin", "darwin", version, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU: &str = r#"PRETTY_NAME="Ubuntu 22.04.3 LTS"
NAME="Ubuntu"
VERSION_ID="22.04"
VERSION="22.04.3 LTS (Jammy Jellyfish)"
VERSION_CODENAME=jammy
ID=ubuntu
ID_LIKE=debian
HOME_URL="https://www.ubuntu.com/"
"#;

    #[test]
    fn test_parse_ubuntu() {
        let release = parse_os_release(UBUNTU);
        assert_eq!(
            release,
            OsRelease::new("ubuntu", "debian", "22.04", "Ubuntu 22.04.3 LTS")
        );
    }

    #[test]
    fn test_parse_ignores_malformed_lines() {
        let release = parse_os_release("garbage\n\nID=alpine\n# comment\nVERSION_ID=3.19.1\n");
        assert_eq!(release.id, "alpine");
        assert_eq!(release.version, "3.19.1");
        assert!(release.name.is_empty());
        assert!(release.id_like.is_empty());
    }

    #[test]
    fn test_unquote_fallback() {
        assert_eq!(unquote("'single quoted'"), "single quoted");
        assert_eq!(unquote("\"unterminated"), "\"unterminated");
        assert_eq!(unquote("two words"), "two words");
        assert_eq!(unquote(""), "");
    }

    #[test]
    fn test_value_with_equals() {
        let release = parse_os_release("PRETTY_NAME=\"a=b\"\n");
        assert_eq!(release.name, "a=b");
    }

    #[test]
    fn test_registry_query_is_encoded() {
        let cmd = registry_query("CurrentBuild");
        assert!(cmd.starts_with("powershell.exe "));
        assert!(cmd.ends_with(&powershell::encode(
            r#"(Get-ItemProperty "HKLM:\SOFTWARE\Microsoft\Windows NT\CurrentVersion").CurrentBuild"#
        )));
    }

    #[test]
    fn test_parse_darwin_product() {
        let line = r"\f0\b\fs28 \cf0 SOFTWARE LICENSE AGREEMENT FOR macOS Sonoma\";
        assert_eq!(parse_darwin_product(line).as_deref(), Some("macOS Sonoma"));
        assert!(parse_darwin_product("nothing here").is_none());
        assert!(parse_darwin_product("").is_none());
    }
}
