//! 提权策略
//!
//! 连接建立后按固定顺序执行探测命令，第一个成功的探测决定提权方式。
//!
//! ## 功能
//! - POSIX：已是 root > 免密 sudo > 免密 doas
//! - Windows：已是管理员时使用 runas
//! - 按策略改写命令

use std::fmt;

use serde::{Deserialize, Serialize};

use super::runner::Runner;

/// 提权策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    /// 已具备权限，命令原样执行
    Noop,
    Sudo,
    Doas,
    /// Windows
    Runas,
}

/// POSIX 探测顺序
pub const POSIX_PROBES: [(Elevation, &str); 3] = [
    (Elevation::Noop, r#"[ "$(id -u)" = 0 ]"#),
    (Elevation::Sudo, "sudo -n true"),
    (Elevation::Doas, "doas -n true"),
];

/// Windows 探测命令
pub const WINDOWS_PROBE: &str = r#"whoami | findstr /i "administrator""#;

impl Elevation {
    /// 按策略改写命令
    pub fn format(&self, cmd: &str) -> String {
        match self {
            Elevation::Noop => cmd.to_string(),
            Elevation::Sudo => sudo_wrap(cmd),
            Elevation::Doas => format!("doas -s -- {}", cmd),
            Elevation::Runas => format!("runas /user:Administrator {}", cmd),
        }
    }

    /// 探测可用的提权方式，探测失败不视为错误
    pub async fn probe<R: Runner + ?Sized>(runner: &R, windows: bool) -> Option<Elevation> {
        if windows {
            return match runner.exec(WINDOWS_PROBE, &[]).await {
                Ok(()) => Some(Elevation::Runas),
                Err(e) => {
                    tracing::debug!("[Elevation] 当前用户不是管理员: {}", e);
                    None
                }
            };
        }

        for (elevation, check) in POSIX_PROBES {
            match runner.exec(check, &[]).await {
                Ok(()) => return Some(elevation),
                Err(e) => tracing::trace!("[Elevation] 探测失败 `{}`: {}", check, e),
            }
        }
        None
    }
}

impl fmt::Display for Elevation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elevation::Noop => write!(f, "noop"),
            Elevation::Sudo => write!(f, "sudo"),
            Elevation::Doas => write!(f, "doas"),
            Elevation::Runas => write!(f, "runas"),
        }
    }
}

/// sudo 包装
///
/// 开头的 `KEY=VALUE` 环境变量赋值逐个转义后放在 `sudo -s` 与 `--` 之间，
/// 其余部分原样跟在 `--` 之后。无法分词或没有赋值时退化为 `sudo -s -- <cmd>`。
pub fn sudo_wrap(cmd: &str) -> String {
    let fallback = || format!("sudo -s -- {}", cmd);

    let Ok(words) = shell_words::split(cmd) else {
        return fallback();
    };
    let count = words.iter().take_while(|word| word.contains('=')).count();
    if count == 0 {
        return fallback();
    }
    let Some(rest) = skip_words(cmd, count) else {
        return fallback();
    };

    let assignments: Vec<String> = words[..count]
        .iter()
        .map(|word| shell_escape::unix::escape(word.as_str().into()).into_owned())
        .collect();

    format!("sudo -s {} -- {}", assignments.join(" "), rest)
        .trim_end()
        .to_string()
}

/// shell 分词使用的词间分隔符，与 `shell_words::split` 一致
const WORD_SEPARATORS: [char; 3] = [' ', '\t', '\n'];

/// 跳过开头的 `n` 个 shell 词，返回剩余原文
fn skip_words(cmd: &str, n: usize) -> Option<&str> {
    let mut rest = cmd.trim_start_matches(WORD_SEPARATORS);

    for _ in 0..n {
        let mut quote: Option<char> = None;
        let mut end = rest.len();
        let mut chars = rest.char_indices();

        while let Some((i, c)) = chars.next() {
            match quote {
                None if WORD_SEPARATORS.contains(&c) => {
                    end = i;
                    break;
                }
                None if c == '\'' || c == '"' => quote = Some(c),
                None if c == '\\' => {
                    chars.next();
                }
                Some('"') if c == '\\' => {
                    chars.next();
                }
                Some(q) if c == q => quote = None,
                _ => {}
            }
        }

        if quote.is_some() {
            return None;
        }
        rest = rest[end..].trim_start_matches(WORD_SEPARATORS);
    }

    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sudo_plain_command() {
        assert_eq!(sudo_wrap("echo hi"), "sudo -s -- echo hi");
    }

    #[test]
    fn test_sudo_keeps_env_before_separator() {
        let out = sudo_wrap("FOO=1 echo hi");
        assert!(out.starts_with("sudo -s "));
        assert!(out.contains("FOO=1"));
        assert!(out.ends_with(" -- echo hi"));
        let (before, _) = out.split_once(" -- ").unwrap();
        assert!(before.contains("FOO=1"));
    }

    #[test]
    fn test_sudo_quotes_assignment_values() {
        let out = sudo_wrap("MSG='hello world' BAR=2 printenv MSG");
        assert!(out.ends_with(" -- printenv MSG"));
        let (before, _) = out.split_once(" -- ").unwrap();
        assert_eq!(
            shell_words::split(before).unwrap(),
            vec!["sudo", "-s", "MSG=hello world", "BAR=2"]
        );
    }

    #[test]
    fn test_sudo_remainder_verbatim() {
        let out = sudo_wrap("A=1 sh -c 'echo \"$HOME\"' | tee /tmp/x");
        assert!(out.ends_with(" -- sh -c 'echo \"$HOME\"' | tee /tmp/x"));
    }

    #[test]
    fn test_sudo_unbalanced_quotes_fallback() {
        assert_eq!(sudo_wrap("FOO='x echo"), "sudo -s -- FOO='x echo");
    }

    #[test]
    fn test_other_formatters() {
        assert_eq!(Elevation::Noop.format("id"), "id");
        assert_eq!(Elevation::Doas.format("id"), "doas -s -- id");
        assert_eq!(
            Elevation::Runas.format("dir"),
            "runas /user:Administrator dir"
        );
    }

    #[test]
    fn test_probe_order() {
        let order: Vec<Elevation> = POSIX_PROBES.iter().map(|(e, _)| *e).collect();
        assert_eq!(order, vec![Elevation::Noop, Elevation::Sudo, Elevation::Doas]);
    }

    #[test]
    fn test_skip_words() {
        assert_eq!(skip_words("A=1 B=\"x y\" run it", 2), Some("run it"));
        assert_eq!(skip_words("  A=1   run", 1), Some("run"));
        assert_eq!(skip_words("A=1", 1), Some(""));
        assert_eq!(skip_words("A='1", 1), None);
    }

    #[test]
    fn test_sudo_non_ascii_space_inside_word() {
        let cmd = "FOO=1\u{a0}BAR echo hi";
        assert_eq!(shell_words::split(cmd).unwrap().len(), 3);
        assert_eq!(skip_words(cmd, 1), Some("echo hi"));
        assert_eq!(sudo_wrap(cmd), "sudo -s 'FOO=1\u{a0}BAR' -- echo hi");
    }

    proptest! {
        #[test]
        fn prop_plain_commands_use_separator(cmd in "[a-z][a-z0-9 ./-]{0,40}") {
            prop_assert_eq!(sudo_wrap(&cmd), format!("sudo -s -- {}", cmd));
        }

        #[test]
        fn prop_assignments_precede_separator(
            key in "[A-Z][A-Z_]{0,8}",
            value in "[a-z0-9]{0,8}",
            tail in "[a-z][a-z0-9 ]{0,20}",
        ) {
            let cmd = format!("{}={} {}", key, value, tail);
            let out = sudo_wrap(&cmd);
            let (before, after) = out.split_once(" -- ").unwrap();
            let expected = format!("{}={}", key, value);
            prop_assert_eq!(
                shell_words::split(before).unwrap(),
                vec!["sudo".to_string(), "-s".to_string(), expected]
            );
            prop_assert_eq!(after, tail.trim_end());
        }

        #[test]
        fn prop_skip_words_agrees_with_split(cmd in "[a-zA-Z0-9=\u{a0}\u{3000}' \"\t\n]{0,40}") {
            let Ok(words) = shell_words::split(&cmd) else {
                return Ok(());
            };
            for n in 0..=words.len() {
                let rest = skip_words(&cmd, n);
                prop_assert!(rest.is_some());
                prop_assert_eq!(shell_words::split(rest.unwrap_or_default()).unwrap(), words[n..].to_vec());
            }
        }
    }
}
