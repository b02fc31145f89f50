//! 日志管理模块
//!
//! 基于 tracing 的日志初始化，以及命令日志的脱敏工具。
use tracing_subscriber::EnvFilter;

/// 需要脱敏的替换文本
pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 默认过滤指令，`RUST_LOG` 优先
    pub level: String,
    /// 是否输出 target
    pub with_target: bool,
    /// 是否使用 ANSI 颜色
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// 使用指定过滤级别创建配置
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }
}

/// 安装全局 tracing 订阅器
///
/// 日志写入 stderr。重复调用不会报错，返回 `false` 表示已有订阅器。
pub fn init_logging(config: &LogConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// 将消息中出现的每个敏感字符串替换为 `[REDACTED]`
pub fn redact(message: &str, secrets: &[String]) -> String {
    let mut sanitized = message.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        sanitized = sanitized.replace(secret.as_str(), REDACTED);
    }
    sanitized
}

/// 屏蔽常见凭据形式
///
/// 覆盖 `Bearer <token>` 与 `password=<value>` 两种写法。
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    for marker in ["Bearer ", "password="] {
        let mut search_from = 0;
        while let Some(pos) = sanitized[search_from..].find(marker) {
            let start = search_from + pos + marker.len();
            let end = sanitized[start..]
                .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '&')
                .map(|offset| start + offset)
                .unwrap_or(sanitized.len());
            search_from = start;
            if end > start {
                sanitized.replace_range(start..end, "***");
                search_from += 3;
            }
        }
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_bearer_token() {
        let input = "Authorization: Bearer abcDEF123 end";
        let output = sanitize_log_message(input);
        assert_eq!(output, "Authorization: Bearer *** end");
    }

    #[test]
    fn test_sanitize_password_pair() {
        let input = "connect user=admin password=hunter2&port=22";
        let output = sanitize_log_message(input);
        assert_eq!(output, "connect user=admin password=***&port=22");
    }

    #[test]
    fn test_plain_text_unchanged() {
        let input = "这是一段普通日志，不包含任何敏感字段。";
        let output = sanitize_log_message(input);
        assert_eq!(output, input);
    }

    #[test]
    fn test_redact_all_occurrences() {
        let secrets = vec!["tok".to_string(), String::new()];
        assert_eq!(
            redact("tok and tok again", &secrets),
            "[REDACTED] and [REDACTED] again"
        );
    }

    #[test]
    fn test_init_logging_twice() {
        let config = LogConfig::with_level("debug");
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }

    proptest! {
        #[test]
        fn prop_redact_removes_secret(
            prefix in "[a-z ]{0,12}",
            secret in "[a-z]{3,8}",
            suffix in "[a-z ]{0,12}",
        ) {
            let message = format!("{}{}{}", prefix, secret, suffix);
            let output = redact(&message, &[secret.clone()]);
            prop_assert!(!output.contains(&secret));
            prop_assert!(output.contains("[REDACTED]"));
        }
    }
}
