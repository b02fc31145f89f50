//! 命令模板参数
//!
//! `execf` / `exec_outputf` 的参数列表中既有执行选项也有格式化参数，
//! 按类型拆分后再做 printf 风格替换。替换不做任何 shell 转义。

use hostlink_core::ExecOption;

/// 模板参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// 执行选项
    Opt(ExecOption),
    /// 格式化参数
    Arg(String),
    /// 嵌套列表，拆分时展开
    List(Vec<Param>),
}

impl From<ExecOption> for Param {
    fn from(option: ExecOption) -> Self {
        Param::Opt(option)
    }
}

impl From<Vec<Param>> for Param {
    fn from(list: Vec<Param>) -> Self {
        Param::List(list)
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Arg(value)
    }
}

impl From<&String> for Param {
    fn from(value: &String) -> Self {
        Param::Arg(value.clone())
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Arg(value.to_string())
    }
}

macro_rules! impl_param_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Param {
                fn from(value: $ty) -> Self {
                    Param::Arg(value.to_string())
                }
            }
        )*
    };
}

impl_param_from_display!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, char);

/// 构建参数列表
///
/// ```
/// use hostlink::params;
/// use hostlink::ExecOption;
///
/// let p = params!["/tmp", 3, ExecOption::HideOutput];
/// assert_eq!(p.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::connection::Param>::new()
    };
    ($($item:expr),+ $(,)?) => {
        ::std::vec![$($crate::connection::Param::from($item)),+]
    };
}

/// 将参数拆分为执行选项与格式化参数，嵌套列表按顺序展开
pub fn group_params(params: Vec<Param>) -> (Vec<ExecOption>, Vec<String>) {
    let mut options = Vec::new();
    let mut args = Vec::new();
    collect(params, &mut options, &mut args);
    (options, args)
}

fn collect(params: Vec<Param>, options: &mut Vec<ExecOption>, args: &mut Vec<String>) {
    for param in params {
        match param {
            Param::Opt(option) => options.push(option),
            Param::Arg(arg) => args.push(arg),
            Param::List(list) => collect(list, options, args),
        }
    }
}

/// printf 风格替换
///
/// 支持 `%s`、`%v`、`%d`、`%q`、`%%`。参数不足的占位符输出 `%!<verb>(MISSING)`，
/// 多余参数忽略，`%d` 遇到非整数输出 `%!d(string=...)`。
pub fn sprintf(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };

        match verb {
            '%' => out.push('%'),
            's' | 'v' | 'd' | 'q' => match args.next() {
                None => {
                    out.push_str("%!");
                    out.push(verb);
                    out.push_str("(MISSING)");
                }
                Some(arg) => match verb {
                    'q' => out.push_str(&format!("{:?}", arg)),
                    'd' if arg.trim().parse::<i64>().is_err() => {
                        out.push_str(&format!("%!d(string={})", arg))
                    }
                    _ => out.push_str(arg),
                },
            },
            other => {
                out.push('%');
                out.push(other);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_group_params_flattens_in_order() {
        let params = params![
            "a",
            ExecOption::HideOutput,
            vec![Param::from(1), Param::from(ExecOption::Sudo), Param::from(vec![Param::from("b")])],
            true,
        ];
        let (options, args) = group_params(params);
        assert_eq!(options, vec![ExecOption::HideOutput, ExecOption::Sudo]);
        assert_eq!(args, vec!["a", "1", "b", "true"]);
    }

    #[test]
    fn test_empty_params() {
        let (options, args) = group_params(params![]);
        assert!(options.is_empty());
        assert!(args.is_empty());
    }

    #[test]
    fn test_sprintf_verbs() {
        let args = vec!["/tmp/a b".to_string(), "42".to_string(), "x\"y".to_string()];
        assert_eq!(
            sprintf("ls %s; exit %d; echo %q; 100%%", &args),
            "ls /tmp/a b; exit 42; echo \"x\\\"y\"; 100%"
        );
    }

    #[test]
    fn test_sprintf_missing_and_extra() {
        assert_eq!(sprintf("%s %v", &["one".to_string()]), "one %!v(MISSING)");
        assert_eq!(
            sprintf("only %s", &["a".to_string(), "b".to_string()]),
            "only a"
        );
    }

    #[test]
    fn test_sprintf_no_escaping() {
        let args = vec!["$(rm -rf /)".to_string()];
        assert_eq!(sprintf("echo %s", &args), "echo $(rm -rf /)");
    }

    #[test]
    fn test_sprintf_edge_cases() {
        assert_eq!(sprintf("100%", &[]), "100%!(NOVERB)");
        assert_eq!(sprintf("%x", &[]), "%x");
        assert_eq!(sprintf("%d", &["abc".to_string()]), "%!d(string=abc)");
        assert_eq!(sprintf("plain", &[]), "plain");
    }
}
