//! 纯数据类型

pub mod exec_options;
pub mod os_release;

pub use exec_options::{ExecOption, ExecOptions};
pub use os_release::OsRelease;
