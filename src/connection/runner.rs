//! 命令执行接口
//!
//! 系统识别与提权探测只需要"执行命令"的能力，通过此 trait 与连接解耦。

use async_trait::async_trait;
use hostlink_core::ExecOption;

use super::error::ConnectionError;

#[async_trait]
pub trait Runner: Send + Sync {
    /// 目标是否为 Windows
    fn is_windows(&self) -> bool;

    /// 执行命令，只关心是否成功
    async fn exec(&self, cmd: &str, opts: &[ExecOption]) -> Result<(), ConnectionError>;

    /// 执行命令并返回去除首尾空白的标准输出
    async fn exec_output(&self, cmd: &str, opts: &[ExecOption]) -> Result<String, ConnectionError>;
}
