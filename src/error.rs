//! 运行期错误分类
//!
//! 控制循环内的所有失败都被就地吸收并记录：坏快照跳过本 tick，引擎失败下个
//! tick 重试，解码失败把原始文本带警告标记上报。任何一种都不会终止循环；
//! 只有启动期的配置错误（在 main 中处理）才允许退出进程。

use thiserror::Error;

use crate::decision::DecodeFailure;

/// 单个 tick 内可能出现的错误（均为非致命）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 快照文本无法解析为结构化数据（缺字段不算，只有语法错误才算）
    #[error("Malformed snapshot: {0}")]
    MalformedInput(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// 引擎调用超过配置时长，按超时处理，下个 tick 正常开始
    #[error("Engine call timed out")]
    Timeout,

    /// 引擎回复不符合当前文法，附原始文本与原因码
    #[error("Decode failure: {0}")]
    Decode(DecodeFailure),

    #[error("Config error: {0}")]
    Config(String),
}
