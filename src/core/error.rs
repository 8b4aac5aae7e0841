//! 桥接错误类型
//!
//! 后端调用失败不重试：整轮失败，会话状态不落盘，用户收到固定道歉语。
//! 生成式回复中的畸形 JSON 不是错误，按纯文本回退处理。

use thiserror::Error;

/// 一次入站消息处理中可能出现的错误
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Dialogflow error: {0}")]
    Dialogflow(String),

    /// 入站请求缺字段 → HTTP 400
    #[error("Missing request field: {0}")]
    MissingField(&'static str),

    #[error("Config error: {0}")]
    Config(String),
}
