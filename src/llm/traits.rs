//! 生成式后端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete 接收 role 标注的
//! 消息列表（含 system），返回首个候选的文本。

use async_trait::async_trait;

use crate::memory::Message;

/// 生成式后端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
