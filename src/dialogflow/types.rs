//! 结构化对话后端抽象
//!
//! detect_intent 发送自由文本，trigger_event 以命名事件 + 参数包启动/恢复流程；
//! 返回的 DialogueReply 含有序的消息片段与带外 flow_status 信号。

use std::collections::HashMap;

use async_trait::async_trait;

/// 流程带外信号（responseMessages 中 custom payload 的 flow_status 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// 流程正常结束
    Finished,
    /// 用户取消了流程
    Cancelled,
    /// 流程无法处理，交回生成式后端
    FallbackGenerative,
}

impl FlowStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "finished" => Some(Self::Finished),
            "cancelled" => Some(Self::Cancelled),
            "fallback_generative" => Some(Self::FallbackGenerative),
            _ => None,
        }
    }
}

/// 对话后端的一次应答
#[derive(Debug, Clone, Default)]
pub struct DialogueReply {
    /// 消息片段，每个片段对应一条出站气泡（片段内多行已用 \n 连接）
    pub fragments: Vec<String>,
    pub flow_status: Option<FlowStatus>,
}

/// 结构化对话后端 trait
#[async_trait]
pub trait DialogueClient: Send + Sync {
    /// 发送自由文本，按会话路径查询
    async fn detect_intent(&self, session_id: &str, text: &str) -> Result<DialogueReply, String>;

    /// 触发命名事件（流程启动/恢复），携带参数包
    async fn trigger_event(
        &self,
        session_id: &str,
        event: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<DialogueReply, String>;
}
