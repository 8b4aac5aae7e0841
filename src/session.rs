//! 会话存储
//!
//! 每个发送者一条 ConversationSession（模式、历史、待确认动作、流程参数、最后提问）。
//! 存储层把会话包成 Arc<Mutex<...>>：同一发送者的并发消息在会话锁上串行，
//! 不同发送者互不影响。进程生命周期内驻留，无持久化。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::memory::ConversationMemory;

/// 会话模式，任一时刻恰好一个
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 开放对话（生成式后端）
    Open,
    /// 已提议进入结构化流程，等待用户确认
    AwaitingFlowConfirmation,
    /// 结构化流程进行中（对话后端）
    InFlow,
    /// 流程被离题问题暂停
    Paused,
}

/// 分类器提议进入流程时捕获的动作
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub action: String,
    /// 提议时发给用户的过渡语
    pub response: String,
    pub parameters: HashMap<String, String>,
}

/// 单个发送者的会话状态
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub mode: Mode,
    pub history: ConversationMemory,
    /// 仅在 AwaitingFlowConfirmation 有效
    pub pending_action: Option<PendingAction>,
    /// 流程参数，单调合并累积；回到 Open 时清空
    pub flow_parameters: HashMap<String, String>,
    /// 最后一条出站提问，Paused → InFlow 时重放
    pub last_prompt: Option<String>,
}

impl ConversationSession {
    pub fn new(max_history_turns: usize) -> Self {
        Self {
            mode: Mode::Open,
            history: ConversationMemory::new(max_history_turns),
            pending_action: None,
            flow_parameters: HashMap::new(),
            last_prompt: None,
        }
    }

    /// 流程结束/取消时整体清空：历史、参数、提问全清，模式回 Open
    pub fn reset(&mut self) {
        self.mode = Mode::Open;
        self.history.clear();
        self.pending_action = None;
        self.flow_parameters.clear();
        self.last_prompt = None;
    }

    /// 回到开放对话：丢弃流程上下文，保留历史
    pub fn leave_flow(&mut self) {
        self.mode = Mode::Open;
        self.pending_action = None;
        self.flow_parameters.clear();
        self.last_prompt = None;
    }
}

/// 内存会话存储：session_id → Arc<Mutex<ConversationSession>>
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationSession>>>>,
    max_history_turns: usize,
}

impl SessionStore {
    pub fn new(max_history_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history_turns,
        }
    }

    /// 获取会话，不存在则以默认状态（Open、空历史）惰性创建
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<ConversationSession>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(session_id) {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ConversationSession::new(self.max_history_turns)))
            })
            .clone()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_create_defaults() {
        let store = SessionStore::new(20);
        assert_eq!(store.active_count().await, 0);

        let session = store.get_or_create("5511999990000").await;
        let guard = session.lock().await;
        assert_eq!(guard.mode, Mode::Open);
        assert!(guard.history.is_empty());
        assert!(guard.pending_action.is_none());
        assert!(guard.flow_parameters.is_empty());
        assert_eq!(store.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_sender_same_session() {
        let store = SessionStore::new(20);
        let a = store.get_or_create("x").await;
        {
            let mut guard = a.lock().await;
            guard.mode = Mode::InFlow;
        }
        let b = store.get_or_create("x").await;
        assert_eq!(b.lock().await.mode, Mode::InFlow);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let mut session = ConversationSession::new(5);
        session.mode = Mode::InFlow;
        session
            .history
            .push(crate::memory::Message::user("quero viajar"));
        session
            .flow_parameters
            .insert("destino".to_string(), "Fortaleza".to_string());
        session.last_prompt = Some("Qual a data?".to_string());

        session.reset();
        assert_eq!(session.mode, Mode::Open);
        assert!(session.history.is_empty());
        assert!(session.flow_parameters.is_empty());
        assert!(session.last_prompt.is_none());
    }
}
