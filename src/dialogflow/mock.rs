//! Mock 对话后端（用于测试，无需 Dialogflow）
//!
//! 按脚本顺序返回预置应答，并记录收到的事件与参数。

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::{DialogueClient, DialogueReply};

/// 记录的一次事件触发
#[derive(Debug, Clone)]
pub struct TriggeredEvent {
    pub event: String,
    pub parameters: HashMap<String, String>,
}

/// 脚本化对话后端：依次弹出预置应答
#[derive(Debug, Default)]
pub struct ScriptedDialogueClient {
    replies: Mutex<VecDeque<DialogueReply>>,
    pub events: Mutex<Vec<TriggeredEvent>>,
    pub queries: Mutex<Vec<String>>,
}

impl ScriptedDialogueClient {
    pub fn new(replies: impl IntoIterator<Item = DialogueReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            events: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn next_reply(&self) -> DialogueReply {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DialogueClient for ScriptedDialogueClient {
    async fn detect_intent(&self, _session_id: &str, text: &str) -> Result<DialogueReply, String> {
        self.queries.lock().unwrap().push(text.to_string());
        Ok(self.next_reply())
    }

    async fn trigger_event(
        &self,
        _session_id: &str,
        event: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<DialogueReply, String> {
        self.events.lock().unwrap().push(TriggeredEvent {
            event: event.to_string(),
            parameters: parameters.clone(),
        });
        Ok(self.next_reply())
    }
}
