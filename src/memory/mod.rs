//! 会话记忆：对话历史（滑动窗口）

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
