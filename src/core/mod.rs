//! 核心层：桥接错误类型与会话状态机

pub mod engine;
pub mod error;

pub use engine::{ConversationEngine, DEFAULT_PERSONA_PROMPT};
pub use error::BridgeError;
