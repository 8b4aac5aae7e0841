//! 对话流层：结构化对话后端（Dialogflow CX）抽象与实现

pub mod client;
pub mod mock;
pub mod types;

pub use client::DialogflowCxClient;
pub use mock::ScriptedDialogueClient;
pub use types::{DialogueClient, DialogueReply, FlowStatus};
