//! LLM 层：生成式后端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::ScriptedLlmClient;
pub use openai::OpenAiClient;
pub use traits::LlmClient;
