//! Vivi - WhatsApp ↔ Dialogflow CX / 生成式 AI 桥接服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态机（Open / AwaitingFlowConfirmation / InFlow / Paused）与错误类型
//! - **dialogflow**: 结构化对话后端（Dialogflow CX REST）抽象与实现
//! - **extract**: 流程参数提取与合并（自我介绍模式 + LLM 提取）
//! - **intent**: 离题问题启发式（决定是否暂停结构化流程）
//! - **llm**: 生成式后端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话历史（滑动窗口）
//! - **session**: 会话存储（每发送者一把锁，串行处理）
//! - **twiml**: 出站消息组装（词边界分段 + TwiML 渲染）
//! - **webhook**: axum 入站路由

pub mod config;
pub mod core;
pub mod dialogflow;
pub mod extract;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod session;
pub mod twiml;
pub mod webhook;
