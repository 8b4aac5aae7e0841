//! Vivi WhatsApp 桥接服务
//!
//! 环境变量:
//! - OPENAI_API_KEY: 生成式后端 API Key
//! - DIALOGFLOW_ACCESS_TOKEN: Dialogflow CX 访问令牌（Bearer）
//! - VIVI__*: 配置覆盖（如 VIVI__DIALOGFLOW__PROJECT_ID）
//!
//! 启动: cargo run --bin vivi

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vivi::config::load_config;
use vivi::core::{ConversationEngine, DEFAULT_PERSONA_PROMPT};
use vivi::dialogflow::DialogflowCxClient;
use vivi::llm::OpenAiClient;
use vivi::session::SessionStore;
use vivi::webhook::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    // 启动诊断：确认凭据存在
    if std::env::var("OPENAI_API_KEY").is_ok() {
        tracing::info!("OPENAI_API_KEY found");
    } else {
        tracing::warn!("OPENAI_API_KEY not set, generative calls will fail");
    }
    let dialogflow_token = std::env::var("DIALOGFLOW_ACCESS_TOKEN")
        .context("DIALOGFLOW_ACCESS_TOKEN must be set")?;

    let cfg = load_config(None)?;

    let persona = [
        "config/prompts/persona.md",
        "../config/prompts/persona.md",
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .unwrap_or_else(|| DEFAULT_PERSONA_PROMPT.to_string());

    let llm = Arc::new(OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        None,
    ));
    let dialogue = Arc::new(DialogflowCxClient::new(&cfg.dialogflow, dialogflow_token));
    let store = Arc::new(SessionStore::new(cfg.conversation.max_history_turns));

    let engine = ConversationEngine::new(
        store,
        llm,
        dialogue,
        persona,
        cfg.conversation.clone(),
    );

    let state = Arc::new(AppState {
        engine,
        conversation: cfg.conversation.clone(),
    });

    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    tracing::info!("Vivi webhook server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
