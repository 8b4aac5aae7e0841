//! Webhook 入站：Twilio 表单 → 状态机 → TwiML
//!
//! POST / 接收 form-encoded 的 From（带渠道前缀的发送者地址）与 Body（消息文本）；
//! 会话 ID = From 去掉 whatsapp: 前缀。缺字段 400；未处理失败 500 + 固定道歉语。

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;

use crate::config::ConversationSection;
use crate::core::ConversationEngine;
use crate::twiml;

/// 未处理失败时的固定道歉语
pub const APOLOGY_TEXT: &str = "Ocorreu um erro inesperado. Por favor, tente novamente.";

/// 服务状态
pub struct AppState {
    pub engine: ConversationEngine,
    pub conversation: ConversationSection,
}

/// Twilio 入站表单（只消费 From 与 Body）
#[derive(Debug, Deserialize)]
pub struct TwilioForm {
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
}

/// 创建路由
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// POST / - 接收 Twilio 消息
async fn webhook_receive(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TwilioForm>,
) -> Response {
    let Some(from) = form.from.filter(|f| !f.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing From").into_response();
    };
    let Some(body) = form.body.filter(|b| !b.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing Body").into_response();
    };

    let session_id = from.strip_prefix("whatsapp:").unwrap_or(&from);
    tracing::info!(session_id, "Message received");

    match state.engine.handle_message(session_id, &body).await {
        Ok(fragments) => {
            let bubbles = twiml::assemble(
                &fragments,
                state.conversation.chunk_budget,
                &state.conversation.summary_marker,
            );
            xml_response(StatusCode::OK, twiml::render(&bubbles))
        }
        Err(e) => {
            tracing::error!(session_id, "Turn failed: {}", e);
            xml_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                twiml::render(&[APOLOGY_TEXT.to_string()]),
            )
        }
    }
}

fn xml_response(status: StatusCode, doc: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/xml")], doc).into_response()
}
