//! Dialogflow CX REST 客户端
//!
//! 通过区域端点 `{location}-dialogflow.googleapis.com` 调用 sessions.detectIntent；
//! 会话路径为 projects/{p}/locations/{l}/agents/{a}/sessions/{session_id}。
//! 访问令牌从环境变量读取（Bearer）。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::DialogflowSection;

use super::types::{DialogueClient, DialogueReply, FlowStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentRequest {
    query_input: QueryInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_params: Option<QueryParams>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<EventInput>,
    language_code: String,
}

#[derive(Debug, Serialize)]
struct TextInput {
    text: String,
}

#[derive(Debug, Serialize)]
struct EventInput {
    event: String,
}

#[derive(Debug, Serialize)]
struct QueryParams {
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentResponse {
    #[serde(default)]
    query_result: QueryResult,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResult {
    #[serde(default)]
    response_messages: Vec<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    text: Option<TextMessage>,
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TextMessage {
    #[serde(default)]
    text: Vec<String>,
}

/// CX 客户端：持有 reqwest Client、端点与 agent 坐标
pub struct DialogflowCxClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    location: String,
    agent_id: String,
    language_code: String,
    access_token: String,
}

impl DialogflowCxClient {
    pub fn new(cfg: &DialogflowSection, access_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("https://{}-dialogflow.googleapis.com", cfg.location),
            project_id: cfg.project_id.clone(),
            location: cfg.location.clone(),
            agent_id: cfg.agent_id.clone(),
            language_code: cfg.language_code.clone(),
            access_token,
        }
    }

    fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}/v3/projects/{}/locations/{}/agents/{}/sessions/{}:detectIntent",
            self.endpoint, self.project_id, self.location, self.agent_id, session_id
        )
    }

    async fn detect(
        &self,
        session_id: &str,
        request: &DetectIntentRequest,
    ) -> Result<DialogueReply, String> {
        let resp = self
            .http
            .post(self.session_url(session_id))
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Dialogflow API error {}: {}", status, body));
        }

        let parsed: DetectIntentResponse = resp.json().await.map_err(|e| e.to_string())?;
        Ok(to_reply(parsed))
    }
}

/// responseMessages → DialogueReply：text 片段各自成一条气泡（内部行用 \n 连接），
/// payload 中的 flow_status 作为带外信号提取
fn to_reply(resp: DetectIntentResponse) -> DialogueReply {
    let mut reply = DialogueReply::default();
    for msg in resp.query_result.response_messages {
        if let Some(text) = msg.text {
            let joined = text.text.join("\n");
            if !joined.is_empty() {
                reply.fragments.push(joined);
            }
        }
        if let Some(payload) = msg.payload {
            if let Some(status) = payload
                .get("flow_status")
                .and_then(|v| v.as_str())
                .and_then(FlowStatus::from_str)
            {
                reply.flow_status = Some(status);
            }
        }
    }
    reply
}

#[async_trait]
impl DialogueClient for DialogflowCxClient {
    async fn detect_intent(&self, session_id: &str, text: &str) -> Result<DialogueReply, String> {
        let request = DetectIntentRequest {
            query_input: QueryInput {
                text: Some(TextInput {
                    text: text.to_string(),
                }),
                event: None,
                language_code: self.language_code.clone(),
            },
            query_params: Some(QueryParams {
                parameters: json!({ "source": "WHATSAPP" }),
            }),
        };
        self.detect(session_id, &request).await
    }

    async fn trigger_event(
        &self,
        session_id: &str,
        event: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<DialogueReply, String> {
        tracing::info!(event, ?parameters, "Triggering Dialogflow event");
        let request = DetectIntentRequest {
            query_input: QueryInput {
                text: None,
                event: Some(EventInput {
                    event: event.to_string(),
                }),
                language_code: self.language_code.clone(),
            },
            query_params: Some(QueryParams {
                parameters: json!(parameters),
            }),
        };
        self.detect(session_id, &request).await
    }
}
