//! 会话状态机（编排器）
//!
//! 每条入站消息按当前模式决定：转发生成式后端、转发对话后端、暂停流程答离题
//! 问题、或恢复暂停的流程。四个模式：Open / AwaitingFlowConfirmation / InFlow /
//! Paused。整轮持有会话锁（同一发送者串行），状态只在后端往返成功后写回。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::ConversationSection;
use crate::core::BridgeError;
use crate::dialogflow::{DialogueClient, DialogueReply, FlowStatus};
use crate::extract::{self, ParameterExtractor};
use crate::intent::is_generic_question;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::session::{ConversationSession, Mode, PendingAction, SessionStore};

/// 流程启动事件（对话后端侧的入口事件名）
const START_FLOW_EVENT: &str = "iniciar_cotacao";
/// 流程恢复事件：无 last_prompt 可重放时携带累积参数重新进入
const RESUME_FLOW_EVENT: &str = "retomar_cotacao";

/// Vivi 人设与信封约定：要求生成式后端只回 tagged JSON（text 或 action），
/// 消除自然文本里偶发花括号与真实动作载荷之间的歧义。
pub const DEFAULT_PERSONA_PROMPT: &str = r#"Você é a Vivi, uma assistente de viagens virtual da agência 'Viaje Fácil Brasil'. Sua personalidade é amigável, proativa e prestativa. Converse naturalmente, entenda as necessidades do usuário e dê sugestões.

Responda SEMPRE com um único objeto JSON, em um destes dois formatos:

1. Conversa normal:
{"type": "text", "text": "sua resposta ao usuário"}

2. Quando o usuário confirmar que quer uma cotação, inicie a coleta de dados:
{"type": "action", "action": "NOME_DA_ACAO", "response": "a frase que você dirá ao usuário para iniciar a coleta", "parameters": {"destino": "..."}}

Nomes de ação válidos: "iniciar_cotacao_passagem" ou "iniciar_cotacao_cruzeiro".
Inclua em "parameters" apenas os dados já mencionados pelo usuário."#;

/// 生成式回复信封：要么 text 要么 action，其余一律按纯文本回退
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyEnvelope {
    Action {
        action: String,
        response: String,
        #[serde(default)]
        parameters: HashMap<String, String>,
    },
    Text {
        text: String,
    },
}

#[derive(Debug)]
enum GenerativeReply {
    Action(PendingAction),
    Text(String),
}

/// 解析生成式输出：有效 action 信封（action 非空）→ Action；
/// text 信封 → 其内容；其余（含解析失败）→ 原文按纯文本（fail-open）
fn parse_generative_reply(output: &str) -> GenerativeReply {
    let Some(block) = extract::extract_json_block(output) else {
        return GenerativeReply::Text(output.trim().to_string());
    };

    match serde_json::from_str::<ReplyEnvelope>(block) {
        Ok(ReplyEnvelope::Action {
            action,
            response,
            parameters,
        }) if !action.is_empty() => GenerativeReply::Action(PendingAction {
            action,
            response,
            parameters,
        }),
        Ok(ReplyEnvelope::Text { text }) => GenerativeReply::Text(text),
        _ => GenerativeReply::Text(output.trim().to_string()),
    }
}

/// 确认匹配：去首尾空白、大小写不敏感的精确等值，不做模糊是/否分类
pub fn is_affirmative(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    t == "sim" || t == "yes"
}

/// 动作名 → 对话后端的 produto_escolhido 参数
fn product_for_action(action: &str) -> Option<&'static str> {
    match action {
        "iniciar_cotacao_passagem" => Some("passagem"),
        "iniciar_cotacao_cruzeiro" => Some("cruzeiro"),
        _ => None,
    }
}

/// 会话状态机：持有会话存储与两个外部后端
pub struct ConversationEngine {
    store: Arc<SessionStore>,
    llm: Arc<dyn LlmClient>,
    dialogue: Arc<dyn DialogueClient>,
    extractor: ParameterExtractor,
    persona: String,
    cfg: ConversationSection,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<SessionStore>,
        llm: Arc<dyn LlmClient>,
        dialogue: Arc<dyn DialogueClient>,
        persona: String,
        cfg: ConversationSection,
    ) -> Self {
        let extractor = ParameterExtractor::new(llm.clone());
        Self {
            store,
            llm,
            dialogue,
            extractor,
            persona,
            cfg,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// 处理一条入站消息，返回出站消息片段
    ///
    /// 整轮持有该会话的锁；在草稿副本上推进状态，仅当所有后端往返成功时写回，
    /// 失败的轮次不留下半应用的状态转移。
    pub async fn handle_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Vec<String>, BridgeError> {
        let session = self.store.get_or_create(session_id).await;
        let mut guard = session.lock().await;

        let mut draft = guard.clone();
        let fragments = self.step(session_id, &mut draft, text).await?;
        *guard = draft;

        Ok(fragments)
    }

    async fn step(
        &self,
        session_id: &str,
        draft: &mut ConversationSession,
        text: &str,
    ) -> Result<Vec<String>, BridgeError> {
        tracing::info!(session_id, mode = ?draft.mode, "Handling message");
        match draft.mode {
            Mode::Open => self.open_turn(draft, text).await,
            Mode::AwaitingFlowConfirmation => self.confirmation_turn(session_id, draft, text).await,
            Mode::InFlow => self.in_flow_turn(session_id, draft, text).await,
            Mode::Paused => self.paused_turn(session_id, draft, text).await,
        }
    }

    /// Open：生成式后端应答；有效 action 信封则提议进入流程
    async fn open_turn(
        &self,
        draft: &mut ConversationSession,
        text: &str,
    ) -> Result<Vec<String>, BridgeError> {
        draft.history.push(Message::user(text));
        let output = self.complete_with_history(draft, None).await?;

        match parse_generative_reply(&output) {
            GenerativeReply::Action(pending) => {
                tracing::info!(action = %pending.action, "Flow proposed");
                let response = pending.response.clone();
                draft.history.push(Message::assistant(&response));
                draft.pending_action = Some(pending);
                draft.mode = Mode::AwaitingFlowConfirmation;
                Ok(vec![response])
            }
            GenerativeReply::Text(reply) => {
                draft.history.push(Message::assistant(&reply));
                Ok(vec![reply])
            }
        }
    }

    /// AwaitingFlowConfirmation：精确的 sim/yes 启动流程，其余丢弃提议回到 Open
    async fn confirmation_turn(
        &self,
        session_id: &str,
        draft: &mut ConversationSession,
        text: &str,
    ) -> Result<Vec<String>, BridgeError> {
        if is_affirmative(text) && draft.pending_action.is_some() {
            let pending = draft.pending_action.take().unwrap();
            extract::merge_parameters(&mut draft.flow_parameters, pending.parameters);
            if let Some(produto) = product_for_action(&pending.action) {
                draft
                    .flow_parameters
                    .insert("produto_escolhido".to_string(), produto.to_string());
            }

            let reply = self
                .dialogue
                .trigger_event(session_id, START_FLOW_EVENT, &draft.flow_parameters)
                .await
                .map_err(BridgeError::Dialogflow)?;

            draft.history.push(Message::user(text));
            Ok(self.apply_dialogue_reply(draft, reply))
        } else {
            // 未确认：丢弃提议，生成式后端给一句自然的承接
            tracing::info!("Flow proposal declined");
            draft.leave_flow();
            draft.history.push(Message::user(text));
            let note = "O usuário não confirmou o início da cotação. Reconheça naturalmente e continue a conversa.";
            let output = self.complete_with_history(draft, Some(note)).await?;
            let reply = match parse_generative_reply(&output) {
                GenerativeReply::Text(t) => t,
                GenerativeReply::Action(a) => a.response,
            };
            draft.history.push(Message::assistant(&reply));
            Ok(vec![reply])
        }
    }

    /// InFlow：离题问题暂停流程，其余文本转发对话后端
    async fn in_flow_turn(
        &self,
        session_id: &str,
        draft: &mut ConversationSession,
        text: &str,
    ) -> Result<Vec<String>, BridgeError> {
        if is_generic_question(text) {
            tracing::info!("Pausing flow for generic question");
            draft.history.push(Message::user(text));
            let answer = self.generic_answer(draft).await?;
            draft.history.push(Message::assistant(&answer));
            draft.mode = Mode::Paused;
            return Ok(vec![answer, self.cfg.resume_prompt.clone()]);
        }

        // 自我介绍优先填 person，即使当前问题不是问名字
        if let Some(person) = extract::detect_person(text) {
            draft
                .flow_parameters
                .insert("person".to_string(), person);
        }

        let reply = self
            .dialogue
            .detect_intent(session_id, text)
            .await
            .map_err(BridgeError::Dialogflow)?;

        if reply.flow_status == Some(FlowStatus::FallbackGenerative) {
            // 流程侧放弃本句，交回生成式后端，流程保持原位
            draft.history.push(Message::user(text));
            let answer = self.generic_answer(draft).await?;
            draft.history.push(Message::assistant(&answer));
            return Ok(vec![answer]);
        }

        draft.history.push(Message::user(text));
        Ok(self.apply_dialogue_reply(draft, reply))
    }

    /// Paused：sim/yes 重放最后提问（或携带参数恢复流程），其余答题并留在 Paused
    async fn paused_turn(
        &self,
        session_id: &str,
        draft: &mut ConversationSession,
        text: &str,
    ) -> Result<Vec<String>, BridgeError> {
        if is_affirmative(text) {
            if let Some(prompt) = draft.last_prompt.clone() {
                draft.history.push(Message::user(text));
                draft.history.push(Message::assistant(&prompt));
                draft.mode = Mode::InFlow;
                return Ok(vec![prompt]);
            }

            // 无提问可重放：用累积参数重新进入流程
            let reply = self
                .dialogue
                .trigger_event(session_id, RESUME_FLOW_EVENT, &draft.flow_parameters)
                .await
                .map_err(BridgeError::Dialogflow)?;
            draft.history.push(Message::user(text));
            return Ok(self.apply_dialogue_reply(draft, reply));
        }

        draft.history.push(Message::user(text));
        let answer = self.generic_answer(draft).await?;

        // 离题期间也可能冒出流程数据（"aliás, meu nome é Ana"），提取并合并
        let extracted = self
            .extractor
            .extract(text, draft.last_prompt.as_deref())
            .await;
        extract::merge_parameters(&mut draft.flow_parameters, extracted);

        draft.history.push(Message::assistant(&answer));
        Ok(vec![answer, self.cfg.resume_prompt.clone()])
    }

    /// 对话后端应答落到会话上：finished/cancelled 整体清空回 Open，
    /// 否则记录 last_prompt 并进入/停留 InFlow
    fn apply_dialogue_reply(
        &self,
        draft: &mut ConversationSession,
        reply: DialogueReply,
    ) -> Vec<String> {
        match reply.flow_status {
            Some(FlowStatus::Finished) | Some(FlowStatus::Cancelled) => {
                tracing::info!(status = ?reply.flow_status, "Flow ended, clearing session");
                draft.reset();
            }
            _ => {
                if let Some(last) = reply.fragments.last() {
                    draft.last_prompt = Some(last.clone());
                    draft.history.push(Message::assistant(last));
                }
                draft.mode = Mode::InFlow;
            }
        }
        reply.fragments
    }

    /// 以人设 + 历史调用生成式后端；extra_note 作为附加 system 指令
    async fn complete_with_history(
        &self,
        draft: &ConversationSession,
        extra_note: Option<&str>,
    ) -> Result<String, BridgeError> {
        let mut messages = vec![Message::system(&self.persona)];
        if let Some(note) = extra_note {
            messages.push(Message::system(note));
        }
        messages.extend(draft.history.messages().iter().cloned());
        self.llm
            .complete(&messages)
            .await
            .map_err(BridgeError::Llm)
    }

    /// 直接回答离题问题（信封里的 text，action 回退到其过渡语）
    async fn generic_answer(&self, draft: &ConversationSession) -> Result<String, BridgeError> {
        let note = "Responda diretamente à pergunta do usuário, em texto curto.";
        let output = self.complete_with_history(draft, Some(note)).await?;
        Ok(match parse_generative_reply(&output) {
            GenerativeReply::Text(t) => t,
            GenerativeReply::Action(a) => a.response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogflow::ScriptedDialogueClient;
    use crate::llm::ScriptedLlmClient;

    fn engine(
        llm_replies: Vec<&str>,
        dialogue_replies: Vec<DialogueReply>,
    ) -> (ConversationEngine, Arc<ScriptedDialogueClient>) {
        let llm = Arc::new(ScriptedLlmClient::new(llm_replies));
        let dialogue = Arc::new(ScriptedDialogueClient::new(dialogue_replies));
        let store = Arc::new(SessionStore::new(20));
        let engine = ConversationEngine::new(
            store,
            llm,
            dialogue.clone(),
            DEFAULT_PERSONA_PROMPT.to_string(),
            ConversationSection::default(),
        );
        (engine, dialogue)
    }

    fn flow_reply(fragments: &[&str], status: Option<FlowStatus>) -> DialogueReply {
        DialogueReply {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            flow_status: status,
        }
    }

    async fn mode_of(engine: &ConversationEngine, id: &str) -> Mode {
        engine.store().get_or_create(id).await.lock().await.mode
    }

    #[test]
    fn test_affirmative_exact_match() {
        assert!(is_affirmative("sim"));
        assert!(is_affirmative(" Sim "));
        assert!(is_affirmative("SIM"));
        assert!(is_affirmative("yes"));
        assert!(!is_affirmative("sim, mas queria perguntar"));
        assert!(!is_affirmative("não"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn test_parse_action_envelope() {
        let output = r#"{"type": "action", "action": "iniciar_cotacao_passagem", "response": "Vamos lá!", "parameters": {"destino": "Fortaleza"}}"#;
        match parse_generative_reply(output) {
            GenerativeReply::Action(p) => {
                assert_eq!(p.action, "iniciar_cotacao_passagem");
                assert_eq!(p.parameters["destino"], "Fortaleza");
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_text_envelope_and_fallback() {
        match parse_generative_reply(r#"{"type": "text", "text": "Olá!"}"#) {
            GenerativeReply::Text(t) => assert_eq!(t, "Olá!"),
            other => panic!("expected text, got {:?}", other),
        }
        // 信封外的花括号按纯文本回退，不按动作误触发
        match parse_generative_reply("Uso chaves {assim} às vezes") {
            GenerativeReply::Text(t) => assert_eq!(t, "Uso chaves {assim} às vezes"),
            other => panic!("expected text, got {:?}", other),
        }
        // 空 action 不算动作
        match parse_generative_reply(r#"{"type": "action", "action": "", "response": "x"}"#) {
            GenerativeReply::Text(_) => {}
            other => panic!("expected text fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_action_proposal() {
        let (engine, _) = engine(
            vec![
                r#"{"type": "action", "action": "iniciar_cotacao_passagem", "response": "Com certeza! Vou iniciar a cotação.", "parameters": {"destino": "Fortaleza"}}"#,
            ],
            vec![],
        );

        let fragments = engine
            .handle_message("5511", "queria cotar uma passagem pra Fortaleza")
            .await
            .unwrap();
        assert_eq!(fragments, vec!["Com certeza! Vou iniciar a cotação.".to_string()]);

        let session = engine.store().get_or_create("5511").await;
        let guard = session.lock().await;
        assert_eq!(guard.mode, Mode::AwaitingFlowConfirmation);
        let pending = guard.pending_action.as_ref().unwrap();
        assert_eq!(pending.parameters["destino"], "Fortaleza");
    }

    #[tokio::test]
    async fn test_open_plain_text_stays_open() {
        let (engine, _) = engine(vec![r#"{"type": "text", "text": "Temos promoções sim!"}"#], vec![]);
        let fragments = engine.handle_message("u", "tem promoção").await.unwrap();
        assert_eq!(fragments, vec!["Temos promoções sim!".to_string()]);
        assert_eq!(mode_of(&engine, "u").await, Mode::Open);
    }

    #[tokio::test]
    async fn test_confirmation_triggers_start_event() {
        let (engine, dialogue) = engine(
            vec![
                r#"{"type": "action", "action": "iniciar_cotacao_passagem", "response": "Vou iniciar!", "parameters": {"destino": "Fortaleza"}}"#,
            ],
            vec![flow_reply(&["Qual a data de ida?"], None)],
        );

        engine.handle_message("u", "pode cotar pra mim?").await.unwrap();
        let fragments = engine.handle_message("u", "Sim").await.unwrap();
        assert_eq!(fragments, vec!["Qual a data de ida?".to_string()]);
        assert_eq!(mode_of(&engine, "u").await, Mode::InFlow);

        let events = dialogue.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "iniciar_cotacao");
        assert_eq!(events[0].parameters["destino"], "Fortaleza");
        assert_eq!(events[0].parameters["produto_escolhido"], "passagem");
    }

    #[tokio::test]
    async fn test_declined_confirmation_returns_to_open() {
        let (engine, dialogue) = engine(
            vec![
                r#"{"type": "action", "action": "iniciar_cotacao_cruzeiro", "response": "Vou iniciar!"}"#,
                r#"{"type": "text", "text": "Sem problemas! Me avise quando quiser."}"#,
            ],
            vec![],
        );

        engine.handle_message("u", "cota um cruzeiro?").await.unwrap();
        let fragments = engine.handle_message("u", "agora não").await.unwrap();
        assert_eq!(fragments, vec!["Sem problemas! Me avise quando quiser.".to_string()]);

        let session = engine.store().get_or_create("u").await;
        let guard = session.lock().await;
        assert_eq!(guard.mode, Mode::Open);
        assert!(guard.pending_action.is_none());
        assert!(guard.flow_parameters.is_empty());
        assert!(dialogue.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_flow_question_pauses() {
        let (engine, _) = engine(
            vec![
                r#"{"type": "action", "action": "iniciar_cotacao_passagem", "response": "Vou iniciar!"}"#,
                r#"{"type": "text", "text": "A capital do Japão é Tóquio."}"#,
            ],
            vec![flow_reply(&["Qual a data de ida?"], None)],
        );

        engine.handle_message("u", "cota pra mim?").await.unwrap();
        engine.handle_message("u", "sim").await.unwrap();
        let fragments = engine
            .handle_message("u", "qual a capital do Japão?")
            .await
            .unwrap();

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], "A capital do Japão é Tóquio.");
        assert!(fragments[1].contains("sim"));
        assert_eq!(mode_of(&engine, "u").await, Mode::Paused);
    }

    #[tokio::test]
    async fn test_paused_affirmative_replays_last_prompt() {
        let (engine, _) = engine(
            vec![
                r#"{"type": "action", "action": "iniciar_cotacao_passagem", "response": "Vou iniciar!"}"#,
                r#"{"type": "text", "text": "Tóquio."}"#,
            ],
            vec![flow_reply(&["Qual a data de ida?"], None)],
        );

        engine.handle_message("u", "cota pra mim?").await.unwrap();
        engine.handle_message("u", "sim").await.unwrap();
        engine.handle_message("u", "qual a capital do Japão?").await.unwrap();
        let fragments = engine.handle_message("u", "sim").await.unwrap();

        assert_eq!(fragments, vec!["Qual a data de ida?".to_string()]);
        assert_eq!(mode_of(&engine, "u").await, Mode::InFlow);
    }

    #[tokio::test]
    async fn test_paused_other_text_merges_parameters() {
        let (engine, _) = engine(
            vec![
                r#"{"type": "action", "action": "iniciar_cotacao_passagem", "response": "Vou iniciar!"}"#,
                r#"{"type": "text", "text": "Tóquio."}"#,
                // 离题回答
                r#"{"type": "text", "text": "Prazer, Ana!"}"#,
                // 提取器调用
                r#"{"person": "Ana"}"#,
            ],
            vec![flow_reply(&["Qual a data de ida?"], None)],
        );

        engine.handle_message("u", "cota pra mim?").await.unwrap();
        engine.handle_message("u", "sim").await.unwrap();
        engine.handle_message("u", "qual a capital do Japão?").await.unwrap();
        let fragments = engine.handle_message("u", "aliás, meu nome é Ana").await.unwrap();

        assert_eq!(fragments.len(), 2);
        let session = engine.store().get_or_create("u").await;
        let guard = session.lock().await;
        assert_eq!(guard.mode, Mode::Paused);
        assert_eq!(guard.flow_parameters["person"], "Ana");
    }

    #[tokio::test]
    async fn test_completion_signal_clears_session() {
        let (engine, _) = engine(
            vec![
                r#"{"type": "action", "action": "iniciar_cotacao_passagem", "response": "Vou iniciar!"}"#,
            ],
            vec![
                flow_reply(&["Qual a data de ida?"], None),
                flow_reply(&["Atendimento encerrado"], Some(FlowStatus::Finished)),
            ],
        );

        engine.handle_message("u", "cota pra mim?").await.unwrap();
        engine.handle_message("u", "sim").await.unwrap();
        let fragments = engine.handle_message("u", "dia 12 de setembro").await.unwrap();
        assert_eq!(fragments, vec!["Atendimento encerrado".to_string()]);

        let session = engine.store().get_or_create("u").await;
        let guard = session.lock().await;
        assert_eq!(guard.mode, Mode::Open);
        assert!(guard.history.is_empty());
        assert!(guard.flow_parameters.is_empty());
        assert!(guard.last_prompt.is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_state_untouched() {
        struct FailingDialogue;

        #[async_trait::async_trait]
        impl DialogueClient for FailingDialogue {
            async fn detect_intent(
                &self,
                _session_id: &str,
                _text: &str,
            ) -> Result<DialogueReply, String> {
                Err("quota exceeded".to_string())
            }

            async fn trigger_event(
                &self,
                _session_id: &str,
                _event: &str,
                _parameters: &HashMap<String, String>,
            ) -> Result<DialogueReply, String> {
                Err("quota exceeded".to_string())
            }
        }

        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"type": "action", "action": "iniciar_cotacao_passagem", "response": "Vou iniciar!"}"#,
        ]));
        let store = Arc::new(SessionStore::new(20));
        let engine = ConversationEngine::new(
            store,
            llm,
            Arc::new(FailingDialogue),
            DEFAULT_PERSONA_PROMPT.to_string(),
            ConversationSection::default(),
        );

        engine.handle_message("u", "cota pra mim?").await.unwrap();
        let before = {
            let session = engine.store().get_or_create("u").await;
            let guard = session.lock().await;
            (guard.mode, guard.history.len())
        };

        let result = engine.handle_message("u", "sim").await;
        assert!(matches!(result, Err(BridgeError::Dialogflow(_))));

        // 失败的轮次不留状态：模式与历史不变，pending 仍在
        let session = engine.store().get_or_create("u").await;
        let guard = session.lock().await;
        assert_eq!((guard.mode, guard.history.len()), before);
        assert!(guard.pending_action.is_some());
    }
}
