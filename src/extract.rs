//! 参数提取器
//!
//! 从自由文本提取结构化流程参数（person、origem、destino、datas、contagens）。
//! 自我介绍短语（"meu nome é..."、"me chamo..."）优先走本地模式匹配填 person；
//! 其余字段用生成式后端 + 提取提示词，取回复中第一个配平的 JSON 对象。
//! 解析失败静默降级为"无参数"，只留日志。合并策略：同名覆盖、缺失保留。

use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::Message;

const EXTRACTION_PROMPT: &str = "Você extrai dados de viagem de mensagens de clientes. \
Responda APENAS com um objeto JSON contendo os campos encontrados na mensagem, dentre: \
person (nome do cliente), origem, destino, data_ida, data_volta, adultos, criancas. \
Omita campos ausentes. Se nada for encontrado, responda {}.";

/// 自我介绍前缀（小写比较）；命中后取其后的词作为 person
const PERSON_PATTERNS: &[&str] = &[
    "meu nome é ",
    "meu nome e ",
    "me chamo ",
    "pode me chamar de ",
    "me chame de ",
    "my name is ",
    "call me ",
    "i'm ",
    "i am ",
    "sou o ",
    "sou a ",
];

/// 提取器：持有生成式后端
pub struct ParameterExtractor {
    llm: Arc<dyn LlmClient>,
}

impl ParameterExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 从用户文本（与可选的上一条系统回复）提取参数
    ///
    /// person 的模式匹配结果优先于 LLM 提取的同名字段。
    pub async fn extract(
        &self,
        text: &str,
        prior_reply: Option<&str>,
    ) -> HashMap<String, String> {
        let mut params = self.extract_via_llm(text, prior_reply).await;
        if let Some(person) = detect_person(text) {
            params.insert("person".to_string(), person);
        }
        params
    }

    async fn extract_via_llm(
        &self,
        text: &str,
        prior_reply: Option<&str>,
    ) -> HashMap<String, String> {
        let mut messages = vec![Message::system(EXTRACTION_PROMPT)];
        if let Some(reply) = prior_reply {
            messages.push(Message::assistant(reply));
        }
        messages.push(Message::user(text));

        let output = match self.llm.complete(&messages).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Parameter extraction LLM call failed: {}", e);
                return HashMap::new();
            }
        };

        let Some(block) = extract_json_block(&output) else {
            tracing::debug!("No JSON object in extraction reply");
            return HashMap::new();
        };

        match serde_json::from_str::<serde_json::Value>(block) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k, s)))
                .collect(),
            Ok(_) | Err(_) => {
                tracing::debug!("Extraction reply is not a JSON object: {}", block);
                HashMap::new()
            }
        }
    }
}

/// 合并提取结果：新键覆盖同名旧键，新结果中缺失的键保留旧值（幂等）
pub fn merge_parameters(into: &mut HashMap<String, String>, new: HashMap<String, String>) {
    for (k, v) in new {
        into.insert(k, v);
    }
}

/// 自我介绍模式匹配：返回介绍短语之后、标点之前的名字
pub fn detect_person(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for pattern in PERSON_PATTERNS {
        let Some(byte_idx) = lower.find(pattern) else {
            continue;
        };
        // 在原文中按字符偏移取名字，保留大小写
        let start = lower[..byte_idx].chars().count() + pattern.chars().count();
        let name: String = text
            .chars()
            .skip(start)
            .take_while(|c| !matches!(c, '.' | ',' | '!' | '?' | ';' | '\n'))
            .collect();
        let name = name.trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    None
}

/// 从 LLM 输出中取 JSON 块：优先 ```json 围栏，否则第一个配平的 `{`..`}` 片段
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let inner = rest
            .find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or_else(|| rest.trim());
        return Some(inner);
    }

    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    for (offset, c) in trimmed[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&trimmed[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn scalar_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
