//! 意图启发式：判断用户是否在问开放性问题
//!
//! 只用来决定是否暂停结构化流程，不做计费/安全判断；误判可接受。
//! 规则按顺序：空文本否；以 ? 结尾是；首词或次词是疑问词是；否则否。

/// 疑问词集合（葡语 + 英语口语等价词）
const INTERROGATIVES: &[&str] = &[
    // português
    "quem", "que", "qual", "quais", "quanto", "quanta", "quantos", "quantas", "onde", "aonde",
    "quando", "como", "por", "porque",
    // english
    "who", "what", "where", "when", "why", "how", "which", "whose", "can", "could", "do", "does",
    "is", "are",
];

/// 用户文本是否是开放性/离题问题
pub fn is_generic_question(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    let lower = trimmed.to_lowercase();
    if lower.ends_with('?') {
        return true;
    }

    let mut tokens = lower.split_whitespace();
    let first = tokens.next();
    let second = tokens.next();

    if first.is_some_and(|t| INTERROGATIVES.contains(&t)) {
        return true;
    }
    // 次词命中覆盖前置连词（"e quando...", "mas como..."）
    second.is_some_and(|t| INTERROGATIVES.contains(&t))
}
