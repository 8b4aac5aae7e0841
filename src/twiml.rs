//! 出站消息组装：TwiML（Twilio 消息 XML）
//!
//! 逻辑片段各自成一条 <Message> 气泡；超出字符预算的片段按词边界切分，
//! 不在词中间断开；含摘要标记的片段整条发送，不参与切分。

/// 片段列表 → 气泡列表：应用切分策略
pub fn assemble(fragments: &[String], budget: usize, summary_marker: &str) -> Vec<String> {
    let mut bubbles = Vec::new();
    for fragment in fragments {
        if fragment.is_empty() {
            continue;
        }
        if fragment.contains(summary_marker) {
            // 摘要消息豁免切分
            bubbles.push(fragment.clone());
            continue;
        }
        bubbles.extend(split_fragment(fragment, budget));
    }
    bubbles
}

/// 按词边界切分：每块不超过 budget，除非单个词本身超长
pub fn split_fragment(text: &str, budget: usize) -> Vec<String> {
    if text.chars().count() <= budget {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_len == 0 {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= budget {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// 气泡列表 → TwiML 文档
pub fn render(bubbles: &[String]) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>");
    for bubble in bubbles {
        doc.push_str("<Message>");
        doc.push_str(&escape_xml(bubble));
        doc.push_str("</Message>");
    }
    doc.push_str("</Response>");
    doc
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
