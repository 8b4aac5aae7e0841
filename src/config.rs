//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VIVI__*` 覆盖（双下划线表示嵌套，
//! 如 `VIVI__DIALOGFLOW__PROJECT_ID=my-project`）。
//! 访问令牌类（OPENAI_API_KEY、DIALOGFLOW_ACCESS_TOKEN）不进配置文件，由 main 读取。

use serde::Deserialize;
use std::path::PathBuf;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub dialogflow: DialogflowSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub conversation: ConversationSection,
}

/// [server] 段：监听端口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// [dialogflow] 段：agent 坐标与语言
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialogflowSection {
    pub project_id: String,
    /// 区域，决定 REST 端点（{location}-dialogflow.googleapis.com）
    pub location: String,
    pub agent_id: String,
    pub language_code: String,
}

impl Default for DialogflowSection {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: "us-central1".to_string(),
            agent_id: String::new(),
            language_code: "pt-br".to_string(),
        }
    }
}

/// [llm] 段：生成式后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
        }
    }
}

/// [conversation] 段：历史上限、分段预算、恢复提示语
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationSection {
    /// 对话历史保留轮数（滑动窗口）
    pub max_history_turns: usize,
    /// 单条出站气泡的字符预算（WhatsApp 上限 1600）
    pub chunk_budget: usize,
    /// 暂停结构化流程后追加的恢复提示语
    pub resume_prompt: String,
    /// 含该标记的片段视为摘要，不参与分段
    pub summary_marker: String,
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            max_history_turns: 20,
            chunk_budget: 1500,
            resume_prompt: "Podemos continuar sua cotação de onde paramos? Responda \"sim\" para retomar. 😊".to_string(),
            summary_marker: "*Resumo".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 VIVI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VIVI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VIVI")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
