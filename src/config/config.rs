use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务地址
    pub host: String,
    /// 服务端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// 知识库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// 学群资料 CSV 路径
    pub path: PathBuf,
    /// 组合文本是否包含相关学群
    pub include_related_groups: bool,
    /// 组合文本是否包含链接
    pub include_link: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("college_details_ALL.csv"),
            include_related_groups: false,
            include_link: false,
        }
    }
}

/// 嵌入模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding 后端类型: "hashing"、"bert" 或 "ollama"
    pub backend: String,
    /// 模型名称
    pub model_name: String,
    /// 模型目录（bert 后端需要 config.json / tokenizer.json / model.safetensors）
    pub model_path: Option<PathBuf>,
    /// 向量维度
    pub dimension: usize,
    /// 批处理大小
    pub batch_size: usize,
    /// 是否使用 GPU
    pub use_gpu: bool,
    /// Ollama 服务器地址
    pub ollama_url: String,
    /// Ollama 请求超时（秒）
    pub ollama_timeout: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "hashing".into(),
            model_name: "bert-base-chinese".into(),
            model_path: None,
            dimension: 384,
            batch_size: 16,
            use_gpu: false,
            ollama_url: "http://127.0.0.1:11434".into(),
            ollama_timeout: 60,
        }
    }
}

/// 检索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 返回的学群数量
    pub top_k: usize,
    /// 使用检索上下文的相似度门槛
    pub similarity_threshold: f32,
    /// 讯息最大字数
    pub max_message_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_threshold: 0.5,
            max_message_chars: crate::security::validation::DEFAULT_MAX_MESSAGE_CHARS,
        }
    }
}

/// 上游语言模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat 接口地址
    pub endpoint: String,
    /// 模型名称
    pub model: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 系统指令
    pub system_prompt: String,
    /// 是否附带对话历史
    pub include_history: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/api/chat".into(),
            model: "llama3".into(),
            timeout_secs: 120,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            include_history: false,
        }
    }
}

/// 默认系统指令
pub const DEFAULT_SYSTEM_PROMPT: &str = "您是一個回覆繁體中文的學習與職涯輔導平台\"EduRail\"的專業輔導師助理 EduRailAI。\n\
請遵守以下回覆原則：\n\
1. 回覆使用繁體中文。\n\
2. 使用條列式呈現資訊。\n\
3. 回覆簡潔明確，避免冗長。";

/// 提示词配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptConfig {
    /// 覆盖内置模板，键为类别名称（中文标签或 snake_case）
    pub templates: BTreeMap<String, String>,
    /// 附加到所有提示词末尾的额外指示
    pub extra_instructions: Option<String>,
}

/// 对话历史配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// 每个会话保留的最大轮次数
    pub max_turns: usize,
    /// 同时保留的会话数上限
    pub max_sessions: usize,
    /// 会话闲置多久后可被回收（秒）
    pub session_ttl_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_sessions: 10_000,
            session_ttl_secs: 3600,
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// 内存中保留的指标快照数量
    pub history_capacity: usize,
    /// JSONL 日志目录（None 表示不写入）
    pub log_dir: Option<PathBuf>,
    /// 是否采集系统资源
    pub probe_enabled: bool,
    /// 是否采集 GPU 指标
    pub gpu_enabled: bool,
    /// 单次资源探测的时限（毫秒）
    pub probe_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            log_dir: Some(PathBuf::from("./logs")),
            probe_enabled: true,
            gpu_enabled: true,
            probe_timeout_ms: 2000,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化日志格式
    pub structured: bool,
    /// 日志文件路径
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: Some(PathBuf::from("./logs")),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 知识库配置
    pub corpus: CorpusConfig,
    /// 嵌入模型配置
    pub embedding: EmbeddingConfig,
    /// 检索配置
    pub retrieval: RetrievalConfig,
    /// 上游语言模型配置
    pub llm: LlmConfig,
    /// 提示词配置
    pub prompt: PromptConfig,
    /// 对话历史配置
    pub conversation: ConversationConfig,
    /// 遥测配置
    pub telemetry: TelemetryConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 应用名称
    pub app_name: String,
    /// 环境
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            corpus: CorpusConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            prompt: PromptConfig::default(),
            conversation: ConversationConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
            app_name: "edurail".into(),
            environment: "development".into(),
        }
    }
}

impl AppConfig {
    /// 测试用配置：不写日志文件，不探测系统资源
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.environment = "test".into();
        config.telemetry.log_dir = None;
        config.telemetry.probe_enabled = false;
        config.telemetry.gpu_enabled = false;
        config.logging.log_dir = None;
        config
    }
}
