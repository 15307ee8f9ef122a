use crate::config::config::AppConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "EDURAIL_";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 优先级（后者覆盖前者）：
    /// 1. 内置默认值
    /// 2. ./config.toml
    /// 3. `EDURAIL_` 前缀的环境变量，`__` 分隔层级，例如 `EDURAIL_LLM__MODEL`
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::load_from(default_config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        if config.corpus.path.as_os_str().is_empty() {
            return Err(ConfigValidationError::InvalidPath("corpus.path".into()));
        }

        if config.embedding.dimension == 0 {
            return Err(ConfigValidationError::InvalidDimension);
        }

        if config.embedding.batch_size == 0 {
            return Err(ConfigValidationError::InvalidBatchSize);
        }

        if config.embedding.backend == "bert" && config.embedding.model_path.is_none() {
            return Err(ConfigValidationError::InvalidPath(
                "embedding.model_path".into(),
            ));
        }

        if config.retrieval.top_k == 0 {
            return Err(ConfigValidationError::InvalidTopK);
        }

        let threshold = config.retrieval.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfigValidationError::InvalidThreshold(threshold));
        }

        if config.retrieval.max_message_chars == 0 {
            return Err(ConfigValidationError::InvalidMessageLimit);
        }

        if config.llm.endpoint.trim().is_empty() {
            return Err(ConfigValidationError::MissingLlmEndpoint);
        }

        if config.conversation.max_turns == 0 {
            return Err(ConfigValidationError::InvalidHistoryLimit("conversation.max_turns"));
        }

        if config.conversation.max_sessions == 0 {
            return Err(ConfigValidationError::InvalidHistoryLimit(
                "conversation.max_sessions",
            ));
        }

        if config.conversation.session_ttl_secs == 0 {
            return Err(ConfigValidationError::InvalidHistoryLimit(
                "conversation.session_ttl_secs",
            ));
        }

        if config.telemetry.history_capacity == 0 {
            return Err(ConfigValidationError::InvalidHistoryLimit(
                "telemetry.history_capacity",
            ));
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("服务端口无效，必须大于 0")]
    InvalidPort,

    #[error("向量维度无效，必须大于 0")]
    InvalidDimension,

    #[error("批处理大小无效，必须大于 0")]
    InvalidBatchSize,

    #[error("top_k 无效，必须大于 0")]
    InvalidTopK,

    #[error("相似度门槛必须介于 -1 与 1 之间: {0}")]
    InvalidThreshold(f32),

    #[error("讯息字数上限必须大于 0")]
    InvalidMessageLimit,

    #[error("语言模型接口地址未配置")]
    MissingLlmEndpoint,

    #[error("历史容量必须大于 0: {0}")]
    InvalidHistoryLimit(&'static str),

    #[error("配置路径无效: {0}")]
    InvalidPath(String),
}

impl From<ConfigValidationError> for crate::error::AppError {
    fn from(e: ConfigValidationError) -> Self {
        crate::error::AppError::Config(e.to_string())
    }
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.toml")
}

/// 检查配置文件是否存在
pub fn config_exists() -> bool {
    default_config_path().exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(ConfigLoader::validate(&config).is_ok());
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.similarity_threshold, 0.5);
        assert_eq!(config.retrieval.max_message_chars, 1000);
        assert_eq!(config.conversation.max_turns, 10);
        assert_eq!(config.telemetry.history_capacity, 1000);
        assert_eq!(config.llm.timeout_secs, 120);
    }

    #[test]
    fn test_load_from_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[retrieval]
top_k = 5
similarity_threshold = 0.7

[llm]
model = "qwen2"

[prompt.templates]
"職涯發展" = "{{context}} / {{query}}"
"#
        )
        .unwrap();

        let config = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.similarity_threshold, 0.7);
        assert_eq!(config.llm.model, "qwen2");
        // 未覆盖的字段保持默认值
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.conversation.max_turns, 10);
        assert_eq!(
            config.prompt.templates.get("職涯發展").map(String::as_str),
            Some("{context} / {query}")
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ConfigLoader::load_from("/nonexistent/edurail.toml").unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.retrieval.top_k = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidTopK)
        ));

        let mut config = AppConfig::default();
        config.retrieval.similarity_threshold = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidThreshold(_))
        ));

        let mut config = AppConfig::default();
        config.embedding.backend = "bert".into();
        config.embedding.model_path = None;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidPath(_))
        ));

        let mut config = AppConfig::default();
        config.conversation.max_turns = 0;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.conversation.max_sessions = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidHistoryLimit("conversation.max_sessions"))
        ));
    }
}
