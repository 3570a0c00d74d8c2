//! 引擎配置管理模块
//!
//! 提供配置加载、验证和环境变量覆盖，支持多种配置源

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// 引擎配置常量
pub mod constants {
    /// 默认每批最大输入token数（系统提示词+片段标签）
    pub const DEFAULT_MAX_INPUT_TOKENS: usize = 4000;
    /// 片段标签间的分隔符
    pub const SEGMENT_SEPARATOR: &str = "\n\n";
    /// token计数失败时的字符数启发式除数
    pub const CHARS_PER_TOKEN_FALLBACK: usize = 3;
    /// 未指定模型时使用的默认编码模型
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

    pub const DEFAULT_PROCESS_INTERVAL_MS: u64 = 100;
    pub const DEFAULT_MAX_CONCURRENT: usize = 4;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
    pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 120;
    /// 任务优先级层级数，优先级取值 [0, PRIORITY_LEVELS)
    pub const DEFAULT_PRIORITY_LEVELS: u8 = 10;

    pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

    pub const CONFIG_PATHS: &[&str] = &[
        "transflow.toml",
        ".transflow.toml",
        "~/.config/transflow/config.toml",
        "/etc/transflow/config.toml",
    ];
}

/// 任务队列配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// 工作循环tick间隔
    #[serde(with = "duration_ms_serde")]
    pub process_interval: Duration,

    /// 最大并发任务数（同时在途的AI调用上限）
    pub max_concurrent: usize,

    /// 最大重试次数
    pub max_retries: u32,

    /// 重试前延迟
    #[serde(with = "duration_ms_serde")]
    pub retry_delay: Duration,

    /// 单任务超时时间
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// 优先级层级数
    pub priority_levels: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            process_interval: Duration::from_millis(constants::DEFAULT_PROCESS_INTERVAL_MS),
            max_concurrent: constants::DEFAULT_MAX_CONCURRENT,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(constants::DEFAULT_RETRY_DELAY_MS),
            timeout: Duration::from_secs(constants::DEFAULT_TASK_TIMEOUT_SECS),
            priority_levels: constants::DEFAULT_PRIORITY_LEVELS,
        }
    }
}

/// 批次规划配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// 每批最大输入token数
    pub max_input_tokens: usize,

    /// 规划时使用的模型名（决定token编码方式）
    pub model: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: constants::DEFAULT_MAX_INPUT_TOKENS,
            model: constants::DEFAULT_MODEL.to_string(),
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// 启用缓存；关闭时所有操作为无副作用直通
    pub enabled: bool,

    /// 缓存容量（条目数）
    pub capacity: usize,

    /// 默认TTL
    #[serde(with = "duration_serde")]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: constants::DEFAULT_CACHE_CAPACITY,
            default_ttl: Duration::from_secs(constants::DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// 监控配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// 启用指标收集
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
        }
    }
}

/// AI服务凭据
///
/// 由组合根显式注入，核心代码不读取进程环境变量。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCredentials {
    pub provider: String,
    pub api_key: String,
    pub model: String,
}

impl AiCredentials {
    /// 是否配置了非空API密钥
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// 引擎总配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 任务队列配置
    pub queue: QueueConfig,

    /// 批次规划配置
    pub batch: BatchConfig,

    /// 缓存配置
    pub cache: CacheConfig,

    /// 监控配置
    pub monitoring: MonitoringConfig,
}

/// Duration的秒级序列化模块
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Duration的毫秒级序列化模块
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// 配置管理器
///
/// 加载顺序：内置默认值 → 配置文件（按搜索路径取第一个存在的）→
/// `TRANSFLOW_*` 环境变量覆盖。
pub struct ConfigManager {
    config: EngineConfig,
    config_path: Option<String>,
}

impl ConfigManager {
    /// 加载配置
    pub fn new() -> EngineResult<Self> {
        Self::load_dotenv();

        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        let mut config_path = None;
        for path in constants::CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(File::with_name(&expanded));
                config_path = Some(expanded.to_string());
                tracing::info!("加载配置文件: {}", expanded);
                break;
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TRANSFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        Self::validate(&config)?;

        Ok(Self {
            config,
            config_path,
        })
    }

    /// 直接使用给定配置（测试与嵌入场景）
    pub fn from_config(config: EngineConfig) -> EngineResult<Self> {
        Self::validate(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    /// 获取当前配置
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 配置文件路径（若从文件加载）
    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    /// 加载 .env 文件（存在即加载，不存在静默跳过）
    fn load_dotenv() {
        for env_file in &[".env.local", ".env"] {
            if Path::new(env_file).exists() {
                if let Err(e) = dotenv::from_filename(env_file) {
                    tracing::warn!("加载 {} 失败: {}", env_file, e);
                } else {
                    tracing::debug!("已加载环境文件: {}", env_file);
                }
            }
        }
    }

    /// 验证配置合法性
    fn validate(config: &EngineConfig) -> EngineResult<()> {
        if config.queue.max_concurrent == 0 {
            return Err(EngineError::Config("max_concurrent 必须大于0".to_string()));
        }
        if config.queue.priority_levels == 0 {
            return Err(EngineError::Config("priority_levels 必须大于0".to_string()));
        }
        if config.batch.max_input_tokens == 0 {
            return Err(EngineError::Config(
                "max_input_tokens 必须大于0".to_string(),
            ));
        }
        if config.cache.enabled && config.cache.capacity == 0 {
            return Err(EngineError::Config(
                "启用缓存时 capacity 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(ConfigManager::from_config(config).is_ok());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = EngineConfig::default();
        config.queue.max_concurrent = 0;
        assert!(matches!(
            ConfigManager::from_config(config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn blank_api_key_counts_as_absent() {
        let mut credentials = AiCredentials {
            provider: "openai".to_string(),
            api_key: "sk-test".to_string(),
            model: "gpt-4o-mini".to_string(),
        };
        assert!(credentials.has_api_key());

        credentials.api_key = "   ".to_string();
        assert!(!credentials.has_api_key());
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let config = EngineConfig::default();
        let text = toml::to_string(&config).expect("serialize should succeed");
        let parsed: EngineConfig = toml::from_str(&text).expect("parse should succeed");
        assert_eq!(parsed.queue.max_retries, config.queue.max_retries);
        assert_eq!(parsed.batch.max_input_tokens, config.batch.max_input_tokens);
    }
}
