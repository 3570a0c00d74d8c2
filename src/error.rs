//! 编排引擎统一错误处理
//!
//! 提供结构化错误类型和错误分类机制

use std::fmt;

use thiserror::Error;

/// 编排引擎错误类型
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// 输入验证错误（调用方参数非法，不入队）
    #[error("输入无效: {0}")]
    Validation(String),

    /// 权限错误（操作者缺少管理员/审校者角色）
    #[error("权限不足: {0}")]
    Permission(String),

    /// 状态冲突错误（当前状态下不允许该操作）
    #[error("状态冲突: {0}")]
    StateConflict(String),

    /// AI适配器错误（调用失败或被拒绝）
    #[error("AI服务错误: {0}")]
    Adapter(String),

    /// 响应解析错误（AI输出格式异常）
    #[error("解析错误: {0}")]
    Parsing(String),

    /// 容量错误（单个片段超出token预算）
    #[error("容量超限: {0}")]
    Capacity(String),

    /// 超时错误
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 任务队列错误
    #[error("任务队列错误: {0}")]
    Queue(String),

    /// 缓存错误
    #[error("缓存错误: {0}")]
    Cache(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 持久化错误
    #[error("存储错误: {0}")]
    Storage(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl EngineError {
    /// 检查错误是否可重试
    ///
    /// 队列层依据此方法决定失败任务是否值得再次调度。
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Adapter(_) => true,
            EngineError::Timeout(_) => true,
            EngineError::Queue(_) => true,
            EngineError::Cache(_) => true,
            EngineError::Storage(_) => true,
            EngineError::Validation(_) => false,
            EngineError::Permission(_) => false,
            EngineError::StateConflict(_) => false,
            EngineError::Parsing(_) => false,
            EngineError::Capacity(_) => false,
            EngineError::Config(_) => false,
            EngineError::Internal(_) => false,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EngineError::Validation(_) => ErrorSeverity::Info,
            EngineError::Permission(_) => ErrorSeverity::Info,
            EngineError::StateConflict(_) => ErrorSeverity::Info,
            EngineError::Adapter(_) => ErrorSeverity::Error,
            EngineError::Parsing(_) => ErrorSeverity::Warning,
            EngineError::Capacity(_) => ErrorSeverity::Warning,
            EngineError::Timeout(_) => ErrorSeverity::Warning,
            EngineError::Queue(_) => ErrorSeverity::Error,
            EngineError::Cache(_) => ErrorSeverity::Warning,
            EngineError::Config(_) => ErrorSeverity::Critical,
            EngineError::Storage(_) => ErrorSeverity::Error,
            EngineError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Validation(_) => ErrorCategory::Input,
            EngineError::Permission(_) => ErrorCategory::Permission,
            EngineError::StateConflict(_) => ErrorCategory::State,
            EngineError::Adapter(_) => ErrorCategory::Service,
            EngineError::Parsing(_) => ErrorCategory::Parsing,
            EngineError::Capacity(_) => ErrorCategory::Capacity,
            EngineError::Timeout(_) => ErrorCategory::Timeout,
            EngineError::Queue(_) => ErrorCategory::Queue,
            EngineError::Cache(_) => ErrorCategory::Cache,
            EngineError::Config(_) => ErrorCategory::Configuration,
            EngineError::Storage(_) => ErrorCategory::Storage,
            EngineError::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Input,
    Permission,
    State,
    Service,
    Parsing,
    Capacity,
    Timeout,
    Queue,
    Cache,
    Configuration,
    Storage,
    Internal,
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(error: toml::de::Error) -> Self {
        EngineError::Config(format!("TOML解析错误: {}", error))
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(error: config::ConfigError) -> Self {
        EngineError::Config(format!("配置加载错误: {}", error))
    }
}

impl From<tokio::time::error::Elapsed> for EngineError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        EngineError::Timeout(format!("异步操作超时: {}", error))
    }
}

/// 错误结果类型别名
pub type EngineResult<T> = Result<T, EngineError>;

/// 错误处理助手函数
pub mod helpers {
    use super::*;

    /// 按严重程度记录并返回错误
    pub fn log_error<T>(error: EngineError) -> EngineResult<T> {
        match error.severity() {
            ErrorSeverity::Info => tracing::info!("引擎提示: {}", error),
            ErrorSeverity::Warning => tracing::warn!("引擎警告: {}", error),
            ErrorSeverity::Error => tracing::error!("引擎错误: {}", error),
            ErrorSeverity::Critical => tracing::error!("引擎严重错误: {}", error),
        }

        Err(error)
    }

    /// 创建输入验证错误
    pub fn validation_error<T: fmt::Display>(msg: T) -> EngineError {
        EngineError::Validation(msg.to_string())
    }

    /// 创建权限错误
    pub fn permission_error<T: fmt::Display>(msg: T) -> EngineError {
        EngineError::Permission(msg.to_string())
    }

    /// 创建状态冲突错误
    pub fn state_conflict<T: fmt::Display>(msg: T) -> EngineError {
        EngineError::StateConflict(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(EngineError::Adapter("连接重置".into()).is_retryable());
        assert!(EngineError::Timeout("30秒".into()).is_retryable());
        assert!(!EngineError::Validation("缺少片段ID".into()).is_retryable());
        assert!(!EngineError::StateConflict("已确认".into()).is_retryable());
    }

    #[test]
    fn severity_and_category() {
        let err = EngineError::Config("缺少API密钥".into());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn helper_constructors_map_to_variants() {
        assert!(matches!(
            helpers::validation_error("缺少片段ID"),
            EngineError::Validation(_)
        ));
        assert!(matches!(
            helpers::permission_error("非管理员"),
            EngineError::Permission(_)
        ));
        assert!(matches!(
            helpers::state_conflict("已确认"),
            EngineError::StateConflict(_)
        ));

        let result: EngineResult<()> = helpers::log_error(helpers::validation_error("缺少片段ID"));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
