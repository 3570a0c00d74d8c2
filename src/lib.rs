//! # transflow
//!
//! 翻译与审校编排引擎：面向人机协同翻译平台的核心库。
//!
//! 职责范围：
//! - 按token预算把片段序列切分为带索引标签的AI调用批次
//! - 组装翻译/审校提示词（模板库、术语库可插拔）
//! - 解析AI返回文本中的片段标签并回填
//! - 优先级异步任务队列（并发上限、超时、重试、取消）
//! - 片段审校生命周期状态机与确定性质量评分
//! - AI调用结果缓存与性能指标收集
//!
//! AI提供商、片段存储、模板与术语数据均通过trait注入，
//! 引擎不绑定任何具体后端。
//!
//! ## 使用示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use transflow::config::{AiCredentials, EngineConfig};
//! use transflow::engine::{EngineDependencies, OrchestrationEngine};
//! use transflow::storage::MemorySegmentRepository;
//! # use transflow::adapter::AiAdapter;
//! # fn make_adapter() -> Arc<dyn AiAdapter> { unimplemented!() }
//!
//! # async fn run() {
//! let engine = OrchestrationEngine::new(
//!     EngineConfig::default(),
//!     EngineDependencies {
//!         adapter: make_adapter(),
//!         repository: Arc::new(MemorySegmentRepository::new()),
//!         credentials: AiCredentials {
//!             provider: "openai".to_string(),
//!             api_key: "sk-...".to_string(),
//!             model: "gpt-4o-mini".to_string(),
//!         },
//!         notifier: None,
//!         templates: None,
//!         terminology: None,
//!     },
//! );
//! engine.start().await;
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod review;
pub mod storage;
pub mod tokenizer;

pub use adapter::{AiAdapter, TranslateOptions};
pub use config::{ConfigManager, EngineConfig};
pub use engine::{EngineDependencies, OrchestrationEngine};
pub use error::{EngineError, EngineResult};
pub use model::{Actor, Issue, IssueSeverity, IssueStatus, Segment, SegmentStatus};
pub use queue::{Task, TaskKind, TaskQueue, TaskStatus};
pub use review::{quality_score, ReviewEngine};
