//! 任务模型
//!
//! 任务负载是封闭的类型和（sum type），每种任务携带自己的
//! 强类型参数，不走字符串分发。终态任务（Completed / Failed /
//! Cancelled）不再接受任何状态变更。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::TranslateOptions;
use crate::model::Actor;

/// 任务负载
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskKind {
    /// 单片段翻译
    #[serde(rename_all = "camelCase")]
    Translation {
        segment_id: Uuid,
        options: TranslateOptions,
    },

    /// 单片段AI审校
    #[serde(rename_all = "camelCase")]
    Review {
        segment_id: Uuid,
        actor: Actor,
        options: TranslateOptions,
    },

    /// 批量翻译（多片段合批后调用AI）
    #[serde(rename_all = "camelCase")]
    BatchTranslation {
        file_id: Uuid,
        segment_ids: Vec<Uuid>,
        options: TranslateOptions,
    },

    /// 批量审校
    #[serde(rename_all = "camelCase")]
    BatchReview {
        file_id: Uuid,
        segment_ids: Vec<Uuid>,
        actor: Actor,
        options: TranslateOptions,
    },

    /// 整文件审校（片段集合由执行时查询仓储确定）
    #[serde(rename_all = "camelCase")]
    FileReview {
        file_id: Uuid,
        actor: Actor,
        options: TranslateOptions,
    },
}

impl TaskKind {
    /// 指标分组用的任务类型名
    pub fn kind_name(&self) -> &'static str {
        match self {
            TaskKind::Translation { .. } => "translation",
            TaskKind::Review { .. } => "review",
            TaskKind::BatchTranslation { .. } => "batchTranslation",
            TaskKind::BatchReview { .. } => "batchReview",
            TaskKind::FileReview { .. } => "fileReview",
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// 终态判定；终态任务不可再变更
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// 队列任务
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    /// 优先级，数值越大越先执行
    pub priority: u8,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(kind: TaskKind, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            status: TaskStatus::Pending,
            retry_count: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
