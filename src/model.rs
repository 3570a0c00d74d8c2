//! 领域数据模型
//!
//! 片段、问题、审校元数据等核心记录类型。所有对外序列化
//! 采用camelCase命名，与前端/存储层的字段约定保持一致。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 片段审校状态机的全部状态
///
/// 正常流转: Pending → Translated → Reviewing → ReviewPending →
/// ReviewCompleted → Confirmed。Reviewing 在AI调用失败时进入 Error，
/// Error 可重新发起审校回到 Reviewing。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentStatus {
    Pending,
    Translated,
    Reviewing,
    ReviewPending,
    ReviewCompleted,
    Confirmed,
    Error,
}

/// 问题类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Terminology,
    Grammar,
    Accuracy,
    Style,
    Consistency,
    Other,
}

/// 问题严重程度（创建后不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

/// 问题状态：只允许 Open → Resolved 或 Open → Rejected，不可回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Open,
    Resolved,
    Rejected,
}

/// 问题处理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    Accept,
    Reject,
}

/// 问题处理记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueResolution {
    pub action: ResolutionAction,
    pub comment: Option<String>,
}

/// 译文中的位置（相对translation的字符偏移）
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePosition {
    pub start: usize,
    pub end: usize,
}

/// 片段译文中发现的单个问题
///
/// 问题以稳定的UUID寻址，数组仅用于归属和局部性，
/// 任何修改都不依赖数组下标。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub status: IssueStatus,
    pub description: String,
    pub suggestion: Option<String>,
    pub position: Option<IssuePosition>,
    pub resolution: Option<IssueResolution>,
    pub resolved_by: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    /// 以 Open 状态创建新问题，并分配稳定ID
    pub fn new(issue_type: IssueType, severity: IssueSeverity, description: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_type,
            severity,
            status: IssueStatus::Open,
            description,
            suggestion: None,
            position: None,
            resolution: None,
            resolved_by: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    /// 检查是否命中（严重程度, 类别）过滤条件
    pub fn matches(&self, severities: &[IssueSeverity], types: &[IssueType]) -> bool {
        (severities.is_empty() || severities.contains(&self.severity))
            && (types.is_empty() || types.contains(&self.issue_type))
    }
}

/// AI审校给出的维度评分
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiScores {
    pub accuracy: Option<f32>,
    pub fluency: Option<f32>,
    pub terminology: Option<f32>,
    pub overall: Option<f32>,
}

/// 一次AI审校的过程元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMetadata {
    pub model: String,
    /// 输入+输出token总量
    pub total_tokens: u64,
    pub processing_time_ms: u64,
    /// 建议译文相对原译文的改动程度 [0,1]
    pub modification_degree: f32,
    pub reviewed_at: DateTime<Utc>,
}

/// 翻译片段：文件内最小可翻译单元
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: Uuid,
    pub file_id: Uuid,
    /// 文件内稳定序号，顺序敏感
    pub index: u32,
    pub source_text: String,
    pub translation: Option<String>,
    pub status: SegmentStatus,
    pub issues: Vec<Issue>,
    pub ai_scores: Option<AiScores>,
    pub review_metadata: Option<ReviewMetadata>,
    /// 定稿时计算的质量分，定稿前为空
    pub quality_score: Option<u8>,
    /// 指派的审校者标识
    pub reviewer: Option<String>,
    /// 最近一次失败的错误信息
    pub error: Option<String>,
    /// 乐观并发版本号，每次持久化写入递增
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// 创建待翻译片段
    pub fn new(file_id: Uuid, index: u32, source_text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_id,
            index,
            source_text,
            translation: None,
            status: SegmentStatus::Pending,
            issues: Vec::new(),
            ai_scores: None,
            review_metadata: None,
            quality_score: None,
            reviewer: None,
            error: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// 统计仍处于 Open 状态的问题数
    pub fn open_issue_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.status == IssueStatus::Open)
            .count()
    }
}

/// 操作者角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Manager,
    Reviewer,
    Translator,
}

/// 发起操作的人员身份
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn manager(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Manager,
        }
    }

    pub fn reviewer(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Reviewer,
        }
    }

    pub fn is_manager(&self) -> bool {
        self.role == ActorRole::Manager
    }
}
