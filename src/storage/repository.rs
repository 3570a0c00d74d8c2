//! 片段持久化接口
//!
//! 仓储风格的存储抽象：单片段读写走乐观并发（状态与版本
//! 前置条件），批量问题处理走单次原子条件更新，避免读改写
//! 循环在并发定稿下丢失更新。具体存储技术不在本层关心。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    Issue, IssueResolution, IssueSeverity, IssueStatus, IssueType, ResolutionAction, Segment,
    SegmentStatus,
};

/// 批量处理的过滤条件；空列表表示该维度不过滤
#[derive(Debug, Clone, Default)]
pub struct ResolveCriteria {
    pub severities: Vec<IssueSeverity>,
    pub types: Vec<IssueType>,
}

/// 批量处理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkResolveOutcome {
    /// 实际发生变更的片段数
    pub modified_segments: usize,
    /// 被处理的问题总数
    pub resolved_issues: usize,
}

/// 片段仓储接口
#[async_trait]
pub trait SegmentRepository: Send + Sync {
    /// 按ID查找片段
    async fn find_by_id(&self, id: Uuid) -> EngineResult<Option<Segment>>;

    /// 插入新片段
    async fn insert(&self, segment: Segment) -> EngineResult<()>;

    /// 乐观保存
    ///
    /// `expected_status` 非空时要求存储中的当前状态与之相符，
    /// 同时校验版本号未被他人推进；任一前置条件不满足返回
    /// `StateConflict`，不产生任何写入。成功时版本号加一。
    async fn save(
        &self,
        segment: Segment,
        expected_status: Option<SegmentStatus>,
    ) -> EngineResult<Segment>;

    /// 列出文件下的全部片段（按index升序）
    async fn segments_of_file(&self, file_id: Uuid) -> EngineResult<Vec<Segment>>;

    /// 原子批量处理问题
    ///
    /// 对文件下所有处于 ReviewPending 且含有命中过滤条件的
    /// Open 问题的片段，一次性将这些问题置为处理后状态并记录
    /// 处理人。整个操作是单次条件更新，不是逐片段读改写。
    async fn resolve_issues_bulk(
        &self,
        file_id: Uuid,
        criteria: &ResolveCriteria,
        resolution: &IssueResolution,
        resolver: &str,
    ) -> EngineResult<BulkResolveOutcome>;
}

/// 文件进度通知器
///
/// 片段定稿后由审校引擎调用；文件级状态由外部文件服务维护，
/// 本引擎只负责通知。
#[async_trait]
pub trait FileProgressNotifier: Send + Sync {
    async fn segment_confirmed(&self, file_id: Uuid, segment_id: Uuid) -> EngineResult<()>;
}

/// 空实现：不关心文件进度的场景使用
pub struct NoopProgressNotifier;

#[async_trait]
impl FileProgressNotifier for NoopProgressNotifier {
    async fn segment_confirmed(&self, _file_id: Uuid, _segment_id: Uuid) -> EngineResult<()> {
        Ok(())
    }
}

/// 内存仓储实现
///
/// 测试与嵌入场景使用；同时作为仓储语义的参照实现。
pub struct MemorySegmentRepository {
    segments: RwLock<HashMap<Uuid, Segment>>,
}

impl MemorySegmentRepository {
    pub fn new() -> Self {
        Self {
            segments: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySegmentRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// 按处理动作折算问题状态
fn resolved_status(action: ResolutionAction) -> IssueStatus {
    match action {
        ResolutionAction::Accept => IssueStatus::Resolved,
        ResolutionAction::Reject => IssueStatus::Rejected,
    }
}

/// 对单个问题应用处理记录
fn apply_resolution(issue: &mut Issue, resolution: &IssueResolution, resolver: &str) {
    issue.status = resolved_status(resolution.action);
    issue.resolution = Some(resolution.clone());
    issue.resolved_by = Some(resolver.to_string());
}

#[async_trait]
impl SegmentRepository for MemorySegmentRepository {
    async fn find_by_id(&self, id: Uuid) -> EngineResult<Option<Segment>> {
        Ok(self.segments.read().await.get(&id).cloned())
    }

    async fn insert(&self, segment: Segment) -> EngineResult<()> {
        let mut segments = self.segments.write().await;
        if segments.contains_key(&segment.id) {
            return Err(EngineError::Storage(format!(
                "片段 {} 已存在",
                segment.id
            )));
        }
        segments.insert(segment.id, segment);
        Ok(())
    }

    async fn save(
        &self,
        mut segment: Segment,
        expected_status: Option<SegmentStatus>,
    ) -> EngineResult<Segment> {
        let mut segments = self.segments.write().await;

        let stored = segments.get(&segment.id).ok_or_else(|| {
            EngineError::Storage(format!("片段 {} 不存在", segment.id))
        })?;

        if let Some(expected) = expected_status {
            if stored.status != expected {
                return Err(EngineError::StateConflict(format!(
                    "片段 {} 当前状态为 {:?}，不满足前置条件 {:?}",
                    segment.id, stored.status, expected
                )));
            }
        }

        if stored.version != segment.version {
            return Err(EngineError::StateConflict(format!(
                "片段 {} 版本冲突: 存储 {} / 提交 {}",
                segment.id, stored.version, segment.version
            )));
        }

        segment.version += 1;
        segment.updated_at = Utc::now();
        segments.insert(segment.id, segment.clone());
        Ok(segment)
    }

    async fn segments_of_file(&self, file_id: Uuid) -> EngineResult<Vec<Segment>> {
        let segments = self.segments.read().await;
        let mut result: Vec<Segment> = segments
            .values()
            .filter(|s| s.file_id == file_id)
            .cloned()
            .collect();
        result.sort_by_key(|s| s.index);
        Ok(result)
    }

    async fn resolve_issues_bulk(
        &self,
        file_id: Uuid,
        criteria: &ResolveCriteria,
        resolution: &IssueResolution,
        resolver: &str,
    ) -> EngineResult<BulkResolveOutcome> {
        // 单把写锁内完成全部条件更新，等价于一次多文档原子操作
        let mut segments = self.segments.write().await;
        let mut outcome = BulkResolveOutcome::default();

        for segment in segments.values_mut() {
            if segment.file_id != file_id || segment.status != SegmentStatus::ReviewPending {
                continue;
            }

            let mut touched = 0;
            for issue in segment.issues.iter_mut() {
                if issue.status == IssueStatus::Open
                    && issue.matches(&criteria.severities, &criteria.types)
                {
                    apply_resolution(issue, resolution, resolver);
                    touched += 1;
                }
            }

            if touched > 0 {
                segment.version += 1;
                segment.updated_at = Utc::now();
                outcome.modified_segments += 1;
                outcome.resolved_issues += touched;
            }
        }

        tracing::debug!(
            "批量问题处理: 文件 {}, 变更片段 {}, 处理问题 {}",
            file_id,
            outcome.modified_segments,
            outcome.resolved_issues
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueType;

    fn segment_with_issue(file_id: Uuid, index: u32, status: SegmentStatus) -> Segment {
        let mut segment = Segment::new(file_id, index, format!("source {}", index));
        segment.status = status;
        segment.translation = Some(format!("译文 {}", index));
        segment.issues.push(Issue::new(
            IssueType::Grammar,
            IssueSeverity::Low,
            "测试问题".to_string(),
        ));
        segment
    }

    #[tokio::test]
    async fn save_rejects_stale_version() {
        let repo = MemorySegmentRepository::new();
        let segment = Segment::new(Uuid::new_v4(), 0, "text".to_string());
        repo.insert(segment.clone()).await.expect("insert");

        let saved = repo.save(segment.clone(), None).await.expect("first save");
        assert_eq!(saved.version, 1);

        // 旧版本提交被拒绝
        let stale = repo.save(segment, None).await;
        assert!(matches!(stale, Err(EngineError::StateConflict(_))));
    }

    #[tokio::test]
    async fn save_enforces_status_precondition() {
        let repo = MemorySegmentRepository::new();
        let segment = Segment::new(Uuid::new_v4(), 0, "text".to_string());
        repo.insert(segment.clone()).await.expect("insert");

        let result = repo
            .save(segment, Some(SegmentStatus::Translated))
            .await;
        assert!(matches!(result, Err(EngineError::StateConflict(_))));
    }

    #[tokio::test]
    async fn bulk_resolve_only_touches_matching_open_issues() {
        let repo = MemorySegmentRepository::new();
        let file_id = Uuid::new_v4();

        let matching = segment_with_issue(file_id, 0, SegmentStatus::ReviewPending);
        let wrong_status = segment_with_issue(file_id, 1, SegmentStatus::Confirmed);
        repo.insert(matching.clone()).await.expect("insert");
        repo.insert(wrong_status).await.expect("insert");

        let outcome = repo
            .resolve_issues_bulk(
                file_id,
                &ResolveCriteria {
                    severities: vec![IssueSeverity::Low],
                    types: vec![IssueType::Grammar],
                },
                &IssueResolution {
                    action: ResolutionAction::Accept,
                    comment: Some("批量接受".to_string()),
                },
                "manager-1",
            )
            .await
            .expect("bulk resolve");

        assert_eq!(outcome.modified_segments, 1);
        assert_eq!(outcome.resolved_issues, 1);

        let updated = repo
            .find_by_id(matching.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(updated.issues[0].status, IssueStatus::Resolved);
        assert_eq!(updated.issues[0].resolved_by.as_deref(), Some("manager-1"));
        assert_eq!(updated.version, 1);
    }

    #[tokio::test]
    async fn bulk_resolve_with_no_match_reports_zero() {
        let repo = MemorySegmentRepository::new();
        let file_id = Uuid::new_v4();
        repo.insert(segment_with_issue(file_id, 0, SegmentStatus::ReviewPending))
            .await
            .expect("insert");

        let outcome = repo
            .resolve_issues_bulk(
                file_id,
                &ResolveCriteria {
                    severities: vec![IssueSeverity::High],
                    types: vec![],
                },
                &IssueResolution {
                    action: ResolutionAction::Accept,
                    comment: None,
                },
                "manager-1",
            )
            .await
            .expect("bulk resolve");

        assert_eq!(outcome, BulkResolveOutcome::default());
    }
}
