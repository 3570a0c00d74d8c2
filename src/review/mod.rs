//! 审校状态机
//!
//! 驱动片段在 Pending → Translated → Reviewing → ReviewPending →
//! ReviewCompleted → Confirmed 之间流转，AI失败进入 Error（可重新
//! 发起审校）。所有守卫检查在任何写入之前完成；进入审校先落一次
//! 持久化写入，再调用AI适配器，崩溃时留下可审计的在途证据。

pub mod scorer;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::adapter::{AiAdapter, TemplateKind, TranslateOptions};
use crate::error::{helpers, EngineResult};
use crate::model::{Actor, IssueResolution, IssueStatus, ReviewMetadata, Segment, SegmentStatus};
use crate::monitor::PerformanceMonitor;
use crate::pipeline::{BatchItem, PromptAssembler, PromptContext, SegmentBatch};
use crate::storage::repository::{
    BulkResolveOutcome, FileProgressNotifier, ResolveCriteria, SegmentRepository,
};

pub use scorer::quality_score;

/// 审校引擎
///
/// 单片段路径使用读-改-存加状态前置条件（同一片段同时最多一个
/// 在途审校，由 Reviewing 入口守卫保证）；批量处理路径使用仓储的
/// 原子条件更新。
pub struct ReviewEngine {
    repository: Arc<dyn SegmentRepository>,
    adapter: Arc<dyn AiAdapter>,
    notifier: Arc<dyn FileProgressNotifier>,
    monitor: Arc<PerformanceMonitor>,
    prompts: Arc<PromptAssembler>,
}

impl ReviewEngine {
    pub fn new(
        repository: Arc<dyn SegmentRepository>,
        adapter: Arc<dyn AiAdapter>,
        notifier: Arc<dyn FileProgressNotifier>,
        monitor: Arc<PerformanceMonitor>,
        prompts: Arc<PromptAssembler>,
    ) -> Self {
        Self {
            repository,
            adapter,
            notifier,
            monitor,
            prompts,
        }
    }

    /// 应用翻译结果（队列任务完成时调用）
    ///
    /// Pending → Translated。对无关片段的乱序完成是幂等安全的：
    /// 状态前置条件保证不会覆盖已推进的片段。
    pub async fn apply_translation(
        &self,
        segment_id: Uuid,
        translation: String,
    ) -> EngineResult<Segment> {
        let mut segment = self.load(segment_id).await?;

        if !matches!(
            segment.status,
            SegmentStatus::Pending | SegmentStatus::Translated
        ) {
            return helpers::log_error(helpers::state_conflict(format!(
                "片段 {} 状态为 {:?}，不能写入翻译结果",
                segment_id, segment.status
            )));
        }

        let prior = segment.status;
        segment.translation = Some(translation);
        segment.status = SegmentStatus::Translated;
        segment.error = None;
        self.repository.save(segment, Some(prior)).await
    }

    /// 发起AI审校
    ///
    /// 仅允许从 Translated 或 Error 进入；要求译文非空；要求操作者
    /// 为项目管理员或该片段指派的审校者。进入 Reviewing 先持久化，
    /// 再调用适配器；成功合并问题/评分/元数据并转 ReviewPending，
    /// 失败记录 Error 与错误信息后把错误原样抛给调用方。
    pub async fn start_review(
        &self,
        segment_id: Uuid,
        actor: &Actor,
        options: &TranslateOptions,
    ) -> EngineResult<Segment> {
        let segment = self.load(segment_id).await?;

        self.require_manager_or_assigned(&segment, actor)?;

        if !matches!(
            segment.status,
            SegmentStatus::Translated | SegmentStatus::Error
        ) {
            return helpers::log_error(helpers::state_conflict(format!(
                "片段 {} 状态为 {:?}，只能从 Translated 或 Error 发起审校",
                segment_id, segment.status
            )));
        }

        let translation = match segment.translation.as_deref() {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => {
                return helpers::log_error(helpers::validation_error(format!(
                    "片段 {} 没有可审校的译文",
                    segment_id
                )))
            }
        };

        // 第一次持久化写入：调用AI之前先留下在途审校的证据
        let prior = segment.status;
        let mut segment = segment;
        segment.status = SegmentStatus::Reviewing;
        let mut segment = self.repository.save(segment, Some(prior)).await?;

        let prompt = self.review_prompt(&segment, &translation, options);
        let started = Instant::now();

        match self.adapter.review_text(&prompt, options).await {
            Ok(output) => {
                let elapsed = started.elapsed();
                self.monitor.record_request("review", elapsed, true);

                // 合并问题：分配本系统的稳定ID，统一打为 Open，
                // 盖上审校者身份与时间戳
                let now = Utc::now();
                for mut issue in output.issues {
                    issue.id = Uuid::new_v4();
                    issue.status = IssueStatus::Open;
                    issue.created_by = Some(actor.id.clone());
                    issue.created_at = now;
                    segment.issues.push(issue);
                }

                segment.ai_scores = Some(output.scores);
                segment.review_metadata = Some(ReviewMetadata {
                    model: output.model,
                    total_tokens: output.input_tokens + output.output_tokens,
                    processing_time_ms: output.processing_time_ms,
                    modification_degree: output.modification_degree,
                    reviewed_at: now,
                });
                segment.error = None;
                segment.status = SegmentStatus::ReviewPending;

                // 第二次持久化写入
                self.repository
                    .save(segment, Some(SegmentStatus::Reviewing))
                    .await
            }
            Err(error) => {
                let elapsed = started.elapsed();
                self.monitor.record_request("review", elapsed, false);

                // 失败既要记录在片段上，也要向调用方抛出
                segment.status = SegmentStatus::Error;
                segment.error = Some(error.to_string());
                self.repository
                    .save(segment, Some(SegmentStatus::Reviewing))
                    .await?;

                tracing::error!("片段 {} AI审校失败: {}", segment_id, error);
                Err(error)
            }
        }
    }

    /// 人工确认审校结论：ReviewPending → ReviewCompleted
    pub async fn complete_review(&self, segment_id: Uuid, actor: &Actor) -> EngineResult<Segment> {
        let segment = self.load(segment_id).await?;

        self.require_manager_or_assigned(&segment, actor)?;

        if segment.status != SegmentStatus::ReviewPending {
            return helpers::log_error(helpers::state_conflict(format!(
                "片段 {} 状态为 {:?}，只能从 ReviewPending 确认审校结论",
                segment_id, segment.status
            )));
        }

        let mut segment = segment;
        segment.status = SegmentStatus::ReviewCompleted;
        self.repository
            .save(segment, Some(SegmentStatus::ReviewPending))
            .await
    }

    /// 定稿：ReviewCompleted → Confirmed，计算质量分
    ///
    /// 仅管理员可定稿。成功后触发文件完成度检查（外部文件服务）。
    pub async fn finalize_review(&self, segment_id: Uuid, actor: &Actor) -> EngineResult<Segment> {
        if !actor.is_manager() {
            return helpers::log_error(helpers::permission_error(format!(
                "操作者 {} 不是项目管理员，无权定稿",
                actor.id
            )));
        }

        let segment = self.load(segment_id).await?;

        if segment.status != SegmentStatus::ReviewCompleted {
            return helpers::log_error(helpers::state_conflict(format!(
                "片段 {} 状态为 {:?}，只能对 ReviewCompleted 定稿",
                segment_id, segment.status
            )));
        }

        let mut segment = segment;
        segment.quality_score = Some(quality_score(&segment.issues));
        segment.status = SegmentStatus::Confirmed;
        segment.error = None;

        let saved = self
            .repository
            .save(segment, Some(SegmentStatus::ReviewCompleted))
            .await?;

        self.notifier
            .segment_confirmed(saved.file_id, saved.id)
            .await?;

        tracing::info!(
            "片段 {} 定稿完成，质量分 {}",
            saved.id,
            saved.quality_score.unwrap_or(0)
        );

        Ok(saved)
    }

    /// 批量处理问题
    ///
    /// 仅管理员可执行；对文件下所有 ReviewPending 且含命中过滤
    /// 条件 Open 问题的片段做一次原子条件更新。
    pub async fn batch_resolve_issues(
        &self,
        file_id: Uuid,
        criteria: &ResolveCriteria,
        resolution: &IssueResolution,
        actor: &Actor,
    ) -> EngineResult<BulkResolveOutcome> {
        if !actor.is_manager() {
            return helpers::log_error(helpers::permission_error(format!(
                "操作者 {} 不是项目管理员，无权批量处理问题",
                actor.id
            )));
        }

        if file_id.is_nil() {
            return helpers::log_error(helpers::validation_error("缺少文件ID"));
        }

        self.repository
            .resolve_issues_bulk(file_id, criteria, resolution, &actor.id)
            .await
    }

    /// 构建单片段审校提示词
    fn review_prompt(
        &self,
        segment: &Segment,
        translation: &str,
        options: &TranslateOptions,
    ) -> String {
        let batch = SegmentBatch {
            id: 0,
            items: vec![BatchItem {
                index: segment.index,
                text: format!("原文:\n{}\n译文:\n{}", segment.source_text, translation),
            }],
            estimated_tokens: 0,
        };

        let ctx = PromptContext {
            source_lang: options.source_lang.clone(),
            target_lang: options.target_lang.clone(),
            domain: options.domain.clone(),
            ..Default::default()
        };

        self.prompts.build(&batch, TemplateKind::Review, &ctx)
    }

    async fn load(&self, segment_id: Uuid) -> EngineResult<Segment> {
        if segment_id.is_nil() {
            return helpers::log_error(helpers::validation_error("缺少片段ID"));
        }

        self.repository
            .find_by_id(segment_id)
            .await?
            .ok_or_else(|| helpers::validation_error(format!("片段 {} 不存在", segment_id)))
    }

    /// 管理员或指派审校者可操作
    fn require_manager_or_assigned(&self, segment: &Segment, actor: &Actor) -> EngineResult<()> {
        let assigned = segment
            .reviewer
            .as_deref()
            .map(|reviewer| reviewer == actor.id)
            .unwrap_or(false);

        if actor.is_manager() || assigned {
            Ok(())
        } else {
            helpers::log_error(helpers::permission_error(format!(
                "操作者 {} 既不是管理员也不是片段指派的审校者",
                actor.id
            )))
        }
    }
}
