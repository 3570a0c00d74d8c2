//! 编排引擎
//!
//! 组合根：把token计数、批次规划、提示词组装、响应解析、
//! 任务队列、审校状态机、缓存与监控装配成一个对外门面。
//! 外部能力（AI适配器、片段仓储、模板库、术语库、进度通知）
//! 全部以trait注入，引擎自身不含任何提供商细节。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::adapter::{AiAdapter, ModelInfo, TemplateKind, TemplateStore, TerminologyStore, TranslateOptions};
use crate::config::{AiCredentials, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::model::{Actor, IssueResolution, Segment, SegmentStatus};
use crate::monitor::{MetricsSnapshot, PerformanceMonitor, TaskKindSnapshot};
use crate::pipeline::{BatchItem, BatchPlanner, PromptAssembler, PromptContext, ResponseParser};
use crate::queue::{Task, TaskHandler, TaskKind, TaskQueue, TaskStatus};
use crate::review::ReviewEngine;
use crate::storage::cache::{fingerprint, AiCallCache};
use crate::storage::repository::{
    BulkResolveOutcome, FileProgressNotifier, NoopProgressNotifier, ResolveCriteria,
    SegmentRepository,
};
use crate::tokenizer::TokenCounter;

/// 编排引擎的外部依赖
///
/// 除适配器与仓储外均可省略，省略项使用无操作/内置实现。
pub struct EngineDependencies {
    pub adapter: Arc<dyn AiAdapter>,
    pub repository: Arc<dyn SegmentRepository>,
    /// AI服务凭据，由组合根显式传入；核心代码不读进程环境变量
    pub credentials: AiCredentials,
    pub notifier: Option<Arc<dyn FileProgressNotifier>>,
    pub templates: Option<Arc<dyn TemplateStore>>,
    pub terminology: Option<Arc<dyn TerminologyStore>>,
}

/// 业务执行器
///
/// 队列回调的落点：每种任务类型一条执行路径。与门面分离是
/// 为了打破「队列持有处理器、门面持有队列」的循环引用。
struct Orchestrator {
    config: EngineConfig,
    planner: BatchPlanner,
    prompts: Arc<PromptAssembler>,
    parser: ResponseParser,
    review: Arc<ReviewEngine>,
    repository: Arc<dyn SegmentRepository>,
    adapter: Arc<dyn AiAdapter>,
    cache: Arc<AiCallCache>,
}

impl Orchestrator {
    /// 翻译一批片段：规划批次 → 组装提示词 → 调用AI → 解析回填
    async fn translate_segments(
        &self,
        segments: &[Segment],
        options: &TranslateOptions,
    ) -> EngineResult<serde_json::Value> {
        let items: Vec<BatchItem> = segments.iter().map(BatchItem::from_segment).collect();
        let by_index: HashMap<u32, Uuid> =
            segments.iter().map(|s| (s.index, s.id)).collect();

        let system_prompt = self.prompts.system_prompt(TemplateKind::Translation);
        let model = options
            .model
            .as_deref()
            .unwrap_or(&self.config.batch.model);
        let plan = self.planner.split(
            &items,
            system_prompt,
            self.config.batch.max_input_tokens,
            model,
        );

        let ctx = prompt_context(options);
        let mut translated = 0usize;
        let mut missing: Vec<u32> = Vec::new();

        for batch in &plan.batches {
            let prompt = self.prompts.build(batch, TemplateKind::Translation, &ctx);
            let output = self.translate_with_cache(&prompt, options).await?;

            let parsed = self.parser.parse(&output);
            let expected: Vec<u32> = batch.items.iter().map(|item| item.index).collect();
            missing.extend(self.parser.reconcile(&parsed, &expected));

            for (index, text) in parsed {
                if let Some(segment_id) = by_index.get(&index) {
                    self.review.apply_translation(*segment_id, text).await?;
                    translated += 1;
                }
            }
        }

        Ok(json!({
            "translated": translated,
            "missing": missing,
            "oversized": plan
                .oversized
                .iter()
                .map(|o| json!({"index": o.index, "tokens": o.tokens}))
                .collect::<Vec<_>>(),
        }))
    }

    /// 带缓存的翻译调用；命中时不触达适配器
    async fn translate_with_cache(
        &self,
        prompt: &str,
        options: &TranslateOptions,
    ) -> EngineResult<String> {
        let model = options
            .model
            .as_deref()
            .unwrap_or(&self.config.batch.model);
        let options_repr = serde_json::to_string(options)?;
        let key = fingerprint::translation_key(
            model,
            &options.source_lang,
            &options.target_lang,
            prompt,
            &options_repr,
        );

        if let Some(cached) = self.cache.get(&key).await {
            if let Some(text) = cached.as_str() {
                tracing::debug!("翻译缓存命中");
                return Ok(text.to_string());
            }
        }

        let output = self.adapter.translate_text(prompt, options).await?;
        self.cache
            .set(key, json!(output.translated_text), None)
            .await;
        Ok(output.translated_text)
    }

    /// 并发加载片段；任一缺失即整体失败
    async fn load_segments(&self, segment_ids: &[Uuid]) -> EngineResult<Vec<Segment>> {
        let lookups = segment_ids.iter().map(|id| async move {
            self.repository
                .find_by_id(*id)
                .await?
                .ok_or_else(|| EngineError::Validation(format!("片段 {} 不存在", id)))
        });
        futures::future::try_join_all(lookups).await
    }

    /// 逐片段审校，单个失败不中断批次
    async fn review_segments(
        &self,
        segment_ids: &[Uuid],
        actor: &Actor,
        options: &TranslateOptions,
    ) -> serde_json::Value {
        let mut succeeded: Vec<Uuid> = Vec::new();
        let mut failed: Vec<serde_json::Value> = Vec::new();

        for id in segment_ids {
            match self.review.start_review(*id, actor, options).await {
                Ok(_) => succeeded.push(*id),
                Err(error) => {
                    failed.push(json!({"segmentId": id, "error": error.to_string()}));
                }
            }
        }

        json!({"succeeded": succeeded, "failed": failed})
    }
}

#[async_trait::async_trait]
impl TaskHandler for Orchestrator {
    async fn handle(&self, task: &Task) -> EngineResult<serde_json::Value> {
        match &task.kind {
            TaskKind::Translation {
                segment_id,
                options,
            } => {
                let segments = self.load_segments(&[*segment_id]).await?;
                self.translate_segments(&segments, options).await
            }

            TaskKind::BatchTranslation {
                segment_ids,
                options,
                ..
            } => {
                let segments = self.load_segments(segment_ids).await?;
                self.translate_segments(&segments, options).await
            }

            TaskKind::Review {
                segment_id,
                actor,
                options,
            } => {
                let segment = self.review.start_review(*segment_id, actor, options).await?;
                Ok(json!({
                    "segmentId": segment.id,
                    "status": segment.status,
                    "openIssues": segment.open_issue_count(),
                }))
            }

            TaskKind::BatchReview {
                segment_ids,
                actor,
                options,
                ..
            } => Ok(self.review_segments(segment_ids, actor, options).await),

            TaskKind::FileReview {
                file_id,
                actor,
                options,
            } => {
                let reviewable: Vec<Uuid> = self
                    .repository
                    .segments_of_file(*file_id)
                    .await?
                    .into_iter()
                    .filter(|s| {
                        matches!(s.status, SegmentStatus::Translated | SegmentStatus::Error)
                    })
                    .map(|s| s.id)
                    .collect();
                Ok(self.review_segments(&reviewable, actor, options).await)
            }
        }
    }
}

/// 编排引擎门面
pub struct OrchestrationEngine {
    queue: Arc<TaskQueue>,
    review: Arc<ReviewEngine>,
    cache: Arc<AiCallCache>,
    monitor: Arc<PerformanceMonitor>,
    adapter: Arc<dyn AiAdapter>,
    credentials: AiCredentials,
}

impl OrchestrationEngine {
    pub fn new(config: EngineConfig, deps: EngineDependencies) -> Self {
        let monitor = Arc::new(PerformanceMonitor::new());
        let cache = Arc::new(AiCallCache::new(&config.cache, Some(Arc::clone(&monitor))));
        let counter = Arc::new(TokenCounter::new());
        let prompts = Arc::new(PromptAssembler::new(deps.templates, deps.terminology));
        let notifier = deps
            .notifier
            .unwrap_or_else(|| Arc::new(NoopProgressNotifier));

        let review = Arc::new(ReviewEngine::new(
            Arc::clone(&deps.repository),
            Arc::clone(&deps.adapter),
            notifier,
            Arc::clone(&monitor),
            Arc::clone(&prompts),
        ));

        let inner = Arc::new(Orchestrator {
            planner: BatchPlanner::new(counter),
            prompts,
            parser: ResponseParser::new(),
            review: Arc::clone(&review),
            repository: Arc::clone(&deps.repository),
            adapter: Arc::clone(&deps.adapter),
            cache: Arc::clone(&cache),
            config: config.clone(),
        });

        let queue = Arc::new(TaskQueue::new(
            config.queue,
            inner as Arc<dyn TaskHandler>,
            Arc::clone(&monitor),
        ));

        Self {
            queue,
            review,
            cache,
            monitor,
            adapter: deps.adapter,
            credentials: deps.credentials,
        }
    }

    /// 启动后台工作循环
    pub async fn start(&self) {
        self.queue.start().await;
        tracing::info!("编排引擎已启动");
    }

    /// 优雅停机：不再接受派发，在途任务执行到自然结束
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        tracing::info!("编排引擎已停机");
    }

    // ---- 任务提交 ----

    pub async fn submit_translation(
        &self,
        segment_id: Uuid,
        options: TranslateOptions,
        priority: u8,
    ) -> EngineResult<Uuid> {
        self.queue
            .enqueue(
                TaskKind::Translation {
                    segment_id,
                    options,
                },
                priority,
            )
            .await
    }

    pub async fn submit_batch_translation(
        &self,
        file_id: Uuid,
        segment_ids: Vec<Uuid>,
        options: TranslateOptions,
        priority: u8,
    ) -> EngineResult<Uuid> {
        if segment_ids.is_empty() {
            return Err(EngineError::Validation("片段列表为空".to_string()));
        }
        self.queue
            .enqueue(
                TaskKind::BatchTranslation {
                    file_id,
                    segment_ids,
                    options,
                },
                priority,
            )
            .await
    }

    pub async fn submit_batch_review(
        &self,
        file_id: Uuid,
        segment_ids: Vec<Uuid>,
        actor: Actor,
        options: TranslateOptions,
        priority: u8,
    ) -> EngineResult<Uuid> {
        if segment_ids.is_empty() {
            return Err(EngineError::Validation("片段列表为空".to_string()));
        }
        self.queue
            .enqueue(
                TaskKind::BatchReview {
                    file_id,
                    segment_ids,
                    actor,
                    options,
                },
                priority,
            )
            .await
    }

    pub async fn submit_review(
        &self,
        segment_id: Uuid,
        actor: Actor,
        options: TranslateOptions,
        priority: u8,
    ) -> EngineResult<Uuid> {
        self.queue
            .enqueue(
                TaskKind::Review {
                    segment_id,
                    actor,
                    options,
                },
                priority,
            )
            .await
    }

    pub async fn submit_file_review(
        &self,
        file_id: Uuid,
        actor: Actor,
        options: TranslateOptions,
        priority: u8,
    ) -> EngineResult<Uuid> {
        self.queue
            .enqueue(
                TaskKind::FileReview {
                    file_id,
                    actor,
                    options,
                },
                priority,
            )
            .await
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> EngineResult<()> {
        self.queue.cancel_task(task_id).await
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.queue.get_task(task_id)
    }

    pub fn get_task_status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.queue.get_task_status(task_id)
    }

    // ---- 同步审校操作（不经队列）----

    pub async fn complete_review(&self, segment_id: Uuid, actor: &Actor) -> EngineResult<Segment> {
        self.review.complete_review(segment_id, actor).await
    }

    pub async fn finalize_review(&self, segment_id: Uuid, actor: &Actor) -> EngineResult<Segment> {
        self.review.finalize_review(segment_id, actor).await
    }

    pub async fn batch_resolve_issues(
        &self,
        file_id: Uuid,
        criteria: &ResolveCriteria,
        resolution: &IssueResolution,
        actor: &Actor,
    ) -> EngineResult<BulkResolveOutcome> {
        self.review
            .batch_resolve_issues(file_id, criteria, resolution, actor)
            .await
    }

    // ---- 适配器直通（带缓存）----

    /// 验证注入凭据的API密钥；结果按提供商短期缓存
    pub async fn validate_api_key(&self) -> EngineResult<bool> {
        let key = fingerprint::validation_key(
            &self.credentials.provider,
            self.credentials.has_api_key(),
        );
        if let Some(cached) = self.cache.get(&key).await {
            if let Some(valid) = cached.as_bool() {
                return Ok(valid);
            }
        }

        let valid = self.adapter.validate_api_key().await?;
        self.cache.set(key, json!(valid), None).await;
        Ok(valid)
    }

    /// 列出注入凭据提供商的可用模型；结果按提供商缓存
    pub async fn available_models(&self) -> EngineResult<Vec<ModelInfo>> {
        let key = fingerprint::models_key(&self.credentials.provider);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(models) = serde_json::from_value::<Vec<ModelInfo>>(cached) {
                return Ok(models);
            }
        }

        let models = self.adapter.get_available_models().await?;
        self.cache
            .set(key, serde_json::to_value(&models)?, None)
            .await;
        Ok(models)
    }

    // ---- 指标 ----

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.monitor.snapshot()
    }

    pub fn get_task_metrics(&self) -> HashMap<String, TaskKindSnapshot> {
        self.monitor.task_snapshot()
    }

    pub fn reset_metrics(&self) {
        self.monitor.reset_metrics();
    }

    pub async fn cache_stats(&self) -> crate::storage::cache::CacheStats {
        self.cache.stats().await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}

/// 由调用选项派生提示词上下文
fn prompt_context(options: &TranslateOptions) -> PromptContext {
    PromptContext {
        source_lang: options.source_lang.clone(),
        target_lang: options.target_lang.clone(),
        domain: options.domain.clone(),
        ..Default::default()
    }
}
