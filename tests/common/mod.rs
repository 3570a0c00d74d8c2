// 集成测试公共模块
//
// 提供可脚本化的模拟AI适配器、测试数据生成器与轮询辅助函数

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use uuid::Uuid;

use transflow::adapter::{
    AiAdapter, ModelInfo, ReviewOutput, TranslateOptions, TranslationOutput,
};
use transflow::config::{AiCredentials, EngineConfig, QueueConfig};
use transflow::error::{EngineError, EngineResult};
use transflow::model::{AiScores, Issue, IssueSeverity, IssueType, Segment, SegmentStatus};
use transflow::queue::{TaskQueue, TaskStatus};

/// 可脚本化的模拟AI适配器
///
/// 翻译调用回显提示词中的片段标签；`fail_next` 注入的错误按
/// FIFO 消耗，消耗完后恢复成功路径。
pub struct MockAiAdapter {
    pub translate_calls: AtomicUsize,
    pub review_calls: AtomicUsize,
    pub validate_calls: AtomicUsize,
    pub models_calls: AtomicUsize,
    failures: Mutex<VecDeque<EngineError>>,
    review_issues: Mutex<Vec<Issue>>,
    delay: Mutex<Option<Duration>>,
    segment_line: Regex,
}

impl MockAiAdapter {
    pub fn new() -> Self {
        Self {
            translate_calls: AtomicUsize::new(0),
            review_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
            models_calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            review_issues: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            segment_line: Regex::new(r"\[SEG(\d+)\]\n([^\n]*)").expect("pattern is valid"),
        }
    }

    /// 让接下来的一次调用失败
    pub fn fail_next(&self, error: EngineError) {
        self.failures
            .lock()
            .expect("lock not poisoned")
            .push_back(error);
    }

    /// 设置审校调用返回的问题列表
    pub fn set_review_issues(&self, issues: Vec<Issue>) {
        *self.review_issues.lock().expect("lock not poisoned") = issues;
    }

    /// 给每次调用注入延迟（超时测试用）
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("lock not poisoned") = Some(delay);
    }

    fn take_failure(&self) -> Option<EngineError> {
        self.failures
            .lock()
            .expect("lock not poisoned")
            .pop_front()
    }

    async fn simulate_latency(&self) {
        let delay = *self.delay.lock().expect("lock not poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AiAdapter for MockAiAdapter {
    async fn translate_text(
        &self,
        text: &str,
        _options: &TranslateOptions,
    ) -> EngineResult<TranslationOutput> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        // 逐标签回显「已译」前缀的译文
        let translated: Vec<String> = self
            .segment_line
            .captures_iter(text)
            .map(|caps| format!("[SEG{}]\n已译:{}", &caps[1], &caps[2]))
            .collect();

        Ok(TranslationOutput {
            translated_text: translated.join("\n\n"),
            model: "mock-model".to_string(),
            input_tokens: 100,
            output_tokens: 120,
            processing_time_ms: 5,
        })
    }

    async fn review_text(
        &self,
        _prompt: &str,
        _options: &TranslateOptions,
    ) -> EngineResult<ReviewOutput> {
        self.review_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        Ok(ReviewOutput {
            suggested_translation: None,
            issues: self.review_issues.lock().expect("lock not poisoned").clone(),
            modification_degree: 0.0,
            scores: AiScores {
                accuracy: Some(0.9),
                fluency: Some(0.85),
                terminology: Some(0.95),
                overall: Some(0.9),
            },
            model: "mock-model".to_string(),
            input_tokens: 200,
            output_tokens: 80,
            processing_time_ms: 7,
        })
    }

    async fn validate_api_key(&self) -> EngineResult<bool> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(true)
    }

    async fn get_available_models(&self) -> EngineResult<Vec<ModelInfo>> {
        self.models_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(vec![ModelInfo {
            id: "mock-model".to_string(),
            provider: "mock".to_string(),
            display_name: "Mock Model".to_string(),
            max_input_tokens: Some(8000),
        }])
    }
}

/// 测试数据生成器
pub struct TestDataGenerator;

impl TestDataGenerator {
    pub fn pending_segment(file_id: Uuid, index: u32) -> Segment {
        Segment::new(file_id, index, format!("source text {}", index))
    }

    pub fn translated_segment(file_id: Uuid, index: u32) -> Segment {
        let mut segment = Self::pending_segment(file_id, index);
        segment.translation = Some(format!("已译:source text {}", index));
        segment.status = SegmentStatus::Translated;
        segment
    }

    pub fn issue(severity: IssueSeverity) -> Issue {
        Issue::new(
            IssueType::Accuracy,
            severity,
            format!("{:?} 级别问题", severity),
        )
    }

    pub fn default_options() -> TranslateOptions {
        TranslateOptions {
            source_lang: "en".to_string(),
            target_lang: "zh".to_string(),
            domain: None,
            model: Some("gpt-4o-mini".to_string()),
        }
    }
}

/// 初始化测试日志订阅器；重复调用静默跳过
///
/// 通过 RUST_LOG 控制输出，默认静默。
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 模拟适配器对应的注入凭据
pub fn test_credentials() -> AiCredentials {
    AiCredentials {
        provider: "mock".to_string(),
        api_key: "test-key".to_string(),
        model: "mock-model".to_string(),
    }
}

/// 快节奏的队列配置，缩短集成测试耗时
pub fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        process_interval: Duration::from_millis(10),
        max_concurrent: 4,
        max_retries: 2,
        retry_delay: Duration::from_millis(20),
        timeout: Duration::from_secs(5),
        priority_levels: 10,
    }
}

/// 快节奏的引擎配置
pub fn fast_engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.queue = fast_queue_config();
    config
}

/// 轮询等待引擎任务进入终态，返回任务快照
pub async fn wait_for_engine_task(
    engine: &transflow::engine::OrchestrationEngine,
    task_id: Uuid,
    timeout: Duration,
) -> transflow::queue::Task {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(task) = engine.get_task(task_id) {
            if task.status.is_terminal() {
                return task;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} did not reach a terminal state within {:?}",
            task_id,
            timeout
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 轮询等待任务进入终态
pub async fn wait_for_terminal(
    queue: &Arc<TaskQueue>,
    task_id: Uuid,
    timeout: Duration,
) -> TaskStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(status) = queue.get_task_status(task_id) {
            if status.is_terminal() {
                return status;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} did not reach a terminal state within {:?}",
            task_id,
            timeout
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
