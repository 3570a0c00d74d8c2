//! 异步任务队列
//!
//! 按优先级调度AI任务：数值越大越先出队，同优先级按入队顺序
//! （单调序号）先进先出。工作循环每个tick最多补齐到
//! `max_concurrent` 个在途任务；单任务受 `timeout` 约束，可重试
//! 失败在 `retry_delay` 后重新入队，重试耗尽转 Failed 并保留
//! 最后一次错误。取消只对 Pending/Active 生效，迟到的执行结果
//! 通过终态守卫被丢弃。

pub mod task;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{EngineError, EngineResult};
use crate::monitor::PerformanceMonitor;

pub use task::{Task, TaskKind, TaskStatus};

/// 任务处理器
///
/// 队列只负责调度，业务执行由处理器承担。成功返回的JSON值
/// 原样存入任务的 `result`。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> EngineResult<serde_json::Value>;
}

/// 就绪堆条目
///
/// 高优先级在堆顶；同优先级下序号小（先入队）者在前。
#[derive(Debug, PartialEq, Eq)]
struct PendingEntry {
    priority: u8,
    seq: u64,
    id: Uuid,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 任务队列
pub struct TaskQueue {
    config: QueueConfig,
    tasks: DashMap<Uuid, Task>,
    pending: Mutex<BinaryHeap<PendingEntry>>,
    /// 入队单调序号，保证同优先级FIFO
    sequence: AtomicU64,
    active: AtomicUsize,
    /// Pending状态任务计数，随状态迁移增减；深度查询不扫表
    pending_count: AtomicUsize,
    handler: Arc<dyn TaskHandler>,
    monitor: Arc<PerformanceMonitor>,
    shutting_down: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(
        config: QueueConfig,
        handler: Arc<dyn TaskHandler>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            config,
            tasks: DashMap::new(),
            pending: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            handler,
            monitor,
            shutting_down: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// 启动工作循环
    pub async fn start(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.config.process_interval);
            loop {
                ticker.tick().await;
                if queue.shutting_down.load(AtomicOrdering::Relaxed) {
                    break;
                }
                queue.dispatch_ready().await;
            }
            tracing::info!("任务队列工作循环退出");
        });
        *self.worker.lock().await = Some(handle);
    }

    /// 停止工作循环
    ///
    /// 不再派发新任务；已在途的任务继续执行到自然结束。
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, AtomicOrdering::Relaxed);
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// 入队新任务
    ///
    /// 优先级必须落在 `[0, priority_levels)` 内。
    pub async fn enqueue(&self, kind: TaskKind, priority: u8) -> EngineResult<Uuid> {
        if priority >= self.config.priority_levels {
            return Err(EngineError::Validation(format!(
                "优先级 {} 超出范围 [0, {})",
                priority, self.config.priority_levels
            )));
        }

        if self.shutting_down.load(AtomicOrdering::Relaxed) {
            return Err(EngineError::Queue("队列正在关闭，拒绝新任务".to_string()));
        }

        let task = Task::new(kind, priority);
        let id = task.id;
        tracing::debug!("任务入队: {} ({})", id, task.kind.kind_name());

        self.tasks.insert(id, task);
        self.pending_count.fetch_add(1, AtomicOrdering::Relaxed);
        self.push_pending(id, priority).await;
        Ok(id)
    }

    /// 取消任务
    ///
    /// 仅 Pending / Active 可取消；终态任务返回状态冲突。
    /// 取消Active任务不打断执行，迟到的结果在落盘前被终态守卫丢弃。
    pub async fn cancel_task(&self, id: Uuid) -> EngineResult<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| EngineError::Validation(format!("任务 {} 不存在", id)))?;

        if entry.status.is_terminal() {
            return Err(EngineError::StateConflict(format!(
                "任务 {} 已处于终态 {:?}，不能取消",
                id, entry.status
            )));
        }

        let was_pending = entry.status == TaskStatus::Pending;
        entry.status = TaskStatus::Cancelled;
        entry.completed_at = Some(Utc::now());
        drop(entry);

        if was_pending {
            self.pending_count.fetch_sub(1, AtomicOrdering::Relaxed);
        }

        self.refresh_gauges();
        tracing::debug!("任务已取消: {}", id);
        Ok(())
    }

    /// 查询任务快照
    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        self.tasks.get(&id).map(|entry| entry.clone())
    }

    /// 查询任务状态
    pub fn get_task_status(&self, id: Uuid) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|entry| entry.status)
    }

    /// 待执行任务数
    pub fn queue_depth(&self) -> usize {
        self.pending_count.load(AtomicOrdering::Relaxed)
    }

    /// 清理完成时间早于保留窗口的终态任务，返回清理数量
    ///
    /// 任务表对终态任务只增不减，长期运行的嵌入方按自己的
    /// 保留策略周期性调用。
    pub fn prune_finished(&self, retain: Duration) -> usize {
        let retain = match chrono::Duration::from_std(retain) {
            Ok(retain) => retain,
            Err(_) => return 0,
        };
        let cutoff = Utc::now() - retain;

        let before = self.tasks.len();
        self.tasks.retain(|_, task| {
            !(task.status.is_terminal()
                && task.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        let removed = before - self.tasks.len();

        if removed > 0 {
            tracing::debug!("已清理 {} 个终态任务", removed);
        }
        removed
    }

    /// 在途任务数
    pub fn active_count(&self) -> usize {
        self.active.load(AtomicOrdering::Relaxed)
    }

    async fn push_pending(&self, id: Uuid, priority: u8) {
        let seq = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.pending
            .lock()
            .await
            .push(PendingEntry { priority, seq, id });
        self.refresh_gauges();
    }

    /// 把就绪任务补齐到并发上限
    ///
    /// 堆里可能残留已取消任务的条目，出队时按状态过滤。
    async fn dispatch_ready(self: &Arc<Self>) {
        loop {
            if self.active.load(AtomicOrdering::Relaxed) >= self.config.max_concurrent {
                return;
            }

            let entry = match self.pending.lock().await.pop() {
                Some(entry) => entry,
                None => return,
            };

            let task = {
                let mut stored = match self.tasks.get_mut(&entry.id) {
                    Some(stored) => stored,
                    None => continue,
                };
                if stored.status != TaskStatus::Pending {
                    continue;
                }
                stored.status = TaskStatus::Active;
                stored.started_at = Some(Utc::now());
                stored.clone()
            };

            self.pending_count.fetch_sub(1, AtomicOrdering::Relaxed);
            self.active.fetch_add(1, AtomicOrdering::Relaxed);
            self.refresh_gauges();

            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_task(task).await;
            });
        }
    }

    /// 执行单个任务并按结果收尾
    async fn run_task(self: Arc<Self>, task: Task) {
        let kind_name = task.kind.kind_name();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(self.config.timeout, self.handler.handle(&task))
            .await
        {
            Ok(result) => result,
            Err(elapsed) => Err(EngineError::from(elapsed)),
        };

        let elapsed = started.elapsed();
        self.active.fetch_sub(1, AtomicOrdering::Relaxed);

        match outcome {
            Ok(value) => {
                self.monitor.record_request(kind_name, elapsed, true);
                self.finalize(task.id, TaskStatus::Completed, Some(value), None);
            }
            Err(error) => {
                self.monitor.record_request(kind_name, elapsed, false);
                self.handle_failure(task, error).await;
            }
        }

        self.refresh_gauges();
    }

    /// 失败收尾：可重试错误在延迟后重新入队，否则转 Failed
    async fn handle_failure(self: &Arc<Self>, task: Task, error: EngineError) {
        let retryable = error.is_retryable() && task.retry_count < self.config.max_retries;

        if !retryable {
            tracing::warn!(
                "任务 {} 失败（重试 {} 次）: {}",
                task.id,
                task.retry_count,
                error
            );
            self.finalize(task.id, TaskStatus::Failed, None, Some(error.to_string()));
            return;
        }

        // 重新排队前先回到 Pending 并累加重试计数；取消可在延迟期间生效
        let requeue = {
            let mut stored = match self.tasks.get_mut(&task.id) {
                Some(stored) => stored,
                None => return,
            };
            if stored.status.is_terminal() {
                false
            } else {
                stored.status = TaskStatus::Pending;
                stored.retry_count += 1;
                stored.error = Some(error.to_string());
                self.pending_count.fetch_add(1, AtomicOrdering::Relaxed);
                true
            }
        };

        if !requeue {
            return;
        }

        tracing::debug!(
            "任务 {} 第 {} 次重试，{:?} 后重新入队: {}",
            task.id,
            task.retry_count + 1,
            self.config.retry_delay,
            error
        );

        let queue = Arc::clone(self);
        let priority = task.priority;
        let id = task.id;
        tokio::spawn(async move {
            tokio::time::sleep(queue.config.retry_delay).await;
            queue.push_pending(id, priority).await;
        });
    }

    /// 终态写入；已进入终态（如迟到结果遇上取消）则丢弃
    fn finalize(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        if let Some(mut stored) = self.tasks.get_mut(&id) {
            if stored.status.is_terminal() {
                tracing::debug!("任务 {} 已终态，丢弃迟到结果", id);
                return;
            }
            stored.status = status;
            stored.result = result;
            if error.is_some() {
                stored.error = error;
            }
            stored.completed_at = Some(Utc::now());
        }
    }

    fn refresh_gauges(&self) {
        self.monitor.set_queue_size(self.queue_depth());
        self.monitor
            .set_active_tasks(self.active.load(AtomicOrdering::Relaxed));
    }
}
