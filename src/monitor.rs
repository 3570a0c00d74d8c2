//! 性能监控器
//!
//! 线程安全的计数器与仪表，由任务队列和缓存层喂入数据。
//! 计数器单调递增（除显式 reset 外），仪表按最新值覆盖。
//! 平均耗时以 (总和, 次数) 增量维护，不保存历史列表。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// 单一任务类型的累计指标
#[derive(Debug, Default)]
struct KindMetrics {
    count: u64,
    success: u64,
    failure: u64,
    total_micros: u64,
}

/// 性能监控器
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    /// 请求总数
    total_requests: AtomicU64,
    /// 成功请求数
    successful_requests: AtomicU64,
    /// 失败请求数
    failed_requests: AtomicU64,
    /// 总处理时间（微秒），与总数共同构成增量平均
    total_processing_micros: AtomicU64,

    /// 缓存命中次数
    cache_hits: AtomicU64,
    /// 缓存未命中次数
    cache_misses: AtomicU64,

    /// 当前队列深度（仪表）
    queue_size: AtomicUsize,
    /// 当前活跃任务数（仪表）
    active_tasks: AtomicUsize,

    /// 按任务类型的指标
    by_kind: RwLock<HashMap<&'static str, KindMetrics>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次请求完成
    pub fn record_request(&self, kind: &'static str, duration: Duration, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if let Ok(mut by_kind) = self.by_kind.write() {
            let metrics = by_kind.entry(kind).or_default();
            metrics.count += 1;
            metrics.total_micros += duration.as_micros() as u64;
            if success {
                metrics.success += 1;
            } else {
                metrics.failure += 1;
            }
        }
    }

    /// 记录缓存命中
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录缓存未命中
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// 覆盖队列深度仪表
    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    /// 覆盖活跃任务数仪表
    pub fn set_active_tasks(&self, count: usize) {
        self.active_tasks.store(count, Ordering::Relaxed);
    }

    /// 获取全局指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let total_micros = self.total_processing_micros.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            average_processing_time: if total > 0 {
                Duration::from_micros(total_micros / total)
            } else {
                Duration::ZERO
            },
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
            queue_size: self.queue_size.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
        }
    }

    /// 获取按任务类型分组的指标快照
    pub fn task_snapshot(&self) -> HashMap<String, TaskKindSnapshot> {
        let by_kind = match self.by_kind.read() {
            Ok(guard) => guard,
            Err(_) => return HashMap::new(),
        };

        by_kind
            .iter()
            .map(|(kind, metrics)| {
                let snapshot = TaskKindSnapshot {
                    count: metrics.count,
                    average_processing_time: if metrics.count > 0 {
                        Duration::from_micros(metrics.total_micros / metrics.count)
                    } else {
                        Duration::ZERO
                    },
                    success_rate: if metrics.count > 0 {
                        metrics.success as f64 / metrics.count as f64
                    } else {
                        0.0
                    },
                    failure_rate: if metrics.count > 0 {
                        metrics.failure as f64 / metrics.count as f64
                    } else {
                        0.0
                    },
                };
                (kind.to_string(), snapshot)
            })
            .collect()
    }

    /// 重置全部指标
    pub fn reset_metrics(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.total_processing_micros.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.queue_size.store(0, Ordering::Relaxed);
        self.active_tasks.store(0, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.by_kind.write() {
            by_kind.clear();
        }
    }
}

/// 全局指标快照
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_processing_time: Duration,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub queue_size: usize,
    pub active_tasks: usize,
}

/// 按任务类型的指标快照
#[derive(Debug, Clone, Copy)]
pub struct TaskKindSnapshot {
    pub count: u64,
    pub average_processing_time: Duration,
    pub success_rate: f64,
    pub failure_rate: f64,
}
