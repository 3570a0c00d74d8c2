//! AI调用结果缓存
//!
//! 对幂等的适配器调用（模型列表、密钥验证、翻译结果）按
//! 语义输入指纹做本地LRU缓存，支持TTL过期与容量淘汰。
//! 关闭缓存时所有操作退化为无副作用直通，调用方无需特判。

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use blake3::Hasher;
use lru::LruCache;
use tokio::sync::RwLock;

use crate::config::CacheConfig;
use crate::monitor::PerformanceMonitor;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub created_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            value,
            created_at: SystemTime::now(),
            ttl,
        }
    }

    /// 检查是否过期
    pub fn is_expired(&self) -> bool {
        match self.created_at.elapsed() {
            Ok(elapsed) => elapsed > self.ttl,
            Err(_) => true,
        }
    }
}

/// 缓存键指纹函数
///
/// 键只由调用的语义输入推导，绝不掺入任务/队列内部状态。
pub mod fingerprint {
    use super::*;

    fn digest(parts: &[&str]) -> String {
        let mut hasher = Hasher::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.finalize().to_hex().to_string()
    }

    /// 翻译调用指纹
    pub fn translation_key(
        model: &str,
        source_lang: &str,
        target_lang: &str,
        text: &str,
        options: &str,
    ) -> String {
        format!(
            "trans:{}",
            digest(&[model, source_lang, target_lang, text, options])
        )
    }

    /// 审校调用指纹
    pub fn review_key(
        model: &str,
        source_lang: &str,
        target_lang: &str,
        prompt: &str,
    ) -> String {
        format!("review:{}", digest(&[model, source_lang, target_lang, prompt]))
    }

    /// 密钥验证指纹（只依赖提供商与密钥是否存在，不含密钥本身）
    pub fn validation_key(provider: &str, has_api_key: bool) -> String {
        format!(
            "validate:{}",
            digest(&[provider, if has_api_key { "with-key" } else { "no-key" }])
        )
    }

    /// 模型列表指纹
    pub fn models_key(provider: &str) -> String {
        format!("models:{}", digest(&[provider]))
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub expired: u64,
    pub evictions_by_clear: u64,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    stats: CacheStats,
}

/// AI调用缓存
pub struct AiCallCache {
    enabled: bool,
    default_ttl: Duration,
    inner: RwLock<CacheInner>,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl AiCallCache {
    pub fn new(config: &CacheConfig, monitor: Option<Arc<PerformanceMonitor>>) -> Self {
        let capacity = NonZeroUsize::new(config.capacity)
            .unwrap_or_else(|| NonZeroUsize::new(1).expect("1 is non-zero"));

        Self {
            enabled: config.enabled,
            default_ttl: config.default_ttl,
            inner: RwLock::new(CacheInner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            monitor,
        }
    }

    /// 获取缓存值；过期条目读取时剔除
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        if !self.enabled {
            return None;
        }

        let mut inner = self.inner.write().await;

        match inner.entries.get(key).cloned() {
            Some(entry) if entry.is_expired() => {
                inner.entries.pop(key);
                inner.stats.expired += 1;
                inner.stats.misses += 1;
                self.note_miss();
                None
            }
            Some(entry) => {
                inner.stats.hits += 1;
                self.note_hit();
                Some(entry.value)
            }
            None => {
                inner.stats.misses += 1;
                self.note_miss();
                None
            }
        }
    }

    /// 写入缓存；容量满时按LRU淘汰最久未使用的条目
    pub async fn set(&self, key: String, value: serde_json::Value, ttl: Option<Duration>) {
        if !self.enabled {
            return;
        }

        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        let mut inner = self.inner.write().await;
        inner.entries.put(key, entry);
        inner.stats.sets += 1;
    }

    /// 检查键是否存在且未过期
    pub async fn has(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let inner = self.inner.read().await;
        inner
            .entries
            .peek(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// 删除指定键
    pub async fn delete(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let mut inner = self.inner.write().await;
        inner.entries.pop(key).is_some()
    }

    /// 清空缓存
    pub async fn clear(&self) {
        if !self.enabled {
            return;
        }

        let mut inner = self.inner.write().await;
        let evicted = inner.entries.len() as u64;
        inner.entries.clear();
        inner.stats.evictions_by_clear += evicted;
        tracing::debug!("缓存已清空，淘汰 {} 个条目", evicted);
    }

    /// 当前条目数
    pub async fn len(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 获取统计信息快照
    pub async fn stats(&self) -> CacheStats {
        self.inner.read().await.stats
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn note_hit(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.record_cache_hit();
        }
    }

    fn note_miss(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.record_cache_miss();
        }
    }
}
