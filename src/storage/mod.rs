//! 存储层
//!
//! AI调用缓存与片段仓储抽象。

pub mod cache;
pub mod repository;

pub use cache::{AiCallCache, CacheEntry, CacheStats};
pub use repository::{
    BulkResolveOutcome, FileProgressNotifier, MemorySegmentRepository, NoopProgressNotifier,
    ResolveCriteria, SegmentRepository,
};
