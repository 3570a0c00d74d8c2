//! 批次规划器
//!
//! 将有序片段序列切分为若干批次，保证每批渲染后的提示词
//! （系统提示词 + 片段标签）不超过token预算。

use std::sync::Arc;

use crate::config::constants::SEGMENT_SEPARATOR;
use crate::model::Segment;
use crate::pipeline::render_segment_tag;
use crate::tokenizer::TokenCounter;

/// 批次内的单个片段条目
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// 文件内稳定序号
    pub index: u32,
    /// 待处理文本（翻译时为原文，审校时为译文）
    pub text: String,
}

impl BatchItem {
    pub fn from_segment(segment: &Segment) -> Self {
        Self {
            index: segment.index,
            text: segment.source_text.clone(),
        }
    }
}

/// 规划出的单个批次
///
/// 仅在一次队列任务的生命周期内存在，不持久化。
/// 批内片段保持原始相对顺序。
#[derive(Debug, Clone)]
pub struct SegmentBatch {
    pub id: usize,
    pub items: Vec<BatchItem>,
    /// 含系统提示词在内的估算token数
    pub estimated_tokens: usize,
}

impl SegmentBatch {
    /// 批次摘要（日志用）
    pub fn summary(&self) -> String {
        format!(
            "Batch {}: {} 项, 约 {} tokens",
            self.id,
            self.items.len(),
            self.estimated_tokens
        )
    }
}

/// 单独超出预算、无法进入任何批次的片段
#[derive(Debug, Clone)]
pub struct OversizedSegment {
    pub index: u32,
    /// 该片段标签形式的实测token数
    pub tokens: usize,
}

/// 规划结果
///
/// `oversized` 中的片段被排除在批次之外，调用方必须将其
/// 标记为逐片段失败，不允许静默丢弃。
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub batches: Vec<SegmentBatch>,
    pub oversized: Vec<OversizedSegment>,
}

impl PlanOutcome {
    /// 进入批次的片段总数
    pub fn planned_count(&self) -> usize {
        self.batches.iter().map(|b| b.items.len()).sum()
    }
}

/// 批次规划器
pub struct BatchPlanner {
    counter: Arc<TokenCounter>,
}

impl BatchPlanner {
    pub fn new(counter: Arc<TokenCounter>) -> Self {
        Self { counter }
    }

    /// 按token预算切分片段序列
    ///
    /// 系统提示词计入每个批次的起始成本；分隔符只在批内
    /// 第二个片段起计费。片段是原子单元，永不内部拆分。
    /// 若系统提示词本身超出预算，返回空结果，调用方应视为
    /// 致命错误：任何片段都无法发送。
    pub fn split(
        &self,
        items: &[BatchItem],
        system_prompt: &str,
        max_input_tokens: usize,
        model: &str,
    ) -> PlanOutcome {
        let system_tokens = self.counter.count(system_prompt, model);
        if system_tokens > max_input_tokens {
            tracing::error!(
                "系统提示词已超出token预算 ({} > {})，无法规划任何批次",
                system_tokens,
                max_input_tokens
            );
            return PlanOutcome::default();
        }

        let separator_tokens = self.counter.count(SEGMENT_SEPARATOR, model);

        let mut outcome = PlanOutcome::default();
        let mut current_items: Vec<BatchItem> = Vec::new();
        let mut current_tokens = system_tokens;
        let mut next_batch_id = 1;

        for item in items {
            let rendered = render_segment_tag(item.index, &item.text);
            let item_tokens = self.counter.count(&rendered, model);

            // 单片段连同系统提示词都放不下，逐片段失败
            if system_tokens + item_tokens > max_input_tokens {
                tracing::error!(
                    "片段 {} 单独超出token预算 ({} + {} > {})，已从批次中排除",
                    item.index,
                    system_tokens,
                    item_tokens,
                    max_input_tokens
                );
                outcome.oversized.push(OversizedSegment {
                    index: item.index,
                    tokens: item_tokens,
                });
                continue;
            }

            let separator_cost = if current_items.is_empty() {
                0
            } else {
                separator_tokens
            };

            if current_tokens + separator_cost + item_tokens > max_input_tokens
                && !current_items.is_empty()
            {
                outcome.batches.push(SegmentBatch {
                    id: next_batch_id,
                    items: std::mem::take(&mut current_items),
                    estimated_tokens: current_tokens,
                });
                next_batch_id += 1;
                current_tokens = system_tokens;
            }

            let separator_cost = if current_items.is_empty() {
                0
            } else {
                separator_tokens
            };
            current_tokens += separator_cost + item_tokens;
            current_items.push(item.clone());
        }

        if !current_items.is_empty() {
            outcome.batches.push(SegmentBatch {
                id: next_batch_id,
                items: current_items,
                estimated_tokens: current_tokens,
            });
        }

        tracing::debug!(
            "批次规划完成: {} 个批次, {} 个片段, {} 个超限片段",
            outcome.batches.len(),
            outcome.planned_count(),
            outcome.oversized.len()
        );

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> BatchPlanner {
        BatchPlanner::new(Arc::new(TokenCounter::new()))
    }

    fn items(texts: &[&str]) -> Vec<BatchItem> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| BatchItem {
                index: i as u32,
                text: t.to_string(),
            })
            .collect()
    }

    #[test]
    fn oversized_system_prompt_yields_empty_plan() {
        let planner = planner();
        let long_prompt = "translate ".repeat(200);
        let outcome = planner.split(&items(&["hello"]), &long_prompt, 10, "gpt-4o");
        assert!(outcome.batches.is_empty());
        assert!(outcome.oversized.is_empty());
    }

    #[test]
    fn order_preserved_across_batches() {
        let planner = planner();
        let texts: Vec<String> = (0..20)
            .map(|i| format!("This is sentence number {} with some extra words.", i))
            .collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let input = items(&refs);

        let outcome = planner.split(&input, "Translate the following.", 60, "gpt-4o");
        assert!(outcome.batches.len() > 1, "should need several batches");

        let flattened: Vec<u32> = outcome
            .batches
            .iter()
            .flat_map(|b| b.items.iter().map(|i| i.index))
            .collect();
        let expected: Vec<u32> = (0..20).collect();
        assert_eq!(flattened, expected, "global order must be preserved");

        for batch in &outcome.batches {
            assert!(
                batch.estimated_tokens <= 60,
                "batch {} exceeds budget: {}",
                batch.id,
                batch.estimated_tokens
            );
        }
    }

    #[test]
    fn oversized_segment_excluded_not_dropped_silently() {
        let planner = planner();
        let huge = "word ".repeat(500);
        let input = vec![
            BatchItem {
                index: 0,
                text: "short one".to_string(),
            },
            BatchItem {
                index: 1,
                text: huge,
            },
            BatchItem {
                index: 2,
                text: "another short".to_string(),
            },
        ];

        let outcome = planner.split(&input, "Translate.", 100, "gpt-4o");
        assert_eq!(outcome.oversized.len(), 1);
        assert_eq!(outcome.oversized[0].index, 1);

        let planned: Vec<u32> = outcome
            .batches
            .iter()
            .flat_map(|b| b.items.iter().map(|i| i.index))
            .collect();
        assert_eq!(planned, vec![0, 2]);
    }

    #[test]
    fn single_batch_when_everything_fits() {
        let planner = planner();
        let input = items(&["one", "two", "three"]);
        let outcome = planner.split(&input, "Translate.", 4000, "gpt-4o");
        assert_eq!(outcome.batches.len(), 1);
        assert_eq!(outcome.batches[0].items.len(), 3);
        assert!(outcome.oversized.is_empty());
    }
}
