//! 文本处理管道
//!
//! 批次规划、提示词组装与响应解析。三个组件都是同步纯逻辑，
//! 由任务队列的处理器调用，自身不产生并发。

pub mod parser;
pub mod planner;
pub mod prompt;

pub use parser::ResponseParser;
pub use planner::{BatchItem, BatchPlanner, OversizedSegment, PlanOutcome, SegmentBatch};
pub use prompt::{PromptAssembler, PromptContext};

/// 片段的标签渲染形式：`[SEG{index}]\n{text}`
///
/// 规划器用它估算token成本，组装器用它生成提示词正文，
/// 解析器按同样的标签协议还原，三者必须保持一致。
pub fn render_segment_tag(index: u32, text: &str) -> String {
    format!("[SEG{}]\n{}", index, text)
}
