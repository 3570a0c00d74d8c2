//! 响应解析器
//!
//! 从AI的标签化输出中还原 片段序号 → 文本 的映射。AI输出
//! 不可信，解析必须优雅降级：重复序号覆盖并告警，零解析
//! 告警但不报错，缺失序号由调用方对照原批次自行处理。

use std::collections::HashMap;

use regex::Regex;

/// 标签响应解析器
pub struct ResponseParser {
    marker_pattern: Regex,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            marker_pattern: Regex::new(r"\[SEG(\d+)\]").expect("marker pattern is valid"),
        }
    }

    /// 解析标签化输出
    ///
    /// 每个 `[SEG<digits>]` 标记捕获到下一个标记或文本末尾之间的
    /// 内容，去除首尾空白。
    pub fn parse(&self, output: &str) -> HashMap<u32, String> {
        let mut result = HashMap::new();

        let markers: Vec<_> = self.marker_pattern.captures_iter(output).collect();

        if markers.is_empty() {
            if !output.trim().is_empty() {
                tracing::warn!(
                    "非空输出中未解析到任何片段标签，AI输出可能格式异常 (长度 {})",
                    output.len()
                );
            }
            return result;
        }

        for (i, caps) in markers.iter().enumerate() {
            let whole = caps.get(0).expect("group 0 always present");
            let index: u32 = match caps[1].parse() {
                Ok(index) => index,
                Err(_) => {
                    // 序号超出u32范围，按畸形标签跳过
                    tracing::warn!("片段标签序号无法解析: {}", whole.as_str());
                    continue;
                }
            };

            let start = whole.end();
            let end = markers
                .get(i + 1)
                .map(|next| next.get(0).expect("group 0 always present").start())
                .unwrap_or(output.len());

            let text = output[start..end].trim().to_string();

            if result.insert(index, text).is_some() {
                tracing::warn!("片段序号 {} 重复出现，后值覆盖前值", index);
            }
        }

        result
    }

    /// 对照原批次的期望序号集合，返回缺失的序号
    ///
    /// 解析结果只是建议性的，完整性必须以原批次为准；
    /// 缺失片段通常被调用方标记为失败，其余片段不受影响。
    pub fn reconcile(&self, parsed: &HashMap<u32, String>, expected: &[u32]) -> Vec<u32> {
        let missing: Vec<u32> = expected
            .iter()
            .copied()
            .filter(|index| !parsed.contains_key(index))
            .collect();

        if !missing.is_empty() {
            tracing::warn!("AI输出缺失 {} 个片段: {:?}", missing.len(), missing);
        }

        missing
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
