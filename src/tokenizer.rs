//! 模型感知的token计数器
//!
//! 按模型名选择tiktoken编码，编码器按进程生命周期缓存。
//! token预算只是建议性约束，计数失败时退化为字符数启发式，
//! 绝不因此阻断翻译流程。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

use crate::config::constants::CHARS_PER_TOKEN_FALLBACK;

/// token计数器
///
/// `count` 对同一(text, model)是纯函数；内部仅缓存编码器实例。
pub struct TokenCounter {
    encoders: RwLock<HashMap<String, Arc<CoreBPE>>>,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            encoders: RwLock::new(HashMap::new()),
        }
    }

    /// 统计文本在指定模型编码下的token数
    pub fn count(&self, text: &str, model: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        match self.encoder_for(model) {
            Some(encoder) => encoder.encode_with_special_tokens(text).len(),
            None => {
                tracing::warn!("模型 {} 编码器不可用，使用字符数启发式估算", model);
                Self::fallback_estimate(text)
            }
        }
    }

    /// 字符数启发式：ceil(len / 3)
    fn fallback_estimate(text: &str) -> usize {
        let chars = text.chars().count();
        (chars + CHARS_PER_TOKEN_FALLBACK - 1) / CHARS_PER_TOKEN_FALLBACK
    }

    /// 获取（或构建并缓存）模型对应的编码器
    fn encoder_for(&self, model: &str) -> Option<Arc<CoreBPE>> {
        {
            let encoders = self.encoders.read().ok()?;
            if let Some(encoder) = encoders.get(model) {
                return Some(Arc::clone(encoder));
            }
        }

        let built = Self::build_encoder(model)?;
        let encoder = Arc::new(built);

        if let Ok(mut encoders) = self.encoders.write() {
            encoders
                .entry(model.to_string())
                .or_insert_with(|| Arc::clone(&encoder));
        }

        Some(encoder)
    }

    /// 按模型名选择编码
    ///
    /// o200k_base：GPT-4o/4.1/4.5/5 及 o1/o3/o4 系列；其余使用
    /// cl100k_base。未识别的模型回退到默认编码并记录日志。
    fn build_encoder(model: &str) -> Option<CoreBPE> {
        let m = model.to_lowercase();

        let use_o200k = m.contains("o200k")
            || m.contains("gpt-4o")
            || m.contains("gpt-4.1")
            || m.contains("gpt-4.5")
            || m.contains("gpt-5")
            || Self::has_o_series_prefix(&m);

        let known = use_o200k || m.contains("gpt") || m.contains("cl100k") || m.contains("claude");
        if !known {
            tracing::warn!("未识别的模型 {}，回退到默认编码 cl100k_base", model);
        }

        let result = if use_o200k {
            o200k_base().or_else(|_| cl100k_base())
        } else {
            cl100k_base()
        };

        match result {
            Ok(encoder) => Some(encoder),
            Err(e) => {
                tracing::warn!("构建编码器失败: {}", e);
                None
            }
        }
    }

    /// 检查模型名中是否存在以词边界开始的 o 系列前缀（o1/o3/o4）
    fn has_o_series_prefix(m: &str) -> bool {
        for prefix in &["o1", "o3", "o4"] {
            if let Some(pos) = m.find(prefix) {
                if pos == 0 || !m.as_bytes()[pos - 1].is_ascii_alphanumeric() {
                    return true;
                }
            }
        }
        false
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_counts_zero() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count("", "gpt-4o"), 0);
    }

    #[test]
    fn count_is_deterministic() {
        let counter = TokenCounter::new();
        let a = counter.count("Hello, world! 你好世界", "gpt-4o");
        let b = counter.count("Hello, world! 你好世界", "gpt-4o");
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn unknown_model_still_counts() {
        let counter = TokenCounter::new();
        // 未识别模型回退到默认编码，不panic不报错
        let tokens = counter.count("some text to count", "mystery-model-9000");
        assert!(tokens > 0);
    }

    #[test]
    fn fallback_estimate_ceils() {
        assert_eq!(TokenCounter::fallback_estimate("abc"), 1);
        assert_eq!(TokenCounter::fallback_estimate("abcd"), 2);
        assert_eq!(TokenCounter::fallback_estimate("你好"), 1);
    }

    #[test]
    fn o_series_prefix_detection() {
        assert!(TokenCounter::has_o_series_prefix("o1-preview"));
        assert!(TokenCounter::has_o_series_prefix("my/o3-mini"));
        assert!(!TokenCounter::has_o_series_prefix("proto1-model"));
    }
}
