//! 外部能力接口
//!
//! AI适配器、提示词模板库与术语库均以trait形式注入，
//! 引擎核心不关心具体提供商的线协议。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::model::{AiScores, Issue};

/// 可用模型信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub display_name: String,
    pub max_input_tokens: Option<usize>,
}

/// 翻译调用选项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateOptions {
    pub source_lang: String,
    pub target_lang: String,
    pub domain: Option<String>,
    pub model: Option<String>,
}

/// 翻译调用结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationOutput {
    pub translated_text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub processing_time_ms: u64,
}

/// 审校调用结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutput {
    pub suggested_translation: Option<String>,
    pub issues: Vec<Issue>,
    pub scores: AiScores,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub processing_time_ms: u64,
    /// 建议译文相对原译文的改动程度 [0,1]
    pub modification_degree: f32,
}

/// AI服务适配器
///
/// 失败以 `EngineError::Adapter` 形式传播，错误消息原样保留。
#[async_trait]
pub trait AiAdapter: Send + Sync {
    /// 翻译一段文本（可能是多片段标签拼接的批次提示词）
    async fn translate_text(
        &self,
        text: &str,
        options: &TranslateOptions,
    ) -> EngineResult<TranslationOutput>;

    /// 审校一段译文
    async fn review_text(&self, prompt: &str, options: &TranslateOptions)
        -> EngineResult<ReviewOutput>;

    /// 验证API密钥是否有效
    async fn validate_api_key(&self) -> EngineResult<bool>;

    /// 列出可用模型
    async fn get_available_models(&self) -> EngineResult<Vec<ModelInfo>>;
}

/// 提示词模板类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemplateKind {
    Translation,
    Review,
}

/// 存储的提示词模板
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub id: String,
    pub kind: TemplateKind,
    pub content: String,
}

/// 提示词模板库
pub trait TemplateStore: Send + Sync {
    /// 按ID查找模板，不存在返回None
    fn find_by_id(&self, id: &str) -> Option<PromptTemplate>;
}

/// 术语条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermPair {
    pub source: String,
    pub target: String,
}

/// 术语库
pub trait TerminologyStore: Send + Sync {
    /// 按ID获取术语表，不存在返回None
    fn get_by_id(&self, id: &str) -> Option<Vec<TermPair>>;
}
