//! 提示词组装器
//!
//! 将批次渲染为带标签的用户提示词，支持存储模板替换与
//! 内置默认模板回退。

use std::sync::Arc;

use regex::Regex;

use crate::adapter::{TemplateKind, TemplateStore, TermPair, TerminologyStore};
use crate::config::constants::SEGMENT_SEPARATOR;
use crate::pipeline::{render_segment_tag, SegmentBatch};

/// 翻译任务的内置默认模板
const DEFAULT_TRANSLATION_TEMPLATE: &str = "\
你是一名专业翻译。请将下列 {{sourceLang}} 文本翻译为 {{targetLang}}，领域为 {{domain}}。
{{terms}}
每个片段以 [SEG<序号>] 标签开头，请在译文中保留完全相同的标签与序号，逐段输出译文，不要添加任何解释。

{{sourceText}}";

/// 审校任务的内置默认模板
const DEFAULT_REVIEW_TEMPLATE: &str = "\
你是一名严格的译文审校专家。请审校下列 {{sourceLang}} → {{targetLang}} 译文，领域为 {{domain}}。
{{terms}}
每个片段以 [SEG<序号>] 标签开头。请逐段指出术语、语法、准确性与风格问题，并在保留标签的前提下给出修改建议。

{{sourceText}}";

/// 翻译任务的系统提示词
const TRANSLATION_SYSTEM_PROMPT: &str =
    "You are a professional translation engine. Preserve all [SEG*] markers exactly.";

/// 审校任务的系统提示词
const REVIEW_SYSTEM_PROMPT: &str =
    "You are a translation quality reviewer. Preserve all [SEG*] markers exactly.";

/// 提示词上下文
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub source_lang: String,
    pub target_lang: String,
    pub domain: Option<String>,
    /// 存储模板ID；解析失败时回退到内置模板
    pub template_id: Option<String>,
    /// 术语表ID
    pub terminology_id: Option<String>,
}

/// 提示词组装器
pub struct PromptAssembler {
    templates: Option<Arc<dyn TemplateStore>>,
    terminology: Option<Arc<dyn TerminologyStore>>,
    tag_pattern: Regex,
    placeholder_pattern: Regex,
}

impl PromptAssembler {
    pub fn new(
        templates: Option<Arc<dyn TemplateStore>>,
        terminology: Option<Arc<dyn TerminologyStore>>,
    ) -> Self {
        Self {
            templates,
            terminology,
            // 原文中的类标记文本会与片段标签协议冲突，替换前剥除
            tag_pattern: Regex::new(r"<[^>]*>").expect("tag pattern is valid"),
            placeholder_pattern: Regex::new(r"\{\{\w+\}\}").expect("placeholder pattern is valid"),
        }
    }

    /// 任务类型对应的系统提示词
    pub fn system_prompt(&self, kind: TemplateKind) -> &'static str {
        match kind {
            TemplateKind::Translation => TRANSLATION_SYSTEM_PROMPT,
            TemplateKind::Review => REVIEW_SYSTEM_PROMPT,
        }
    }

    /// 将批次渲染为用户提示词
    ///
    /// 占位符替换后若仍有未填充的占位符，记录警告但不报错，
    /// 调用方必须容忍部分填充的提示词。
    pub fn build(&self, batch: &SegmentBatch, kind: TemplateKind, ctx: &PromptContext) -> String {
        let template = self.resolve_template(kind, ctx);

        let source_text = batch
            .items
            .iter()
            .map(|item| {
                let cleaned = self.tag_pattern.replace_all(&item.text, "");
                render_segment_tag(item.index, cleaned.trim())
            })
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR);

        let terms_clause = self.terms_clause(ctx);
        let domain = ctx.domain.as_deref().unwrap_or("general");

        let prompt = template
            .replace("{{sourceLang}}", &ctx.source_lang)
            .replace("{{targetLang}}", &ctx.target_lang)
            .replace("{{domain}}", domain)
            .replace("{{terms}}", &terms_clause)
            .replace("{{TERMINOLOGY_LIST}}", &terms_clause)
            .replace("{{sourceText}}", &source_text);

        for unfilled in self.placeholder_pattern.find_iter(&prompt) {
            tracing::warn!("提示词中存在未填充的占位符: {}", unfilled.as_str());
        }

        prompt
    }

    /// 解析模板：存储模板类型匹配且内容非空时使用，否则内置默认
    fn resolve_template(&self, kind: TemplateKind, ctx: &PromptContext) -> String {
        if let (Some(id), Some(store)) = (ctx.template_id.as_deref(), self.templates.as_ref()) {
            match store.find_by_id(id) {
                Some(template) if template.kind == kind && !template.content.trim().is_empty() => {
                    tracing::debug!("使用存储模板: {}", id);
                    return template.content;
                }
                Some(template) => {
                    tracing::warn!(
                        "模板 {} 类型不匹配或内容为空 (kind={:?})，回退到内置模板",
                        id,
                        template.kind
                    );
                }
                None => {
                    tracing::warn!("模板 {} 不存在，回退到内置模板", id);
                }
            }
        }

        match kind {
            TemplateKind::Translation => DEFAULT_TRANSLATION_TEMPLATE.to_string(),
            TemplateKind::Review => DEFAULT_REVIEW_TEMPLATE.to_string(),
        }
    }

    /// 术语指令子句；无术语表时为空串
    fn terms_clause(&self, ctx: &PromptContext) -> String {
        let terms = match (ctx.terminology_id.as_deref(), self.terminology.as_ref()) {
            (Some(id), Some(store)) => store.get_by_id(id).unwrap_or_default(),
            _ => Vec::new(),
        };

        if terms.is_empty() {
            return String::new();
        }

        let list = terms
            .iter()
            .map(|TermPair { source, target }| format!("{} => {}", source, target))
            .collect::<Vec<_>>()
            .join("; ");
        format!("请严格使用以下术语对照: {}", list)
    }
}
