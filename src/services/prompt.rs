//! 提示词模板
//!
//! 按问题意图选择模板并代入检索上下文。组装永不失败：
//! 模板缺少占位符时回退到默认模板。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::config::PromptConfig;

const CONTEXT_PLACEHOLDER: &str = "{context}";
const QUERY_PLACEHOLDER: &str = "{query}";

/// 问题意图类别
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PromptCategory {
    /// 學群介紹
    #[default]
    Introduction,
    /// 學習內容
    LearningContent,
    /// 職涯發展
    CareerPath,
    /// 跨領域發展
    CrossDomain,
    /// 升學規劃
    Admissions,
    /// 實習就業
    Internship,
}

impl PromptCategory {
    pub const ALL: [PromptCategory; 6] = [
        PromptCategory::Introduction,
        PromptCategory::LearningContent,
        PromptCategory::CareerPath,
        PromptCategory::CrossDomain,
        PromptCategory::Admissions,
        PromptCategory::Internship,
    ];

    /// 关键字扫描顺序，先命中者胜出
    const PRIORITY: [PromptCategory; 6] = [
        PromptCategory::Internship,
        PromptCategory::Admissions,
        PromptCategory::CareerPath,
        PromptCategory::CrossDomain,
        PromptCategory::LearningContent,
        PromptCategory::Introduction,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            PromptCategory::Introduction => "introduction",
            PromptCategory::LearningContent => "learning_content",
            PromptCategory::CareerPath => "career_path",
            PromptCategory::CrossDomain => "cross_domain",
            PromptCategory::Admissions => "admissions",
            PromptCategory::Internship => "internship",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PromptCategory::Introduction => "學群介紹",
            PromptCategory::LearningContent => "學習內容",
            PromptCategory::CareerPath => "職涯發展",
            PromptCategory::CrossDomain => "跨領域發展",
            PromptCategory::Admissions => "升學規劃",
            PromptCategory::Internship => "實習就業",
        }
    }

    /// 接受中文标签或 snake_case 键
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label() == name || c.key().eq_ignore_ascii_case(name))
    }

    /// 按关键字推断类别，未命中时为默认类别
    pub fn detect(query: &str) -> Self {
        let query = query.to_lowercase();
        Self::PRIORITY
            .into_iter()
            .find(|c| c.keywords().iter().any(|k| query.contains(k)))
            .unwrap_or_default()
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            PromptCategory::Internship => &[
                "實習", "就業", "求職", "面試", "履歷", "internship", "intern", "job",
            ],
            PromptCategory::Admissions => &[
                "升學", "入學", "申請", "學測", "分科", "推甄", "繁星", "備審", "科系",
                "admission",
            ],
            PromptCategory::CareerPath => &[
                "職涯", "職業", "出路", "工作", "薪資", "未來發展", "career",
            ],
            PromptCategory::CrossDomain => &[
                "跨領域", "跨域", "雙主修", "輔系", "整合", "interdisciplinary",
            ],
            PromptCategory::LearningContent => &[
                "學習內容", "學什麼", "課程", "科目", "證照", "學習", "course",
            ],
            PromptCategory::Introduction => &["介紹", "是什麼", "簡介", "特色", "適合"],
        }
    }

    /// 回答结构中的固定段落
    pub fn sections(&self) -> &'static [&'static str] {
        match self {
            PromptCategory::Introduction => &[
                "學群基本介紹（2-3點）",
                "核心特色（2-3點）",
                "適合人格特質（2-3點）",
                "未來發展方向（2-3點）",
            ],
            PromptCategory::LearningContent => &[
                "核心必修課程（3-4門）",
                "進階選修領域（2-3個）",
                "重要基礎能力（3-4項）",
                "建議學習路徑",
                "實用證照建議",
            ],
            PromptCategory::CareerPath => &[
                "主要就業領域（3-4個）",
                "次要發展方向（2-3個）",
                "產業趨勢分析",
                "所需關鍵技能（4-5項）",
                "職涯成長建議",
            ],
            PromptCategory::CrossDomain => &[
                "主要跨域方向（2-3個）",
                "建議學習路徑",
                "創新應用案例",
                "發展機會分析",
            ],
            PromptCategory::Admissions => &[
                "推薦科系清單（3-4個）",
                "各升學管道分析",
                "準備事項建議",
                "重要時程提醒",
            ],
            PromptCategory::Internship => &[
                "實習機會類型",
                "求職管道建議",
                "面試準備重點",
                "職涯規劃建議",
            ],
        }
    }

    fn builtin_template(&self) -> &'static str {
        match self {
            PromptCategory::Introduction => INTRODUCTION_TEMPLATE,
            PromptCategory::LearningContent => LEARNING_CONTENT_TEMPLATE,
            PromptCategory::CareerPath => CAREER_PATH_TEMPLATE,
            PromptCategory::CrossDomain => CROSS_DOMAIN_TEMPLATE,
            PromptCategory::Admissions => ADMISSIONS_TEMPLATE,
            PromptCategory::Internship => INTERNSHIP_TEMPLATE,
        }
    }
}

impl std::fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

const INTRODUCTION_TEMPLATE: &str = "根據以下學群資訊，回答使用者的問題：\n\
{context}\n\
\n\
使用者問題：{query}\n\
\n\
請以條列式回答，並確保：\n\
1. 內容完整且準確\n\
2. 回答切中要點\n\
3. 使用繁體中文\n\
4. 避免冗長贅述\n\
5. 重點標示關鍵字\n\
\n\
回答結構：\n\
1. 學群基本介紹（2-3點）\n\
2. 核心特色（2-3點）\n\
3. 適合人格特質（2-3點）\n\
4. 未來發展方向（2-3點）";

const LEARNING_CONTENT_TEMPLATE: &str = "以下是相關學群的學習內容資訊：\n\
{context}\n\
\n\
使用者問題：{query}\n\
\n\
請提供完整的學習資訊，包含：\n\
1. 列出主要課程方向\n\
2. 說明所需能力\n\
3. 提供學習建議\n\
4. 補充相關證照資訊\n\
5. 建議預修科目\n\
\n\
回答結構：\n\
1. 核心必修課程（3-4門）\n\
2. 進階選修領域（2-3個）\n\
3. 重要基礎能力（3-4項）\n\
4. 建議學習路徑\n\
5. 實用證照建議";

const CAREER_PATH_TEMPLATE: &str = "根據以下學群的職涯發展資訊：\n\
{context}\n\
\n\
使用者問題：{query}\n\
\n\
請提供詳細的職涯分析：\n\
1. 可能的職業方向\n\
2. 產業發展趨勢\n\
3. 所需專業能力\n\
4. 薪資發展預期\n\
5. 進修機會\n\
\n\
回答結構：\n\
1. 主要就業領域（3-4個）\n\
2. 次要發展方向（2-3個）\n\
3. 產業趨勢分析\n\
4. 所需關鍵技能（4-5項）\n\
5. 職涯成長建議";

const CROSS_DOMAIN_TEMPLATE: &str = "參考以下跨領域資訊：\n\
{context}\n\
\n\
使用者問題：{query}\n\
\n\
請分析跨領域發展機會：\n\
1. 相關領域連結\n\
2. 跨域整合方向\n\
3. 創新發展機會\n\
4. 所需補充技能\n\
\n\
回答結構：\n\
1. 主要跨域方向（2-3個）\n\
2. 建議學習路徑\n\
3. 創新應用案例\n\
4. 發展機會分析";

const ADMISSIONS_TEMPLATE: &str = "依據下列升學資訊：\n\
{context}\n\
\n\
使用者問題：{query}\n\
\n\
請提供完整升學建議：\n\
1. 適合科系推薦\n\
2. 升學管道分析\n\
3. 準備方向建議\n\
4. 時程規劃參考\n\
\n\
回答結構：\n\
1. 推薦科系清單（3-4個）\n\
2. 各升學管道分析\n\
3. 準備事項建議\n\
4. 重要時程提醒";

const INTERNSHIP_TEMPLATE: &str = "根據以下實習與就業資訊：\n\
{context}\n\
\n\
使用者問題：{query}\n\
\n\
請提供實習就業指引：\n\
1. 實習機會分析\n\
2. 求職市場概況\n\
3. 面試準備建議\n\
4. 職場發展建議\n\
\n\
回答結構：\n\
1. 實習機會類型\n\
2. 求職管道建議\n\
3. 面試準備重點\n\
4. 職涯規劃建議";

/// 单次扫描代入占位符；代入值中的占位符文字不会再被展开
///
/// 模板缺少任一占位符时返回 None。
fn render(template: &str, context: &str, query: &str) -> Option<String> {
    if !template.contains(CONTEXT_PLACEHOLDER) || !template.contains(QUERY_PLACEHOLDER) {
        return None;
    }

    let mut output = String::with_capacity(template.len() + context.len() + query.len());
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        output.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(CONTEXT_PLACEHOLDER) {
            output.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(QUERY_PLACEHOLDER) {
            output.push_str(query);
            rest = after;
        } else {
            output.push('{');
            rest = &tail[1..];
        }
    }
    output.push_str(rest);

    Some(output)
}

/// `GET /api/templates` 返回的模板描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateInfo {
    pub key: String,
    pub label: String,
    pub sections: Vec<String>,
    /// 是否被配置覆盖
    pub customized: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    overrides: HashMap<PromptCategory, String>,
    extra_instructions: Option<String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        let mut builder = Self::new();

        for (name, template) in &config.templates {
            match PromptCategory::from_name(name) {
                Some(category) => builder = builder.with_template(category, template.clone()),
                None => warn!("Ignoring template override for unknown category: {}", name),
            }
        }

        builder.extra_instructions = config
            .extra_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        builder
    }

    pub fn with_template(mut self, category: PromptCategory, template: impl Into<String>) -> Self {
        self.overrides.insert(category, template.into());
        self
    }

    pub fn with_extra_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.extra_instructions = Some(instructions.into());
        self
    }

    pub fn select_category(&self, query: &str) -> PromptCategory {
        PromptCategory::detect(query)
    }

    /// 组装提示词；未指定类别时使用默认类别
    pub fn build(&self, query: &str, context: &str, category: Option<PromptCategory>) -> String {
        let category = category.unwrap_or_default();
        let template = self
            .overrides
            .get(&category)
            .map(String::as_str)
            .unwrap_or_else(|| category.builtin_template());

        let mut prompt = render(template, context, query).unwrap_or_else(|| {
            warn!(
                "Template for {} is missing a placeholder, using the default template",
                category.key()
            );
            render(PromptCategory::default().builtin_template(), context, query)
                .unwrap_or_default()
        });

        if let Some(extra) = &self.extra_instructions {
            prompt.push_str("\n\n額外指示：\n");
            prompt.push_str(extra);
        }

        debug!("Built {} prompt ({} chars)", category.key(), prompt.chars().count());
        prompt
    }

    /// 按名称组装；未知名称回退到默认类别
    pub fn build_named(&self, query: &str, context: &str, name: &str) -> String {
        let category = PromptCategory::from_name(name);
        if category.is_none() {
            debug!("Unknown prompt category {}, using default", name);
        }
        self.build(query, context, category)
    }

    pub fn available_categories(&self) -> Vec<TemplateInfo> {
        PromptCategory::ALL
            .into_iter()
            .map(|c| TemplateInfo {
                key: c.key().to_string(),
                label: c.label().to_string(),
                sections: c.sections().iter().map(|s| s.to_string()).collect(),
                customized: self.overrides.contains_key(&c),
            })
            .collect()
    }
}
